use crate::error::SpotifyApiError;

/// Decoupled representation of a Spotify playlist from the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpotifyApiPlaylist {
    pub id: String,
    pub name: String,
    pub owner: Option<String>,
    pub total_tracks: u32,
}

/// Decoupled representation of a Spotify track from the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpotifyApiTrack {
    pub id: String,
    pub name: String,
    pub duration_ms: Option<u64>,
    pub artists: Vec<String>,
    pub album_name: Option<String>,
}

/// Port trait wrapping the Spotify Web API calls the Spotify source needs.
///
/// Implemented by `spotify_rs::client::SpotifyClient` or test mocks.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait SpotifyApi: Send + Sync {
    async fn saved_tracks(&self) -> Result<Vec<SpotifyApiTrack>, SpotifyApiError>;
    async fn playlist_tracks(&self, playlist_id: &str)
    -> Result<Vec<SpotifyApiTrack>, SpotifyApiError>;
    async fn current_user_playlists(&self) -> Result<Vec<SpotifyApiPlaylist>, SpotifyApiError>;
}
