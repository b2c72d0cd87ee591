use serde::{Deserialize, Serialize};

/// Spotify OAuth token response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyTokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Spotify user profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyUser {
    pub id: String,
    pub display_name: Option<String>,
}

/// One page of a paginated Spotify listing.
#[derive(Debug, Clone, Deserialize)]
pub struct SpotifyPage<T> {
    pub items: Vec<T>,
    pub next: Option<String>,
    #[serde(default)]
    pub total: Option<u32>,
}

/// Spotify playlist from API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyPlaylist {
    pub id: String,
    pub name: String,
    pub owner: Option<SpotifyOwner>,
    pub tracks: SpotifyPlaylistTracks,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyOwner {
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyPlaylistTracks {
    pub total: u32,
}

/// Entry of `/me/tracks`
#[derive(Debug, Clone, Deserialize)]
pub struct SpotifySavedTrack {
    pub track: Option<SpotifyTrack>,
}

/// Entry of `/playlists/{id}/tracks`. `track` is null for removed items.
#[derive(Debug, Clone, Deserialize)]
pub struct SpotifyPlaylistItem {
    pub track: Option<SpotifyTrack>,
}

/// Spotify track from API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyTrack {
    /// Null for local files added to a playlist.
    pub id: Option<String>,
    pub name: String,
    pub artists: Vec<SpotifyArtist>,
    pub album: Option<SpotifyAlbum>,
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub is_local: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyArtist {
    pub id: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyAlbum {
    pub id: Option<String>,
    pub name: String,
}

/// PKCE OAuth session data
#[derive(Debug, Clone)]
pub struct OAuthSession {
    pub code_verifier: String,
    pub state: String,
}

/// Response for authentication initiation
#[derive(Debug, Clone)]
pub struct SpotifyAuthResponse {
    pub auth_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playlist_item_with_null_track() {
        let json = r#"{"items": [{"track": null}, {"track": {
            "id": "t1", "name": "Song A", "duration_ms": 200000,
            "artists": [{"id": "a1", "name": "Artist X"}],
            "album": {"id": "al1", "name": "Album"}
        }}], "next": null, "total": 2}"#;

        let page: SpotifyPage<SpotifyPlaylistItem> = serde_json::from_str(json).unwrap();

        assert_eq!(page.items.len(), 2);
        assert!(page.items[0].track.is_none());
        let track = page.items[1].track.as_ref().unwrap();
        assert_eq!(track.id.as_deref(), Some("t1"));
        assert!(!track.is_local);
        assert!(page.next.is_none());
    }

    #[test]
    fn test_local_track_without_ids() {
        let json = r#"{"id": null, "name": "demo", "is_local": true, "duration_ms": 1000,
            "artists": [{"id": null, "name": "Me"}], "album": {"id": null, "name": ""}}"#;
        let track: SpotifyTrack = serde_json::from_str(json).unwrap();
        assert!(track.is_local);
        assert!(track.id.is_none());
    }
}
