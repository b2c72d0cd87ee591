use std::time::Duration;

use backon::Retryable;

use crate::error::SourceError;
use crate::ports::source::TrackSource;
use crate::ports::spotify::{SpotifyApi, SpotifyApiTrack};
use crate::track::{FetchMode, Origin, TrackRecord};

/// Spotify liked songs and playlists as track records.
pub struct SpotifySource<A> {
    api: A,
    retry_delay: Duration,
}

impl<A: SpotifyApi> SpotifySource<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            retry_delay: super::DEFAULT_RETRY_DELAY,
        }
    }

    #[cfg(test)]
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    async fn fetch_once(&self, mode: &FetchMode) -> Result<Vec<SpotifyApiTrack>, SourceError> {
        let tracks = match mode {
            FetchMode::LikedSongs => self.api.saved_tracks().await?,
            FetchMode::Playlist(playlist) => {
                self.api.playlist_tracks(&playlist_id(playlist)).await?
            }
        };
        Ok(tracks)
    }
}

/// Accept a bare id, a `spotify:playlist:` URI or an open.spotify.com link.
pub fn playlist_id(input: &str) -> String {
    let input = input.trim();
    if let Some(id) = input.strip_prefix("spotify:playlist:") {
        return id.to_string();
    }
    if let Ok(url) = url::Url::parse(input) {
        let mut segments = url.path_segments().into_iter().flatten();
        if segments.any(|segment| segment == "playlist") {
            if let Some(id) = segments.next() {
                return id.to_string();
            }
        }
    }
    input.to_string()
}

fn to_record(track: SpotifyApiTrack) -> TrackRecord {
    TrackRecord {
        title: track.name,
        artist: track.artists.join(", "),
        album: track.album_name.filter(|a| !a.is_empty()),
        duration_seconds: track
            .duration_ms
            .map(|ms| ((ms + 500) / 1000) as u32),
        source_id: track.id,
        origin: Origin::Spotify,
    }
}

#[async_trait::async_trait]
impl<A: SpotifyApi> TrackSource for SpotifySource<A> {
    fn origin(&self) -> Origin {
        Origin::Spotify
    }

    #[tracing::instrument(skip(self), fields(origin = "spotify"))]
    async fn fetch(&self, mode: &FetchMode) -> Result<Vec<TrackRecord>, SourceError> {
        let tracks = (|| self.fetch_once(mode))
            .retry(super::backoff(self.retry_delay))
            .when(SourceError::is_retryable)
            .notify(|error, delay| {
                tracing::warn!("Fetching Spotify {} failed, retrying in {:?}: {}", mode, delay, error);
            })
            .await?;

        tracing::info!("Fetched {} tracks from Spotify {}", tracks.len(), mode);
        Ok(tracks.into_iter().map(to_record).collect())
    }
}
