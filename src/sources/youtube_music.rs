use std::path::PathBuf;
use std::time::Duration;

use backon::Retryable;

use crate::error::{MediaError, SourceError};
use crate::ports::media::{PlaylistEntry, PlaylistExtractor};
use crate::ports::source::TrackSource;
use crate::tools::cookies;
use crate::track::{FetchMode, Origin, TrackRecord};

pub const LIKED_SONGS_URL: &str = "https://music.youtube.com/playlist?list=LM";
const UNKNOWN_ARTIST: &str = "Unknown Artist";

/// YouTube Music liked songs and playlists, read through a flat playlist listing.
///
/// Authentication is a raw browser `Cookie:` header stored in `cookie_file`.
pub struct YouTubeMusicSource<E> {
    extractor: E,
    cookie_file: PathBuf,
    retry_delay: Duration,
}

impl<E: PlaylistExtractor> YouTubeMusicSource<E> {
    pub fn new(extractor: E, cookie_file: impl Into<PathBuf>) -> Self {
        Self {
            extractor,
            cookie_file: cookie_file.into(),
            retry_delay: super::DEFAULT_RETRY_DELAY,
        }
    }

    #[cfg(test)]
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }
}

pub fn playlist_url(mode: &FetchMode) -> String {
    match mode {
        FetchMode::LikedSongs => LIKED_SONGS_URL.to_string(),
        FetchMode::Playlist(playlist) if playlist.starts_with("http") => playlist.clone(),
        FetchMode::Playlist(list_id) => format!(
            "https://music.youtube.com/playlist?list={}",
            urlencoding::encode(list_id)
        ),
    }
}

/// "Artist - Title" video titles are split; anything else keeps the
/// uploader as the artist.
fn to_record(entry: PlaylistEntry) -> TrackRecord {
    let (artist, title) = match entry.title.split_once(" - ") {
        Some((artist, title)) if !artist.trim().is_empty() && !title.trim().is_empty() => {
            (artist.trim().to_string(), title.trim().to_string())
        }
        _ => {
            let artist = entry
                .uploader
                .as_deref()
                .map(|u| u.strip_suffix(" - Topic").unwrap_or(u).trim())
                .filter(|u| !u.is_empty())
                .unwrap_or(UNKNOWN_ARTIST)
                .to_string();
            (artist, entry.title.trim().to_string())
        }
    };

    TrackRecord {
        title,
        artist,
        album: None,
        duration_seconds: entry.duration_seconds,
        source_id: entry.id,
        origin: Origin::YouTubeMusic,
    }
}

fn to_source_error(error: MediaError) -> SourceError {
    match error {
        MediaError::SignInRequired(reason) => SourceError::auth(
            Origin::YouTubeMusic,
            format!("cookies were rejected, run `ytmusic set-cookie` again ({reason})"),
        ),
        other => SourceError::unavailable(Origin::YouTubeMusic, other.to_string()),
    }
}

#[async_trait::async_trait]
impl<E: PlaylistExtractor> TrackSource for YouTubeMusicSource<E> {
    fn origin(&self) -> Origin {
        Origin::YouTubeMusic
    }

    #[tracing::instrument(skip(self), fields(origin = "ytmusic"))]
    async fn fetch(&self, mode: &FetchMode) -> Result<Vec<TrackRecord>, SourceError> {
        if !self.cookie_file.is_file() {
            return Err(SourceError::auth(
                Origin::YouTubeMusic,
                format!(
                    "no cookie file at {}, run `ytmusic set-cookie` first",
                    self.cookie_file.display()
                ),
            ));
        }
        let jar = cookies::netscape_jar_from_header_file(&self.cookie_file).map_err(|e| {
            SourceError::auth(
                Origin::YouTubeMusic,
                format!("could not read {}: {e}", self.cookie_file.display()),
            )
        })?;

        let url = playlist_url(mode);
        let entries = (|| self.extractor.extract_playlist(&url, jar.path()))
            .retry(super::backoff(self.retry_delay))
            .when(MediaError::is_transient)
            .notify(|error, delay| {
                tracing::warn!("Fetching YouTube Music {} failed, retrying in {:?}: {}", mode, delay, error);
            })
            .await
            .map_err(to_source_error)?;

        tracing::info!("Fetched {} tracks from YouTube Music {}", entries.len(), mode);
        Ok(entries.into_iter().map(to_record).collect())
    }
}
