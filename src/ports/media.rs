use std::path::{Path, PathBuf};

use crate::error::MediaError;
use crate::track::{AudioFormat, MediaCandidate};

/// One entry of a flat playlist listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistEntry {
    pub id: String,
    pub title: String,
    pub uploader: Option<String>,
    pub duration_seconds: Option<u32>,
}

/// Free-text search against the media index.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait MediaSearch: Send + Sync {
    /// Up to `limit` results, best first.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<MediaCandidate>, MediaError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait PlaylistExtractor: Send + Sync {
    async fn extract_playlist(
        &self,
        url: &str,
        cookie_file: &Path,
    ) -> Result<Vec<PlaylistEntry>, MediaError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait MediaDownloader: Send + Sync {
    /// Download the best audio stream of `candidate` into `dir`, returning the file written.
    async fn download_audio(
        &self,
        candidate: &MediaCandidate,
        dir: &Path,
    ) -> Result<PathBuf, MediaError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        format: AudioFormat,
        quality_kbps: u32,
    ) -> Result<(), MediaError>;
}
