use crate::error::SourceError;
use crate::track::{FetchMode, Origin, TrackRecord};

/// A streaming service that can hand back an ordered list of tracks.
///
/// Adapters are given an authenticated session up front and never prompt.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait TrackSource: Send + Sync {
    fn origin(&self) -> Origin;

    async fn fetch(&self, mode: &FetchMode) -> Result<Vec<TrackRecord>, SourceError>;
}
