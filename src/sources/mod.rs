use std::time::Duration;

use backon::ExponentialBuilder;

use crate::error::SourceError;
use crate::ports::source::TrackSource;
use crate::track::{FetchMode, Origin, TrackRecord};

pub mod spotify;
pub mod youtube_music;

/// Attempts after the first one before a source gives up.
pub const SOURCE_RETRIES: usize = 3;

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

fn backoff(delay: Duration) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(delay)
        .with_max_times(SOURCE_RETRIES)
        .with_jitter()
}

/// Stands in for a source that could not be set up, so the failure is
/// reported per request like any other fetch error.
pub struct FailedSource {
    error: SourceError,
}

impl FailedSource {
    pub fn new(error: SourceError) -> Self {
        Self { error }
    }
}

#[async_trait::async_trait]
impl TrackSource for FailedSource {
    fn origin(&self) -> Origin {
        self.error.origin()
    }

    async fn fetch(&self, _mode: &FetchMode) -> Result<Vec<TrackRecord>, SourceError> {
        Err(self.error.clone())
    }
}
