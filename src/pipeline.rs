use std::collections::HashMap;

use color_eyre::{
    Result,
    eyre::{Context, bail},
};
use tokio_util::sync::CancellationToken;

use crate::coordinator::FetchCoordinator;
use crate::dedup;
use crate::error::SourceError;
use crate::ports::media::{MediaDownloader, MediaSearch, Transcoder};
use crate::ports::source::TrackSource;
use crate::report::ReportWriter;
use crate::track::{DownloadJob, FetchMode, Origin, RunMode, Summary};

/// Above this many unique tracks a run is worth a warning.
pub const LARGE_RUN_THRESHOLD: usize = 1000;

/// One list to fetch, in priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRequest {
    pub origin: Origin,
    pub mode: FetchMode,
}

#[derive(Debug)]
pub struct SourceFailure {
    pub request: SourceRequest,
    pub error: SourceError,
}

#[derive(Debug)]
pub struct RunOutcome {
    pub summary: Summary,
    pub jobs: Vec<DownloadJob>,
    pub source_failures: Vec<SourceFailure>,
}

/// Sources -> deduplicator -> fetch coordinator -> report.
pub struct Pipeline<S, D, T> {
    sources: Vec<Box<dyn TrackSource>>,
    coordinator: FetchCoordinator<S, D, T>,
    writer: ReportWriter,
}

impl<S, D, T> Pipeline<S, D, T>
where
    S: MediaSearch + 'static,
    D: MediaDownloader + 'static,
    T: Transcoder + 'static,
{
    pub fn new(coordinator: FetchCoordinator<S, D, T>, writer: ReportWriter) -> Self {
        Self {
            sources: Vec::new(),
            coordinator,
            writer,
        }
    }

    pub fn with_source(mut self, source: Box<dyn TrackSource>) -> Self {
        self.sources.push(source);
        self
    }

    fn source(&self, origin: Origin) -> Option<&dyn TrackSource> {
        self.sources
            .iter()
            .find(|s| s.origin() == origin)
            .map(|s| s.as_ref())
    }

    #[tracing::instrument(skip_all, fields(requests = requests.len()))]
    pub async fn run(
        &self,
        requests: &[SourceRequest],
        cancel: CancellationToken,
    ) -> Result<RunOutcome> {
        if requests.is_empty() {
            bail!("No sources requested");
        }

        let mut lists = Vec::with_capacity(requests.len());
        let mut source_failures = Vec::new();
        // Credentials that were rejected once stay rejected for the rest of the run.
        let mut auth_failed: HashMap<Origin, SourceError> = HashMap::new();
        for request in requests {
            if let Some(error) = auth_failed.get(&request.origin) {
                tracing::warn!("Skipping {} {}: {}", request.origin, request.mode, error);
                source_failures.push(SourceFailure {
                    request: request.clone(),
                    error: error.clone(),
                });
                continue;
            }
            let result = match self.source(request.origin) {
                Some(source) => {
                    tokio::select! {
                        result = source.fetch(&request.mode) => result,
                        _ = cancel.cancelled() => bail!("Cancelled while fetching track lists"),
                    }
                }
                None => Err(SourceError::unavailable(
                    request.origin,
                    "source is not configured",
                )),
            };
            match result {
                Ok(tracks) => lists.push(tracks),
                Err(error) => {
                    tracing::error!("Skipping {} {}: {}", request.origin, request.mode, error);
                    if matches!(error, SourceError::Auth { .. }) {
                        auth_failed.insert(request.origin, error.clone());
                    }
                    source_failures.push(SourceFailure {
                        request: request.clone(),
                        error,
                    });
                }
            }
        }

        if lists.is_empty() {
            let reasons: Vec<String> = source_failures.iter().map(|f| f.error.to_string()).collect();
            bail!("Every source failed: {}", reasons.join("; "));
        }

        let merged = dedup::merge(lists);
        tracing::info!(
            "{} unique tracks, {} duplicates skipped",
            merged.tracks.len(),
            merged.skipped_duplicates
        );
        if merged.tracks.len() > LARGE_RUN_THRESHOLD {
            tracing::warn!(
                "{} tracks is a large run, this will take a while",
                merged.tracks.len()
            );
        }

        let run_mode = self.coordinator.options().run_mode;
        if run_mode == RunMode::DownloadFiles {
            let output = self.coordinator.output();
            output.ensure_exists().await.wrap_err_with(|| {
                format!("Failed to create output directory {}", output.root().display())
            })?;
        }

        let jobs = merged.tracks.into_iter().map(DownloadJob::new).collect();
        let jobs = self.coordinator.run(jobs, cancel).await;
        let summary = self
            .writer
            .write(&jobs, run_mode, merged.skipped_duplicates)?;

        tracing::info!(
            "Finished: {} succeeded, {} failed ({} cancelled), {} duplicates skipped",
            summary.succeeded,
            summary.failed,
            summary.cancelled,
            summary.skipped_duplicates
        );

        Ok(RunOutcome {
            summary,
            jobs,
            source_failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::coordinator::FetchOptions;
    use crate::output::OutputDir;
    use crate::ports::media::{MockMediaDownloader, MockMediaSearch, MockTranscoder};
    use crate::ports::source::MockTrackSource;
    use crate::test_utils::track;
    use crate::track::{JobStatus, MediaCandidate, TrackRecord};

    fn source(origin: Origin, result: Result<Vec<TrackRecord>, SourceError>) -> Box<dyn TrackSource> {
        let mut source = MockTrackSource::new();
        source.expect_origin().return_const(origin);
        source
            .expect_fetch()
            .times(1)
            .returning(move |_| result.clone());
        Box::new(source)
    }

    fn report_pipeline(dir: &tempfile::TempDir) -> Pipeline<MockMediaSearch, MockMediaDownloader, MockTranscoder> {
        let mut search = MockMediaSearch::new();
        search.expect_search().returning(|query, _| {
            Ok(vec![MediaCandidate {
                duration_seconds: Some(200),
                ..MediaCandidate::youtube("vid", query, 0)
            }])
        });
        let mut downloader = MockMediaDownloader::new();
        downloader.expect_download_audio().never();
        let mut transcoder = MockTranscoder::new();
        transcoder.expect_transcode().never();

        let coordinator = FetchCoordinator::new(
            search,
            downloader,
            transcoder,
            OutputDir::new(dir.path().join("songs"), "mp3"),
            FetchOptions {
                run_mode: RunMode::ReportOnly,
                searches_per_second: 1000,
                retry_delay: Duration::from_millis(1),
                ..FetchOptions::default()
            },
        );
        Pipeline::new(coordinator, ReportWriter::new(dir.path().join("results.json")))
    }

    fn requests() -> Vec<SourceRequest> {
        vec![
            SourceRequest {
                origin: Origin::Spotify,
                mode: FetchMode::LikedSongs,
            },
            SourceRequest {
                origin: Origin::YouTubeMusic,
                mode: FetchMode::LikedSongs,
            },
        ]
    }

    #[tokio::test]
    async fn test_merges_sources_in_priority_order() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = report_pipeline(&dir)
            .with_source(source(
                Origin::Spotify,
                Ok(vec![
                    track("Song A", "Artist X", Origin::Spotify),
                    track("Song B", "Artist Y", Origin::Spotify),
                ]),
            ))
            .with_source(source(
                Origin::YouTubeMusic,
                Ok(vec![
                    track("song a", "artist x", Origin::YouTubeMusic),
                    track("Song C", "Artist Z", Origin::YouTubeMusic),
                ]),
            ));

        let outcome = pipeline.run(&requests(), CancellationToken::new()).await.unwrap();

        assert_eq!(outcome.summary.skipped_duplicates, 1);
        assert_eq!(outcome.summary.succeeded, 3);
        assert_eq!(outcome.jobs[0].record.origin, Origin::Spotify);
        assert!(outcome.jobs.iter().all(|j| j.status == JobStatus::Done));
        assert!(outcome.source_failures.is_empty());
        assert!(dir.path().join("results.json").exists());
        // report mode never creates the output directory
        assert!(!dir.path().join("songs").exists());
    }

    #[tokio::test]
    async fn test_failed_source_does_not_stop_the_others() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = report_pipeline(&dir)
            .with_source(source(
                Origin::Spotify,
                Err(SourceError::auth(Origin::Spotify, "token expired")),
            ))
            .with_source(source(
                Origin::YouTubeMusic,
                Ok(vec![track("Song C", "Artist Z", Origin::YouTubeMusic)]),
            ));

        let outcome = pipeline.run(&requests(), CancellationToken::new()).await.unwrap();

        assert_eq!(outcome.jobs.len(), 1);
        assert_eq!(outcome.source_failures.len(), 1);
        assert_eq!(outcome.source_failures[0].request.origin, Origin::Spotify);
        assert!(matches!(outcome.source_failures[0].error, SourceError::Auth { .. }));
    }

    #[tokio::test]
    async fn test_rejected_credentials_are_not_retried_for_later_playlists() {
        let dir = tempfile::tempdir().unwrap();
        let mut requests: Vec<SourceRequest> = (0..5)
            .map(|i| SourceRequest {
                origin: Origin::Spotify,
                mode: FetchMode::Playlist(format!("playlist{i}")),
            })
            .collect();
        requests.push(SourceRequest {
            origin: Origin::YouTubeMusic,
            mode: FetchMode::LikedSongs,
        });
        let pipeline = report_pipeline(&dir)
            .with_source(source(
                Origin::Spotify,
                Err(SourceError::auth(Origin::Spotify, "token revoked")),
            ))
            .with_source(source(
                Origin::YouTubeMusic,
                Ok(vec![track("Song C", "Artist Z", Origin::YouTubeMusic)]),
            ));

        let outcome = pipeline.run(&requests, CancellationToken::new()).await.unwrap();

        // `source` expects exactly one fetch per origin
        assert_eq!(outcome.source_failures.len(), 5);
        assert!(
            outcome
                .source_failures
                .iter()
                .all(|f| matches!(f.error, SourceError::Auth { origin: Origin::Spotify, .. }))
        );
        assert_eq!(
            outcome.source_failures[4].request.mode,
            FetchMode::Playlist("playlist4".into())
        );
        assert_eq!(outcome.summary.succeeded, 1);
    }

    #[tokio::test]
    async fn test_every_source_failing_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = report_pipeline(&dir)
            .with_source(source(
                Origin::Spotify,
                Err(SourceError::unavailable(Origin::Spotify, "503")),
            ))
            .with_source(source(
                Origin::YouTubeMusic,
                Err(SourceError::auth(Origin::YouTubeMusic, "no cookie")),
            ));

        let result = pipeline.run(&requests(), CancellationToken::new()).await;

        assert!(result.is_err());
        assert!(!dir.path().join("results.json").exists());
    }

    #[tokio::test]
    async fn test_unconfigured_source_is_a_source_failure() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = report_pipeline(&dir).with_source(source(
            Origin::Spotify,
            Ok(vec![track("Song A", "Artist X", Origin::Spotify)]),
        ));

        let outcome = pipeline.run(&requests(), CancellationToken::new()).await.unwrap();

        assert_eq!(outcome.source_failures.len(), 1);
        assert_eq!(outcome.source_failures[0].request.origin, Origin::YouTubeMusic);
        assert_eq!(outcome.summary.succeeded, 1);
    }

    #[tokio::test]
    async fn test_no_requests_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(
            report_pipeline(&dir)
                .run(&[], CancellationToken::new())
                .await
                .is_err()
        );
    }
}
