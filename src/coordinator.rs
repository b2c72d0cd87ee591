//! Turns unique tracks into files (or, in report mode, into resolved candidates).
//!
//! Each job runs Search -> Download -> Convert on the worker pool. A failing
//! job is marked `Failed` and never affects the others.

use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use governor::{
    Quota, RateLimiter, clock::DefaultClock, state::InMemoryState, state::direct::NotKeyed,
};
use tokio_util::sync::CancellationToken;

use crate::error::{JobError, MediaError};
use crate::matching;
use crate::output::{OutputDir, Target};
use crate::ports::media::{MediaDownloader, MediaSearch, Transcoder};
use crate::track::{
    AudioFormat, DownloadJob, JobStatus, MediaCandidate, Origin, RunMode, TrackRecord,
};
use crate::worker_pool::{TaskOutcome, WorkerPool};

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

pub const MAX_CONCURRENCY: usize = 16;

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub run_mode: RunMode,
    pub format: AudioFormat,
    pub quality_kbps: u32,
    pub concurrency: usize,
    /// Extra attempts after a transient search/download failure.
    pub max_retries: usize,
    pub search_results: usize,
    pub searches_per_second: u32,
    /// First backoff delay; doubles on each retry.
    pub retry_delay: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            run_mode: RunMode::DownloadFiles,
            format: AudioFormat::Mp3,
            quality_kbps: 320,
            concurrency: 3,
            max_retries: 2,
            search_results: 5,
            searches_per_second: 2,
            retry_delay: Duration::from_secs(1),
        }
    }
}

pub struct FetchCoordinator<S, D, T> {
    shared: Arc<Shared<S, D, T>>,
}

struct Shared<S, D, T> {
    search: S,
    downloader: D,
    transcoder: T,
    output: OutputDir,
    options: FetchOptions,
    rate_limiter: DirectRateLimiter,
    progress: Progress,
}

/// Running counters, shared by all jobs of a run.
#[derive(Debug, Default)]
struct Progress {
    total: AtomicUsize,
    completed: AtomicUsize,
}

impl Progress {
    fn report(&self, job: &DownloadJob, run_mode: RunMode) {
        let index = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        let total = self.total.load(Ordering::SeqCst);
        let name = job.record.display_name();

        match (&job.status, &job.error, run_mode) {
            (JobStatus::Done, _, RunMode::DownloadFiles) if job.candidate.is_none() => {
                tracing::info!("[{index}/{total}] ✓ Already downloaded: {name}");
            }
            (JobStatus::Done, _, RunMode::DownloadFiles) => {
                tracing::info!("[{index}/{total}] ✓ Downloaded: {name}");
            }
            (JobStatus::Done, _, RunMode::ReportOnly) => {
                let url = job.candidate.as_ref().map(|c| c.url.as_str()).unwrap_or("");
                tracing::info!("[{index}/{total}] ✓ Found: {name} -> {url}");
            }
            (_, Some(error), _) => {
                tracing::warn!("[{index}/{total}] ✗ Failed: {name}: {error}");
            }
            (status, None, _) => {
                tracing::warn!("[{index}/{total}] ✗ Unfinished ({status:?}): {name}");
            }
        }
    }
}

impl<S, D, T> FetchCoordinator<S, D, T>
where
    S: MediaSearch + 'static,
    D: MediaDownloader + 'static,
    T: Transcoder + 'static,
{
    pub fn new(search: S, downloader: D, transcoder: T, output: OutputDir, options: FetchOptions) -> Self {
        let per_second = NonZeroU32::new(options.searches_per_second).unwrap_or(NonZeroU32::MIN);
        let options = FetchOptions {
            concurrency: options.concurrency.clamp(1, MAX_CONCURRENCY),
            ..options
        };

        Self {
            shared: Arc::new(Shared {
                search,
                downloader,
                transcoder,
                output,
                rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
                options,
                progress: Progress::default(),
            }),
        }
    }

    pub fn options(&self) -> &FetchOptions {
        &self.shared.options
    }

    pub fn output(&self) -> &OutputDir {
        &self.shared.output
    }

    /// Process every job and return them, in input order, in a terminal state.
    ///
    /// Cancelling `cancel` marks every job that did not complete as
    /// `Failed(Cancelled)`; no partial file is left in the output directory.
    #[tracing::instrument(skip_all, fields(jobs = jobs.len(), mode = ?self.shared.options.run_mode))]
    pub async fn run(&self, jobs: Vec<DownloadJob>, cancel: CancellationToken) -> Vec<DownloadJob> {
        let shared = &self.shared;
        shared.progress.total.store(jobs.len(), Ordering::SeqCst);
        shared.progress.completed.store(0, Ordering::SeqCst);

        // Targets are handed out in job order, before anything runs, so the
        // naming of colliding tracks doesn't depend on scheduling.
        let targets: Vec<Option<Target>> = match shared.options.run_mode {
            RunMode::DownloadFiles => jobs
                .iter()
                .map(|job| Some(shared.output.reserve(&job.record)))
                .collect(),
            RunMode::ReportOnly => vec![None; jobs.len()],
        };

        let originals = jobs.clone();
        let mut pool = WorkerPool::new(shared.options.concurrency, cancel);
        for (job, target) in jobs.into_iter().zip(targets) {
            pool.submit(shared.clone().process(job, target));
        }

        let jobs: Vec<DownloadJob> = pool
            .join()
            .await
            .into_iter()
            .zip(originals)
            .map(|(outcome, mut original)| match outcome {
                TaskOutcome::Finished(job) => job,
                TaskOutcome::Cancelled { started } => {
                    if started {
                        tracing::info!("Cancelled: {}", original.record.display_name());
                    }
                    original.fail(JobError::Cancelled);
                    original
                }
                TaskOutcome::Panicked => {
                    tracing::error!("Worker panicked for {}", original.record.display_name());
                    original.fail(JobError::Download {
                        reason: "worker panicked".to_string(),
                    });
                    original
                }
            })
            .collect();

        debug_assert!(jobs.iter().all(|job| job.status.is_terminal()));
        jobs
    }
}

impl<S, D, T> Shared<S, D, T>
where
    S: MediaSearch,
    D: MediaDownloader,
    T: Transcoder,
{
    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.options.retry_delay)
            .with_max_times(self.options.max_retries)
            .with_jitter()
    }

    async fn process(self: Arc<Self>, mut job: DownloadJob, target: Option<Target>) -> DownloadJob {
        if let Some(Target::Existing(path)) = target {
            job.status = JobStatus::Done;
            job.output_path = Some(path);
            self.progress.report(&job, self.options.run_mode);
            return job;
        }

        job.status = JobStatus::Searching;
        let candidate = match self.resolve(&job.record).await {
            Ok(candidate) => candidate,
            Err(error) => {
                job.fail(error);
                self.progress.report(&job, self.options.run_mode);
                return job;
            }
        };
        job.candidate = Some(candidate.clone());

        match (self.options.run_mode, target) {
            (RunMode::DownloadFiles, Some(Target::New(target))) => {
                match self.fetch_audio(&mut job, &candidate, &target).await {
                    Ok(()) => {
                        job.status = JobStatus::Done;
                        job.output_path = Some(target);
                    }
                    Err(error) => job.fail(error),
                }
            }
            _ => job.status = JobStatus::Done,
        }

        self.progress.report(&job, self.options.run_mode);
        job
    }

    /// Find the media item to fetch for `record`.
    async fn resolve(&self, record: &TrackRecord) -> Result<MediaCandidate, JobError> {
        // Tracks liked on YouTube Music already point at the exact video.
        if record.origin == Origin::YouTubeMusic && !record.source_id.is_empty() {
            return Ok(MediaCandidate {
                channel: Some(record.artist.clone()),
                duration_seconds: record.duration_seconds,
                ..MediaCandidate::youtube(record.source_id.clone(), record.title.clone(), 0)
            });
        }

        let query = record.search_query();
        let results = (|| async {
            self.rate_limiter.until_ready().await;
            self.search.search(&query, self.options.search_results).await
        })
        .retry(self.backoff())
        .when(MediaError::is_transient)
        .notify(|error, delay| {
            tracing::warn!("Search for '{}' failed, retrying in {:?}: {}", query, delay, error);
        })
        .await
        .map_err(|error| JobError::Search {
            reason: error.to_string(),
        })?;

        matching::pick_best(record, &results)
            .cloned()
            .ok_or(JobError::NotFound { query })
    }

    async fn fetch_audio(
        &self,
        job: &mut DownloadJob,
        candidate: &MediaCandidate,
        target: &Path,
    ) -> Result<(), JobError> {
        // Dropped on every exit path, taking partial downloads with it.
        let staging = self.output.staging().map_err(|e| JobError::Download {
            reason: format!("could not create staging directory: {e}"),
        })?;

        let name = job.record.display_name();
        job.status = JobStatus::Downloading;
        let downloaded = (|| self.downloader.download_audio(candidate, staging.path()))
            .retry(self.backoff())
            .when(MediaError::is_transient)
            .notify(|error, delay| {
                tracing::warn!("Download of '{}' failed, retrying in {:?}: {}", name, delay, error);
            })
            .await
            .map_err(|error| JobError::Download {
                reason: error.to_string(),
            })?;

        job.status = JobStatus::Converting;
        let converted = staging
            .path()
            .join(format!("converted.{}", self.options.format.extension()));
        self.transcoder
            .transcode(
                &downloaded,
                &converted,
                self.options.format,
                self.options.quality_kbps,
            )
            .await
            .map_err(|error| JobError::Conversion {
                reason: error.to_string(),
            })?;

        self.output
            .commit(&converted, target)
            .await
            .map_err(|e| JobError::Conversion {
                reason: format!("could not move file into place: {e}"),
            })?;

        tracing::debug!("Wrote {}", target.display());
        Ok(())
    }
}
