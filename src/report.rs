use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use color_eyre::{Result, eyre::Context};
use serde::Serialize;

use crate::track::{DownloadJob, JobStatus, MediaCandidate, Origin, RunMode, Summary};

/// One line of the results file.
#[derive(Debug, Serialize)]
struct ReportEntry<'a> {
    title: &'a str,
    artist: &'a str,
    album: Option<&'a str>,
    origin: Origin,
    source_id: &'a str,
    status: JobStatus,
    output_path: Option<&'a Path>,
    error: Option<String>,
    candidate: Option<&'a MediaCandidate>,
}

impl<'a> From<&'a DownloadJob> for ReportEntry<'a> {
    fn from(job: &'a DownloadJob) -> Self {
        Self {
            title: &job.record.title,
            artist: &job.record.artist,
            album: job.record.album.as_deref(),
            origin: job.record.origin,
            source_id: &job.record.source_id,
            status: job.status,
            output_path: job.output_path.as_deref(),
            error: job.error.as_ref().map(|e| e.to_string()),
            candidate: job.candidate.as_ref(),
        }
    }
}

/// Writes the JSON results file at the end of a run.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    path: PathBuf,
}

impl ReportWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Write one entry per job and return the run's summary.
    ///
    /// The file is replaced atomically, a reader never sees a half-written report.
    pub fn write(
        &self,
        jobs: &[DownloadJob],
        mode: RunMode,
        skipped_duplicates: usize,
    ) -> Result<Summary> {
        let entries: Vec<ReportEntry> = jobs.iter().map(ReportEntry::from).collect();

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)
            .wrap_err_with(|| format!("Failed to create report directory {}", dir.display()))?;

        let temp = tempfile::NamedTempFile::new_in(&dir)
            .wrap_err("Failed to create temporary report file")?;
        {
            let mut writer = BufWriter::new(temp.as_file());
            serde_json::to_writer_pretty(&mut writer, &entries)
                .wrap_err("Failed to serialize report")?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        temp.persist(&self.path)
            .wrap_err_with(|| format!("Failed to write report to {}", self.path.display()))?;

        let summary = Summary::from_jobs(jobs, skipped_duplicates);
        tracing::info!(
            "Wrote {} report for {} tracks to {}",
            match mode {
                RunMode::DownloadFiles => "download",
                RunMode::ReportOnly => "dry-run",
            },
            jobs.len(),
            self.path.display()
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobError;
    use crate::test_utils::track;

    fn finished_jobs() -> Vec<DownloadJob> {
        let mut done = DownloadJob::new(track("Song A", "Artist X", Origin::Spotify));
        done.status = JobStatus::Done;
        done.output_path = Some(PathBuf::from("out/Artist X - Song A.mp3"));
        done.candidate = Some(MediaCandidate::youtube("abc", "Artist X - Song A", 0));

        let mut failed = DownloadJob::new(track("Song B", "Artist Y", Origin::YouTubeMusic));
        failed.fail(JobError::NotFound {
            query: "Song B Artist Y".into(),
        });

        vec![done, failed]
    }

    #[test]
    fn test_write_report_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        let writer = ReportWriter::new(&path);

        let summary = writer
            .write(&finished_jobs(), RunMode::DownloadFiles, 3)
            .unwrap();

        assert_eq!(
            summary,
            Summary {
                succeeded: 1,
                failed: 1,
                skipped_duplicates: 3,
                cancelled: 0,
            }
        );

        let report: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let entries = report.as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["title"], "Song A");
        assert_eq!(entries[0]["origin"], "spotify");
        assert_eq!(entries[0]["status"], "done");
        assert_eq!(entries[0]["output_path"], "out/Artist X - Song A.mp3");
        assert_eq!(entries[0]["candidate"]["id"], "abc");
        assert!(entries[0]["error"].is_null());
        assert_eq!(entries[1]["status"], "failed");
        assert_eq!(entries[1]["origin"], "ytmusic");
        assert_eq!(entries[1]["error"], "No match found for \"Song B Artist Y\"");
        assert!(entries[1]["output_path"].is_null());
        assert!(entries[1]["candidate"].is_null());
    }

    #[test]
    fn test_write_replaces_existing_report_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        std::fs::write(&path, "stale").unwrap();

        ReportWriter::new(&path)
            .write(&finished_jobs(), RunMode::ReportOnly, 0)
            .unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("results.json")]);
        assert!(std::fs::read_to_string(&path).unwrap().starts_with('['));
    }

    #[test]
    fn test_write_creates_missing_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join("results.json");

        ReportWriter::new(&path).write(&[], RunMode::ReportOnly, 0).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap().trim(), "[]");
    }
}
