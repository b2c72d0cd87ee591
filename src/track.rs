use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::JobError;

/// Service a track list was fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    #[serde(rename = "spotify")]
    Spotify,
    #[serde(rename = "ytmusic")]
    YouTubeMusic,
}

impl Origin {
    /// Short tag used in file name suffixes.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Spotify => "spotify",
            Self::YouTubeMusic => "ytmusic",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spotify => write!(f, "Spotify"),
            Self::YouTubeMusic => write!(f, "YouTube Music"),
        }
    }
}

/// A track as fetched from a source. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub duration_seconds: Option<u32>,
    /// Opaque identifier from the origin service.
    pub source_id: String,
    pub origin: Origin,
}

impl TrackRecord {
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.artist, &self.title)
    }

    /// "Artist - Title", the display name used in logs and file names.
    pub fn display_name(&self) -> String {
        format!("{} - {}", self.artist, self.title)
    }

    /// Free-text query for the media index.
    pub fn search_query(&self) -> String {
        format!("{} {}", self.title, self.artist)
    }
}

/// Deduplication key: lower-cased, whitespace-collapsed artist and title,
/// kept apart by a unit separator so "A B" / "C" never equals "A" / "B C".
///
/// Empty when either part is blank; empty fingerprints never match anything.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(artist: &str, title: &str) -> Self {
        let artist = collapse(artist);
        let title = collapse(title);
        if artist.is_empty() || title.is_empty() {
            return Self(String::new());
        }
        Self(format!("{artist}{FIELD_SEPARATOR}{title}"))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

const FIELD_SEPARATOR: char = '\u{1f}';

/// Control characters are dropped so the separator can't come from the data.
fn collapse(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// What to fetch from a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchMode {
    LikedSongs,
    /// Playlist id (Spotify) or playlist URL / list id (YouTube Music).
    Playlist(String),
}

impl fmt::Display for FetchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LikedSongs => write!(f, "liked songs"),
            Self::Playlist(id) => write!(f, "playlist {id}"),
        }
    }
}

/// Whether the run downloads audio or only writes the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    DownloadFiles,
    ReportOnly,
}

/// Target audio container/codec.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Mp3,
    M4a,
    Opus,
    Wav,
}

impl AudioFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::M4a => "m4a",
            Self::Opus => "opus",
            Self::Wav => "wav",
        }
    }

    /// ffmpeg audio encoder for this format.
    pub fn codec(&self) -> &'static str {
        match self {
            Self::Mp3 => "libmp3lame",
            Self::M4a => "aac",
            Self::Opus => "libopus",
            Self::Wav => "pcm_s16le",
        }
    }

    /// Lossless formats ignore the bitrate setting.
    pub fn uses_bitrate(&self) -> bool {
        !matches!(self, Self::Wav)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// A media-index search result chosen for a track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaCandidate {
    pub id: String,
    pub title: String,
    pub channel: Option<String>,
    pub duration_seconds: Option<u32>,
    pub url: String,
    /// 0-based position in the search results.
    pub rank: usize,
}

impl MediaCandidate {
    pub fn youtube(id: impl Into<String>, title: impl Into<String>, rank: usize) -> Self {
        let id = id.into();
        Self {
            url: format!("https://www.youtube.com/watch?v={id}"),
            id,
            title: title.into(),
            channel: None,
            duration_seconds: None,
            rank,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Searching,
    Downloading,
    Converting,
    Done,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Unit of work for one unique track. Only the fetch coordinator mutates it.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub record: TrackRecord,
    pub status: JobStatus,
    pub error: Option<JobError>,
    pub output_path: Option<PathBuf>,
    pub candidate: Option<MediaCandidate>,
}

impl DownloadJob {
    pub fn new(record: TrackRecord) -> Self {
        Self {
            record,
            status: JobStatus::Pending,
            error: None,
            output_path: None,
            candidate: None,
        }
    }

    pub fn fail(&mut self, error: JobError) {
        self.status = JobStatus::Failed;
        self.error = Some(error);
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.error, Some(JobError::Cancelled))
    }
}

/// Final counts of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub succeeded: usize,
    /// Includes cancelled jobs.
    pub failed: usize,
    pub skipped_duplicates: usize,
    /// Jobs ended by cancellation, whether they were still queued or were
    /// interrupted mid-download. Also counted in `failed`.
    pub cancelled: usize,
}

impl Summary {
    pub fn from_jobs(jobs: &[DownloadJob], skipped_duplicates: usize) -> Self {
        let mut summary = Self {
            skipped_duplicates,
            ..Self::default()
        };
        for job in jobs {
            match job.status {
                JobStatus::Done => summary.succeeded += 1,
                _ => {
                    summary.failed += 1;
                    if job.is_cancelled() {
                        summary.cancelled += 1;
                    }
                }
            }
        }
        summary
    }
}
