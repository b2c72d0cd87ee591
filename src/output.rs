use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tempfile::TempDir;

use crate::track::TrackRecord;

/// File systems limit names to 255 bytes. This leaves room for the
/// collision suffix and the extension.
const MAX_STEM_BYTES: usize = 200;
const MAX_SUFFIX_ID_BYTES: usize = 24;
const STAGING_PREFIX: &str = ".music-fetch-";

/// Keep only alphanumerics, spaces, dashes and underscores.
pub fn sanitize_file_name(name: &str) -> String {
    sanitize_with_limit(name, MAX_STEM_BYTES)
}

fn sanitize_with_limit(name: &str, max_bytes: usize) -> String {
    let cleaned = name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let cleaned = truncate_bytes(&cleaned, max_bytes).trim_end();
    if cleaned.is_empty() {
        "untitled".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Longest prefix of `s` that fits in `max_bytes` without splitting a char.
fn truncate_bytes(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Where a job's file goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Free path, to be written by this run.
    New(PathBuf),
    /// The file is already there from an earlier run.
    Existing(PathBuf),
}

impl Target {
    pub fn path(&self) -> &Path {
        match self {
            Self::New(path) | Self::Existing(path) => path,
        }
    }
}

/// The final output directory.
///
/// Target paths are handed out under a lock so that no two jobs of a run end
/// up sharing a path. Work in progress lives in hidden staging directories
/// and only reaches the root through a rename.
#[derive(Debug)]
pub struct OutputDir {
    root: PathBuf,
    extension: String,
    reserved: Mutex<HashSet<PathBuf>>,
}

impl OutputDir {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
            reserved: Mutex::new(HashSet::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_exists(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await
    }

    /// Reserve a target path for `record`.
    ///
    /// Tries "Artist - Title", then adds an "[origin-source_id]" suffix, then
    /// a counter. Only paths already handed out in this run count as taken.
    /// The first free name that already exists on disk is returned as
    /// [`Target::Existing`], so re-running over the same lists resolves every
    /// track to the file the previous run wrote.
    pub fn reserve(&self, record: &TrackRecord) -> Target {
        let base = sanitize_file_name(&record.display_name());
        let suffixed = format!(
            "{base} [{}-{}]",
            record.origin.tag(),
            sanitize_with_limit(&record.source_id, MAX_SUFFIX_ID_BYTES)
        );

        let mut reserved = self.reserved.lock().unwrap_or_else(PoisonError::into_inner);

        let mut attempt = 1usize;
        loop {
            let stem = match attempt {
                1 => base.clone(),
                2 => suffixed.clone(),
                n => format!("{suffixed} ({})", n - 1),
            };
            let path = self.root.join(format!("{stem}.{}", self.extension));
            if !reserved.contains(&path) {
                reserved.insert(path.clone());
                if path.exists() {
                    return Target::Existing(path);
                }
                if attempt > 1 {
                    tracing::info!(
                        "File name for '{}' already taken, using {}",
                        record.display_name(),
                        path.display()
                    );
                }
                return Target::New(path);
            }
            attempt += 1;
        }
    }

    /// Private scratch directory inside the output root, removed on drop.
    pub fn staging(&self) -> io::Result<TempDir> {
        tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&self.root)
    }

    /// Move a finished file into place.
    pub async fn commit(&self, staged: &Path, target: &Path) -> io::Result<()> {
        tokio::fs::rename(staged, target).await
    }
}
