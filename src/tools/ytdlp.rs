use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::MediaError;
use crate::ports::media::{MediaDownloader, MediaSearch, PlaylistEntry, PlaylistExtractor};
use crate::tools::process;
use crate::track::MediaCandidate;

const SEARCH_TIMEOUT: Duration = Duration::from_secs(60);
const PLAYLIST_TIMEOUT: Duration = Duration::from_secs(300);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// Placeholder titles yt-dlp reports for entries that can no longer be played.
const DEAD_ENTRY_TITLES: &[&str] = &["[Deleted video]", "[Private video]"];

/// Thin wrapper around the `yt-dlp` binary.
#[derive(Debug, Clone)]
pub struct YtDlp {
    binary: PathBuf,
}

#[derive(Debug, Deserialize)]
struct FlatListing {
    #[serde(default)]
    entries: Vec<FlatEntry>,
}

#[derive(Debug, Deserialize)]
struct FlatEntry {
    id: Option<String>,
    title: Option<String>,
    channel: Option<String>,
    uploader: Option<String>,
    duration: Option<f64>,
}

impl FlatEntry {
    fn duration_seconds(&self) -> Option<u32> {
        self.duration
            .filter(|d| d.is_finite() && *d >= 0.0)
            .map(|d| d.round() as u32)
    }

    fn is_dead(&self) -> bool {
        self.title
            .as_deref()
            .is_some_and(|t| DEAD_ENTRY_TITLES.contains(&t))
    }
}

impl YtDlp {
    pub fn locate(configured: Option<&Path>) -> Result<Self, MediaError> {
        Ok(Self {
            binary: process::locate("yt-dlp", configured)?,
        })
    }

    async fn flat_listing(
        &self,
        target: &str,
        cookie_file: Option<&Path>,
        timeout: Duration,
    ) -> Result<FlatListing, MediaError> {
        let mut args: Vec<String> = vec![
            "--ignore-config".into(),
            "--no-warnings".into(),
            "--flat-playlist".into(),
            "-J".into(),
        ];
        if let Some(cookies) = cookie_file {
            args.push("--cookies".into());
            args.push(cookies.display().to_string());
        }
        args.push(target.to_string());

        let output = process::run(&self.binary, &args, timeout)
            .await
            .map_err(classify)?;

        serde_json::from_slice(&output.stdout)
            .map_err(|e| MediaError::InvalidOutput(format!("yt-dlp JSON: {e}")))
    }
}

/// Turn a failed yt-dlp run into a more specific error based on its stderr.
pub fn classify(error: MediaError) -> MediaError {
    let MediaError::CommandFailed { stderr, .. } = &error else {
        return error;
    };
    let lower = stderr.to_lowercase();

    if lower.contains("http error 429") || lower.contains("too many requests") {
        MediaError::RateLimited(stderr.clone())
    } else if lower.contains("sign in to confirm")
        || lower.contains("use --cookies")
        || lower.contains("cookies are no longer valid")
        || lower.contains("members-only")
        || lower.contains("login required")
    {
        MediaError::SignInRequired(stderr.clone())
    } else if lower.contains("video unavailable")
        || lower.contains("private video")
        || lower.contains("has been removed")
        || lower.contains("does not exist")
        || lower.contains("not available in your country")
    {
        MediaError::Unavailable(stderr.clone())
    } else {
        error
    }
}

#[async_trait::async_trait]
impl MediaSearch for YtDlp {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<MediaCandidate>, MediaError> {
        let target = format!("ytsearch{}:{}", limit.max(1), query);
        let listing = self.flat_listing(&target, None, SEARCH_TIMEOUT).await?;

        let candidates: Vec<MediaCandidate> = listing
            .entries
            .into_iter()
            .filter(|entry| !entry.is_dead())
            .filter_map(|entry| {
                let duration_seconds = entry.duration_seconds();
                let id = entry.id?;
                Some((id, entry.title, entry.channel.or(entry.uploader), duration_seconds))
            })
            .enumerate()
            .map(|(rank, (id, title, channel, duration_seconds))| MediaCandidate {
                channel,
                duration_seconds,
                ..MediaCandidate::youtube(id, title.unwrap_or_default(), rank)
            })
            .collect();

        tracing::debug!("yt-dlp search '{}' returned {} results", query, candidates.len());
        Ok(candidates)
    }
}

#[async_trait::async_trait]
impl PlaylistExtractor for YtDlp {
    async fn extract_playlist(
        &self,
        url: &str,
        cookie_file: &Path,
    ) -> Result<Vec<PlaylistEntry>, MediaError> {
        let listing = self
            .flat_listing(url, Some(cookie_file), PLAYLIST_TIMEOUT)
            .await?;

        let mut entries = Vec::with_capacity(listing.entries.len());
        for entry in listing.entries {
            if entry.is_dead() {
                tracing::debug!("Skipping unavailable playlist entry {:?}", entry.id);
                continue;
            }
            let duration_seconds = entry.duration_seconds();
            let Some(id) = entry.id else {
                continue;
            };
            entries.push(PlaylistEntry {
                id,
                title: entry.title.unwrap_or_default(),
                uploader: entry.channel.or(entry.uploader),
                duration_seconds,
            });
        }
        Ok(entries)
    }
}

#[async_trait::async_trait]
impl MediaDownloader for YtDlp {
    async fn download_audio(
        &self,
        candidate: &MediaCandidate,
        dir: &Path,
    ) -> Result<PathBuf, MediaError> {
        let template = dir.join("%(id)s.%(ext)s");
        let args: Vec<String> = vec![
            "--ignore-config".into(),
            "--no-warnings".into(),
            "--no-progress".into(),
            "--no-playlist".into(),
            "-f".into(),
            "bestaudio/best".into(),
            "-o".into(),
            template.display().to_string(),
            candidate.url.clone(),
        ];

        process::run(&self.binary, &args, DOWNLOAD_TIMEOUT)
            .await
            .map_err(classify)?;

        find_download(dir, &candidate.id).await
    }
}

/// The staging directory is private to one job, so the downloaded file is
/// whatever complete file carries the video id.
async fn find_download(dir: &Path, id: &str) -> Result<PathBuf, MediaError> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_partial = path
            .extension()
            .is_some_and(|ext| ext == "part" || ext == "ytdl");
        let matches_id = path
            .file_stem()
            .is_some_and(|stem| stem.to_string_lossy() == id);
        if matches_id && !is_partial && entry.file_type().await?.is_file() {
            return Ok(path);
        }
    }
    Err(MediaError::InvalidOutput(format!(
        "yt-dlp finished but no file for {id} was written"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(stderr: &str) -> MediaError {
        MediaError::CommandFailed {
            tool: "yt-dlp".into(),
            status: "exit status: 1".into(),
            stderr: stderr.into(),
        }
    }

    #[test]
    fn test_classify_stderr() {
        assert!(matches!(
            classify(failed("ERROR: unable to download webpage: HTTP Error 429: Too Many Requests")),
            MediaError::RateLimited(_)
        ));
        assert!(matches!(
            classify(failed("ERROR: [youtube] abc: Sign in to confirm you're not a bot")),
            MediaError::SignInRequired(_)
        ));
        assert!(matches!(
            classify(failed("ERROR: [youtube] abc: Video unavailable")),
            MediaError::Unavailable(_)
        ));
        assert!(matches!(
            classify(failed("ERROR: connection reset by peer")),
            MediaError::CommandFailed { .. }
        ));
        assert!(matches!(
            classify(MediaError::ToolMissing { tool: "yt-dlp".into() }),
            MediaError::ToolMissing { .. }
        ));
    }

    #[test]
    fn test_parse_flat_search_listing() {
        let json = r#"{
            "_type": "playlist",
            "entries": [
                {"id": "aaa", "title": "Artist X - Song A", "channel": "Artist X", "duration": 201.0},
                {"id": "bbb", "title": "[Private video]", "duration": null},
                {"id": "ccc", "title": "Song A", "uploader": "Artist X - Topic", "duration": 199.6}
            ]
        }"#;
        let listing: FlatListing = serde_json::from_str(json).unwrap();
        assert_eq!(listing.entries.len(), 3);
        assert!(listing.entries[1].is_dead());
        assert_eq!(listing.entries[0].duration_seconds(), Some(201));
        assert_eq!(listing.entries[2].duration_seconds(), Some(200));
    }

    #[test]
    fn test_listing_without_entries() {
        let listing: FlatListing = serde_json::from_str(r#"{"_type": "playlist"}"#).unwrap();
        assert!(listing.entries.is_empty());
    }

    #[tokio::test]
    async fn test_find_download_ignores_partial_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("abc.webm.part"), b"partial").unwrap();
        std::fs::write(dir.path().join("other.webm"), b"other").unwrap();
        assert!(find_download(dir.path(), "abc").await.is_err());

        std::fs::write(dir.path().join("abc.webm"), b"done").unwrap();
        assert_eq!(
            find_download(dir.path(), "abc").await.unwrap(),
            dir.path().join("abc.webm")
        );
    }
}
