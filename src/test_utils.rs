use crate::track::{DownloadJob, Origin, TrackRecord};

pub fn track(title: &str, artist: &str, origin: Origin) -> TrackRecord {
    TrackRecord {
        title: title.to_string(),
        artist: artist.to_string(),
        album: None,
        duration_seconds: Some(200),
        source_id: format!("{}-{}", origin.tag(), title.to_lowercase().replace(' ', "_")),
        origin,
    }
}

pub fn jobs(records: Vec<TrackRecord>) -> Vec<DownloadJob> {
    records.into_iter().map(DownloadJob::new).collect()
}

/// Every file below `dir`, recursively, hidden staging directories included.
pub fn all_files(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect()
}
