use std::collections::HashSet;

use crate::track::TrackRecord;

/// Result of merging several track lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Merged {
    pub tracks: Vec<TrackRecord>,
    pub skipped_duplicates: usize,
}

/// Merge track lists in priority order, keeping the first record for each
/// fingerprint and preserving first-seen order.
///
/// Records with an empty fingerprint (blank artist or title) are always kept:
/// they are too malformed to be safely merged with anything.
pub fn merge<I>(lists: I) -> Merged
where
    I: IntoIterator<Item = Vec<TrackRecord>>,
{
    let mut seen = HashSet::new();
    let mut tracks = Vec::new();
    let mut skipped_duplicates = 0;

    for record in lists.into_iter().flatten() {
        let fingerprint = record.fingerprint();
        if fingerprint.is_empty() || seen.insert(fingerprint) {
            tracks.push(record);
        } else {
            tracing::debug!("Skipping duplicate track: {}", record.display_name());
            skipped_duplicates += 1;
        }
    }

    Merged {
        tracks,
        skipped_duplicates,
    }
}
