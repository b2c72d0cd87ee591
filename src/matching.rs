//! Candidate matching for media-search results.
//!
//! Search results come back as free-form video titles ("Artist - Title
//! (Official Video)") plus an uploader/channel name, so both sides are
//! normalized before comparing. Selection is deterministic:
//!
//! 1. candidates whose text score is below [`MIN_TEXT_SCORE`] are dropped,
//! 2. the smallest duration difference wins (unknown durations rank last),
//! 3. then an exact normalized title match,
//! 4. then the original search rank.

use std::collections::HashSet;

use unicode_normalization::UnicodeNormalization;

use crate::track::{MediaCandidate, TrackRecord};

/// Minimum combined title/artist similarity for a candidate to be considered.
pub const MIN_TEXT_SCORE: f64 = 0.70;

const TITLE_WEIGHT: f64 = 0.6;
const ARTIST_WEIGHT: f64 = 0.4;

/// Used when a result carries no artist information at all.
const UNKNOWN_ARTIST_SIMILARITY: f64 = 0.5;

/// Channel decorations added by YouTube that never belong to the artist name.
const CHANNEL_SUFFIXES: &[&str] = &[" - topic", "vevo", " official"];

#[derive(Debug, Clone, PartialEq)]
pub struct CandidateScore {
    pub title_similarity: f64,
    pub artist_similarity: f64,
    /// Weighted title/artist similarity, 0.0 to 1.0
    pub text_score: f64,
    /// Absolute difference in seconds, `None` when either side is unknown
    pub duration_diff: Option<u32>,
    pub exact_title: bool,
    pub rank: usize,
}

impl CandidateScore {
    pub fn is_acceptable(&self) -> bool {
        self.text_score >= MIN_TEXT_SCORE
    }
}

/// Applies: NFKC normalization, lowercase, punctuation removal, whitespace collapse
pub fn normalize_string(s: &str) -> String {
    let normalized: String = s.nfkc().collect();

    normalized
        .to_lowercase()
        .chars()
        .filter(|&c| c != '\'')
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Drop "(...)" and "[...]" segments, e.g. "(Official Video)" or "[HD]".
fn strip_parenthetical(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut depth = 0usize;
    for c in s.chars() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' if depth > 0 => depth -= 1,
            _ if depth == 0 => result.push(c),
            _ => {}
        }
    }
    result.trim().to_string()
}

fn clean_channel(channel: &str) -> String {
    let mut cleaned = channel.to_lowercase();
    for suffix in CHANNEL_SUFFIXES {
        if let Some(stripped) = cleaned.strip_suffix(suffix) {
            cleaned = stripped.to_string();
        }
    }
    normalize_string(&cleaned)
}

/// Token-based similarity, handles word reordering
pub fn token_similarity(s1: &str, s2: &str) -> f64 {
    let tokens1: HashSet<&str> = s1.split_whitespace().collect();
    let tokens2: HashSet<&str> = s2.split_whitespace().collect();

    if tokens1.is_empty() || tokens2.is_empty() {
        return 0.0;
    }

    let intersection = tokens1.intersection(&tokens2).count();
    let union = tokens1.union(&tokens2).count();

    intersection as f64 / union as f64
}

/// Higher of Jaro-Winkler and token similarity, slightly preferring Jaro-Winkler.
/// Both inputs must already be normalized.
pub fn string_similarity(s1: &str, s2: &str) -> f64 {
    if s1.is_empty() || s2.is_empty() {
        return 0.0;
    }
    if s1 == s2 {
        return 1.0;
    }
    let jw = jaro_winkler::jaro_winkler(s1, s2);
    jw.max(token_similarity(s1, s2) * 0.95)
}

/// Score one search result against the wanted track.
pub fn score_candidate(record: &TrackRecord, candidate: &MediaCandidate) -> CandidateScore {
    let wanted_title = normalize_string(&strip_parenthetical(&record.title));
    let wanted_title_exact = normalize_string(&record.title);
    let wanted_artist = normalize_string(&record.artist);

    let stripped = strip_parenthetical(&candidate.title);
    let (artist_in_title, title_part, title_part_exact) = match (
        stripped.split_once(" - "),
        candidate.title.split_once(" - "),
    ) {
        (Some((artist, title)), Some((_, title_exact))) => (
            Some(normalize_string(artist)),
            normalize_string(title),
            normalize_string(title_exact),
        ),
        _ => (
            None,
            normalize_string(&stripped),
            normalize_string(&candidate.title),
        ),
    };
    let full_title = normalize_string(&stripped);

    let title_similarity = string_similarity(&wanted_title, &title_part)
        .max(string_similarity(&wanted_title, &full_title));

    let channel = candidate.channel.as_deref().map(clean_channel);
    let artist_evidence: Vec<&String> = artist_in_title.iter().chain(channel.iter()).collect();
    let artist_similarity = if !wanted_artist.is_empty()
        && format!(" {full_title} ").contains(&format!(" {wanted_artist} "))
    {
        1.0
    } else if artist_evidence.is_empty() {
        UNKNOWN_ARTIST_SIMILARITY
    } else {
        artist_evidence
            .iter()
            .map(|artist| string_similarity(&wanted_artist, artist))
            .fold(0.0_f64, f64::max)
    };

    let duration_diff = match (record.duration_seconds, candidate.duration_seconds) {
        (Some(wanted), Some(found)) => Some(wanted.abs_diff(found)),
        _ => None,
    };

    CandidateScore {
        title_similarity,
        artist_similarity,
        text_score: title_similarity * TITLE_WEIGHT + artist_similarity * ARTIST_WEIGHT,
        duration_diff,
        exact_title: !wanted_title_exact.is_empty() && wanted_title_exact == title_part_exact,
        rank: candidate.rank,
    }
}

/// Pick the best candidate for `record`, or `None` if nothing is close enough.
pub fn pick_best<'a>(
    record: &TrackRecord,
    candidates: &'a [MediaCandidate],
) -> Option<&'a MediaCandidate> {
    let mut scored: Vec<(&MediaCandidate, CandidateScore)> = candidates
        .iter()
        .map(|c| (c, score_candidate(record, c)))
        .collect();

    for (candidate, score) in &scored {
        tracing::debug!(
            "Candidate #{} for '{}': text={:.3} (title={:.3}, artist={:.3}), duration_diff={:?}, exact_title={}, title={}",
            score.rank,
            record.display_name(),
            score.text_score,
            score.title_similarity,
            score.artist_similarity,
            score.duration_diff,
            score.exact_title,
            candidate.title,
        );
    }

    scored.retain(|(_, score)| score.is_acceptable());
    scored.sort_by(|(_, a), (_, b)| {
        a.duration_diff
            .unwrap_or(u32::MAX)
            .cmp(&b.duration_diff.unwrap_or(u32::MAX))
            .then_with(|| b.exact_title.cmp(&a.exact_title))
            .then_with(|| a.rank.cmp(&b.rank))
    });

    scored.into_iter().next().map(|(candidate, _)| candidate)
}
