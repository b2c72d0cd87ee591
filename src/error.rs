use serde::{Deserialize, Serialize};

use crate::track::Origin;

/// Failure of a whole source adapter. Aborts the run for that source only.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    #[error("{origin} authentication failed: {reason}")]
    Auth { origin: Origin, reason: String },

    #[error("{origin} is unavailable: {reason}")]
    Unavailable { origin: Origin, reason: String },
}

impl SourceError {
    pub fn auth(origin: Origin, reason: impl Into<String>) -> Self {
        Self::Auth {
            origin,
            reason: reason.into(),
        }
    }

    pub fn unavailable(origin: Origin, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            origin,
            reason: reason.into(),
        }
    }

    pub fn origin(&self) -> Origin {
        match self {
            Self::Auth { origin, .. } | Self::Unavailable { origin, .. } => *origin,
        }
    }

    /// Only service/network trouble is worth retrying; bad credentials stay bad.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Errors raised by the external media tools (yt-dlp, ffmpeg).
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("{tool} not found in PATH. Please install it or set its path in the config")]
    ToolMissing { tool: String },

    #[error("{tool} exited with {status}: {stderr}")]
    CommandFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("Rate limited by remote service: {0}")]
    RateLimited(String),

    #[error("Media unavailable: {0}")]
    Unavailable(String),

    #[error("Sign-in required: {0}")]
    SignInRequired(String),

    #[error("Unexpected tool output: {0}")]
    InvalidOutput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    /// Whether repeating the same call has a reasonable chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::CommandFailed { .. } | Self::RateLimited(_) | Self::Io(_)
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SpotifyApiError {
    #[error("Spotify rejected the access token: {0}")]
    Unauthorized(String),

    #[error("Spotify rate limit hit")]
    RateLimited { retry_after: Option<u64> },

    #[error("Spotify request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected response from Spotify: {0}")]
    Decode(String),
}

impl From<SpotifyApiError> for SourceError {
    fn from(error: SpotifyApiError) -> Self {
        match error {
            SpotifyApiError::Unauthorized(reason) => SourceError::auth(Origin::Spotify, reason),
            other => SourceError::unavailable(Origin::Spotify, other.to_string()),
        }
    }
}

/// Per-track failure. Recorded on the job, never propagated past the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobError {
    #[error("No match found for \"{query}\"")]
    NotFound { query: String },

    #[error("Search failed: {reason}")]
    Search { reason: String },

    #[error("Download failed: {reason}")]
    Download { reason: String },

    #[error("Conversion failed: {reason}")]
    Conversion { reason: String },

    #[error("Cancelled")]
    Cancelled,
}
