use std::io::Write;
use std::path::{Path, PathBuf};

use color_eyre::{Result, eyre::Context};
use serde::{Deserialize, Serialize};

use crate::spotify_rs::types::SpotifyTokenResponse;

/// Refresh this many seconds before Spotify says the token expires.
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Unix timestamp, seconds
    pub expires_at: i64,
    pub scope: Option<String>,
}

impl CachedToken {
    /// Build a cache entry from a token response received at `now`.
    ///
    /// Refresh responses often omit the refresh token, in which case the
    /// previous one stays valid.
    pub fn from_response(
        response: SpotifyTokenResponse,
        previous_refresh_token: Option<String>,
        now: i64,
    ) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or(previous_refresh_token),
            expires_at: now + response.expires_in as i64,
            scope: response.scope,
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now + EXPIRY_MARGIN_SECS >= self.expires_at
    }
}

/// JSON file holding the last Spotify token.
#[derive(Debug, Clone)]
pub struct TokenCache {
    path: PathBuf,
}

impl TokenCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` if nobody has logged in yet.
    pub fn load(&self) -> Result<Option<CachedToken>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path)
            .wrap_err_with(|| format!("Failed to read token cache {}", self.path.display()))?;
        let token = serde_json::from_str(&contents)
            .wrap_err_with(|| format!("Token cache {} is corrupt", self.path.display()))?;
        Ok(Some(token))
    }

    pub fn save(&self, token: &CachedToken) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        // NamedTempFile is created with 0600 permissions on unix.
        let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
        temp.write_all(serde_json::to_string_pretty(token)?.as_bytes())?;
        temp.persist(&self.path)
            .wrap_err_with(|| format!("Failed to write token cache {}", self.path.display()))?;

        tracing::debug!("Saved Spotify token to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(refresh_token: Option<&str>) -> SpotifyTokenResponse {
        SpotifyTokenResponse {
            access_token: "access".into(),
            token_type: "Bearer".into(),
            expires_in: 3600,
            refresh_token: refresh_token.map(String::from),
            scope: Some("user-library-read".into()),
        }
    }

    #[test]
    fn test_from_response_keeps_previous_refresh_token() {
        let token = CachedToken::from_response(response(None), Some("old".into()), 1_000);
        assert_eq!(token.refresh_token.as_deref(), Some("old"));
        assert_eq!(token.expires_at, 4_600);

        let token = CachedToken::from_response(response(Some("new")), Some("old".into()), 1_000);
        assert_eq!(token.refresh_token.as_deref(), Some("new"));
    }

    #[test]
    fn test_expiry_margin() {
        let token = CachedToken::from_response(response(None), None, 0);
        assert!(!token.is_expired(0));
        assert!(!token.is_expired(3_539));
        assert!(token.is_expired(3_540));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TokenCache::new(dir.path().join(".spotify_cache"));
        assert_eq!(cache.load().unwrap(), None);

        let token = CachedToken::from_response(response(Some("refresh")), None, 10);
        cache.save(&token).unwrap();

        assert_eq!(cache.load().unwrap(), Some(token));
    }

    #[test]
    fn test_corrupt_cache_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".spotify_cache");
        std::fs::write(&path, "not json").unwrap();

        assert!(TokenCache::new(path).load().is_err());
    }
}
