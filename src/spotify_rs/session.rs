use crate::error::SourceError;
use crate::spotify_rs::auth::{self, RefreshTokenError, SpotifyCredentials};
use crate::spotify_rs::token_cache::{CachedToken, TokenCache};
use crate::track::Origin;

/// Return a usable access token from the cache, refreshing it when needed.
///
/// Never prompts: a missing or unusable cache is an auth error telling the
/// user to run the login command.
pub async fn access_token(
    credentials: &SpotifyCredentials,
    cache: &TokenCache,
) -> Result<String, SourceError> {
    let cached = cache
        .load()
        .map_err(|e| SourceError::auth(Origin::Spotify, format!("{e:#}")))?
        .ok_or_else(|| {
            SourceError::auth(
                Origin::Spotify,
                format!(
                    "not logged in (no token at {}), run `spotify login` first",
                    cache.path().display()
                ),
            )
        })?;

    let now = chrono::Utc::now().timestamp();
    if !cached.is_expired(now) {
        return Ok(cached.access_token);
    }

    let Some(refresh_token) = cached.refresh_token.clone() else {
        return Err(SourceError::auth(
            Origin::Spotify,
            "token expired and no refresh token is stored, run `spotify login` again",
        ));
    };

    tracing::debug!("Spotify access token expired, refreshing");
    let response = auth::refresh_access_token(credentials, &refresh_token)
        .await
        .map_err(|e| match e {
            RefreshTokenError::InvalidRefreshToken { .. } => {
                SourceError::auth(Origin::Spotify, format!("{e}, run `spotify login` again"))
            }
            other => SourceError::unavailable(Origin::Spotify, other.to_string()),
        })?;

    let refreshed = CachedToken::from_response(response, Some(refresh_token), now);
    if let Err(e) = cache.save(&refreshed) {
        tracing::warn!("Could not update the Spotify token cache: {e:#}");
    }
    Ok(refreshed.access_token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> SpotifyCredentials {
        SpotifyCredentials {
            client_id: "id".into(),
            client_secret: "secret".into(),
            redirect_uri: "http://localhost:8888/callback".into(),
        }
    }

    #[tokio::test]
    async fn test_missing_cache_is_auth_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TokenCache::new(dir.path().join(".spotify_cache"));

        let err = access_token(&credentials(), &cache).await.unwrap_err();

        assert!(matches!(err, SourceError::Auth { .. }));
        assert!(err.to_string().contains("spotify login"));
    }

    #[tokio::test]
    async fn test_fresh_token_is_used_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TokenCache::new(dir.path().join(".spotify_cache"));
        cache
            .save(&CachedToken {
                access_token: "fresh".into(),
                refresh_token: None,
                expires_at: chrono::Utc::now().timestamp() + 3600,
                scope: None,
            })
            .unwrap();

        assert_eq!(access_token(&credentials(), &cache).await.unwrap(), "fresh");
    }

    #[tokio::test]
    async fn test_expired_token_without_refresh_token() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TokenCache::new(dir.path().join(".spotify_cache"));
        cache
            .save(&CachedToken {
                access_token: "stale".into(),
                refresh_token: None,
                expires_at: 0,
                scope: None,
            })
            .unwrap();

        let err = access_token(&credentials(), &cache).await.unwrap_err();

        assert!(matches!(err, SourceError::Auth { .. }));
    }
}
