//! Interactive Spotify login: authorization-code flow with a one-shot local
//! callback listener.

use std::time::Duration;

use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::Html,
    routing::get,
};
use color_eyre::{
    Result,
    eyre::{Context, bail, eyre},
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::spotify_rs::auth::{self, SpotifyCredentials};
use crate::spotify_rs::client::SpotifyClient;
use crate::spotify_rs::token_cache::{CachedToken, TokenCache};

const LOGIN_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

#[derive(Clone)]
struct CallbackState {
    expected_state: String,
    result_tx: mpsc::Sender<Result<String, String>>,
}

const REJECTED_PAGE: Html<&str> =
    Html("<h1>Login failed</h1><p>Check the terminal for details.</p>");

/// Pull the authorization code out of a redirect whose state already matched.
fn validate_callback(params: &CallbackParams) -> Result<String, String> {
    if let Some(error) = &params.error {
        return Err(format!("Spotify returned an error: {error}"));
    }
    match &params.code {
        Some(code) if !code.is_empty() => Ok(code.clone()),
        _ => Err("callback did not include an authorization code".to_string()),
    }
}

async fn callback(
    State(state): State<CallbackState>,
    Query(params): Query<CallbackParams>,
) -> (StatusCode, Html<&'static str>) {
    // Not from the login we started; keep waiting for the real redirect.
    if params.state.as_deref() != Some(state.expected_state.as_str()) {
        tracing::warn!("Ignoring login callback with an unexpected state");
        return (StatusCode::BAD_REQUEST, REJECTED_PAGE);
    }

    let result = validate_callback(&params);
    let response = match &result {
        Ok(_) => (
            StatusCode::OK,
            Html("<h1>Logged in</h1><p>You can close this tab and return to the terminal.</p>"),
        ),
        Err(_) => (StatusCode::BAD_REQUEST, REJECTED_PAGE),
    };
    if state.result_tx.try_send(result).is_err() {
        tracing::debug!("Ignoring extra callback request");
    }
    response
}

/// Host:port to listen on and the callback path, taken from the redirect URI.
fn callback_address(redirect_uri: &str) -> Result<(String, String)> {
    let url = url::Url::parse(redirect_uri)
        .wrap_err_with(|| format!("Invalid redirect URI: {redirect_uri}"))?;
    if url.scheme() != "http" {
        bail!("Redirect URI must be a plain http://localhost URL to receive the login callback");
    }
    let host = match url.host_str() {
        Some("localhost") | None => "127.0.0.1",
        Some(host) => host,
    };
    let port = url
        .port_or_known_default()
        .ok_or_else(|| eyre!("Redirect URI has no port: {redirect_uri}"))?;
    Ok((format!("{host}:{port}"), url.path().to_string()))
}

/// Serve `path` on `listener` until a callback carrying `expected_state`
/// arrives or `timeout` passes. Callbacks with any other state are answered
/// with 400 and otherwise ignored.
pub async fn wait_for_callback(
    listener: TcpListener,
    path: &str,
    expected_state: &str,
    timeout: Duration,
) -> Result<String> {
    let (result_tx, mut result_rx) = mpsc::channel(1);
    let shutdown = CancellationToken::new();

    let app = Router::new().route(path, get(callback)).with_state(CallbackState {
        expected_state: expected_state.to_string(),
        result_tx,
    });
    let signal = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .await
    });

    let received = tokio::time::timeout(timeout, result_rx.recv()).await;
    shutdown.cancel();
    if tokio::time::timeout(Duration::from_secs(2), server).await.is_err() {
        tracing::debug!("Callback server did not shut down in time");
    }

    match received {
        Err(_) => bail!("Timed out waiting for the Spotify login redirect"),
        Ok(None) => bail!("Callback server stopped before Spotify redirected back"),
        Ok(Some(Err(reason))) => bail!("Spotify login failed: {reason}"),
        Ok(Some(Ok(code))) => Ok(code),
    }
}

/// Run the full login flow and store the resulting token in `cache`.
pub async fn login(credentials: &SpotifyCredentials, cache: &TokenCache) -> Result<CachedToken> {
    let (address, path) = callback_address(&credentials.redirect_uri)?;
    let listener = TcpListener::bind(&address)
        .await
        .wrap_err_with(|| format!("Failed to listen for the login callback on {address}"))?;

    let (auth_response, session) =
        auth::initiate_oauth(&credentials.client_id, &credentials.redirect_uri);
    println!(
        "Open this URL in your browser to log in to Spotify:\n\n  {}\n",
        auth_response.auth_url
    );
    tracing::info!("Waiting for Spotify redirect on http://{}{}", address, path);

    let code = wait_for_callback(listener, &path, &session.state, LOGIN_TIMEOUT).await?;
    let response = auth::exchange_code_for_token(credentials, &code, &session.code_verifier)
        .await
        .wrap_err("Failed to exchange the authorization code")?;

    let token = CachedToken::from_response(response, None, chrono::Utc::now().timestamp());
    cache.save(&token)?;

    match SpotifyClient::new(token.access_token.clone())
        .get_current_user()
        .await
    {
        Ok(user) => tracing::info!(
            "Logged in to Spotify as {}",
            user.display_name.unwrap_or(user.id)
        ),
        Err(e) => tracing::warn!("Logged in, but fetching the profile failed: {}", e),
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(code: Option<&str>, state: Option<&str>, error: Option<&str>) -> CallbackParams {
        CallbackParams {
            code: code.map(String::from),
            state: state.map(String::from),
            error: error.map(String::from),
        }
    }

    #[test]
    fn test_validate_callback() {
        assert_eq!(
            validate_callback(&params(Some("abc"), Some("s1"), None)),
            Ok("abc".to_string())
        );
        assert!(validate_callback(&params(None, Some("s1"), Some("access_denied"))).is_err());
        assert!(validate_callback(&params(None, Some("s1"), None)).is_err());
        assert!(validate_callback(&params(Some(""), Some("s1"), None)).is_err());
    }

    #[test]
    fn test_callback_address() {
        assert_eq!(
            callback_address("http://localhost:8888/callback").unwrap(),
            ("127.0.0.1:8888".to_string(), "/callback".to_string())
        );
        assert_eq!(
            callback_address("http://127.0.0.1/cb").unwrap(),
            ("127.0.0.1:80".to_string(), "/cb".to_string())
        );
        assert!(callback_address("https://example.com/callback").is_err());
        assert!(callback_address("not a url").is_err());
    }

    #[tokio::test]
    async fn test_wait_for_callback_returns_code() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let waiter = tokio::spawn(async move {
            wait_for_callback(listener, "/callback", "s1", Duration::from_secs(5)).await
        });
        let response = reqwest::get(format!("http://{address}/callback?code=abc&state=s1"))
            .await
            .unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(waiter.await.unwrap().unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_wait_for_callback_ignores_wrong_state() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let waiter = tokio::spawn(async move {
            wait_for_callback(listener, "/callback", "s1", Duration::from_secs(5)).await
        });
        let forged = reqwest::get(format!("http://{address}/callback?code=evil&state=other"))
            .await
            .unwrap();
        let forged_error = reqwest::get(format!("http://{address}/callback?error=access_denied"))
            .await
            .unwrap();
        assert!(!waiter.is_finished());
        let real = reqwest::get(format!("http://{address}/callback?code=abc&state=s1"))
            .await
            .unwrap();

        assert_eq!(forged.status(), reqwest::StatusCode::BAD_REQUEST);
        assert_eq!(forged_error.status(), reqwest::StatusCode::BAD_REQUEST);
        assert_eq!(real.status(), reqwest::StatusCode::OK);
        assert_eq!(waiter.await.unwrap().unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_wait_for_callback_fails_on_spotify_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let waiter = tokio::spawn(async move {
            wait_for_callback(listener, "/callback", "s1", Duration::from_secs(5)).await
        });
        let response =
            reqwest::get(format!("http://{address}/callback?error=access_denied&state=s1"))
                .await
                .unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        assert!(waiter.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_wait_for_callback_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let result =
            wait_for_callback(listener, "/callback", "s1", Duration::from_millis(50)).await;

        assert!(result.is_err());
    }
}
