use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use crate::error::SpotifyApiError;
use crate::ports::spotify::{SpotifyApi, SpotifyApiPlaylist, SpotifyApiTrack};
use crate::spotify_rs::types::{
    SpotifyPage, SpotifyPlaylist, SpotifyPlaylistItem, SpotifySavedTrack, SpotifyTrack,
    SpotifyUser,
};

const SPOTIFY_API_URL: &str = "https://api.spotify.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Spotify API client
pub struct SpotifyClient {
    access_token: String,
    base_url: String,
    client: reqwest::Client,
}

impl SpotifyClient {
    pub fn new(access_token: String) -> Self {
        Self::with_base_url(access_token, SPOTIFY_API_URL)
    }

    pub fn with_base_url(access_token: String, base_url: impl Into<String>) -> Self {
        Self {
            access_token,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, SpotifyApiError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let body = response.text().await.unwrap_or_default();
                return Err(SpotifyApiError::Unauthorized(body));
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok());
                return Err(SpotifyApiError::RateLimited { retry_after });
            }
            _ => {}
        }

        let bytes = response.error_for_status()?.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| SpotifyApiError::Decode(e.to_string()))
    }

    /// Follow `next` links until the listing is exhausted.
    async fn get_all_pages<T: DeserializeOwned>(
        &self,
        first_url: String,
    ) -> Result<Vec<T>, SpotifyApiError> {
        let mut all_items = Vec::new();
        let mut next_url = Some(first_url);

        while let Some(url) = next_url {
            let page: SpotifyPage<T> = self.get_json(&url).await?;
            tracing::trace!(
                "Fetched {} of {:?} items from {}",
                all_items.len() + page.items.len(),
                page.total,
                url
            );
            all_items.extend(page.items);
            next_url = page.next;
        }

        Ok(all_items)
    }

    /// Get the current user's profile
    pub async fn get_current_user(&self) -> Result<SpotifyUser, SpotifyApiError> {
        self.get_json(&format!("{}/me", self.base_url)).await
    }
}

impl From<SpotifyTrack> for SpotifyApiTrack {
    fn from(track: SpotifyTrack) -> Self {
        Self {
            id: track
                .id
                .unwrap_or_else(|| format!("local:{}", track.name)),
            name: track.name,
            duration_ms: track.duration_ms,
            artists: track.artists.into_iter().map(|a| a.name).collect(),
            album_name: track.album.map(|a| a.name),
        }
    }
}

impl From<SpotifyPlaylist> for SpotifyApiPlaylist {
    fn from(playlist: SpotifyPlaylist) -> Self {
        Self {
            id: playlist.id,
            name: playlist.name,
            owner: playlist.owner.and_then(|o| o.display_name),
            total_tracks: playlist.tracks.total,
        }
    }
}

#[async_trait::async_trait]
impl SpotifyApi for SpotifyClient {
    async fn saved_tracks(&self) -> Result<Vec<SpotifyApiTrack>, SpotifyApiError> {
        let items: Vec<SpotifySavedTrack> = self
            .get_all_pages(format!("{}/me/tracks?limit=50", self.base_url))
            .await?;
        Ok(items
            .into_iter()
            .filter_map(|item| item.track)
            .map(SpotifyApiTrack::from)
            .collect())
    }

    async fn playlist_tracks(
        &self,
        playlist_id: &str,
    ) -> Result<Vec<SpotifyApiTrack>, SpotifyApiError> {
        let items: Vec<SpotifyPlaylistItem> = self
            .get_all_pages(format!(
                "{}/playlists/{}/tracks?limit=100",
                self.base_url,
                urlencoding::encode(playlist_id)
            ))
            .await?;
        Ok(items
            .into_iter()
            .filter_map(|item| item.track)
            .map(SpotifyApiTrack::from)
            .collect())
    }

    async fn current_user_playlists(&self) -> Result<Vec<SpotifyApiPlaylist>, SpotifyApiError> {
        let playlists: Vec<SpotifyPlaylist> = self
            .get_all_pages(format!("{}/me/playlists?limit=50", self.base_url))
            .await?;
        Ok(playlists.into_iter().map(SpotifyApiPlaylist::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        Json, Router,
        extract::{Query, State},
        http::{HeaderMap, StatusCode},
        routing::get,
    };
    use serde_json::{Value, json};

    use super::*;

    #[derive(Clone)]
    struct FakeSpotify {
        base: String,
    }

    #[derive(serde::Deserialize)]
    struct PageQuery {
        offset: Option<usize>,
    }

    fn track_json(id: &str, name: &str) -> Value {
        json!({
            "id": id,
            "name": name,
            "duration_ms": 180000,
            "artists": [{"id": "a", "name": "Artist X"}],
            "album": {"id": "al", "name": "Album"}
        })
    }

    async fn saved_tracks(
        State(fake): State<FakeSpotify>,
        headers: HeaderMap,
        Query(query): Query<PageQuery>,
    ) -> Result<Json<Value>, StatusCode> {
        if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer good") {
            return Err(StatusCode::UNAUTHORIZED);
        }
        let page = match query.offset {
            None => json!({
                "items": [{"track": track_json("1", "Song A")}, {"track": track_json("2", "Song B")}],
                "next": format!("{}/me/tracks?limit=50&offset=2", fake.base),
                "total": 3
            }),
            Some(_) => json!({
                "items": [{"track": track_json("3", "Song C")}],
                "next": null,
                "total": 3
            }),
        };
        Ok(Json(page))
    }

    async fn playlist_tracks() -> Json<Value> {
        Json(json!({
            "items": [{"track": null}, {"track": track_json("9", "Song Z")}],
            "next": null
        }))
    }

    async fn rate_limited() -> (StatusCode, [(&'static str, &'static str); 1]) {
        (StatusCode::TOO_MANY_REQUESTS, [("retry-after", "7")])
    }

    async fn serve_fake_spotify() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let app = Router::new()
            .route("/me/tracks", get(saved_tracks))
            .route("/playlists/{id}/tracks", get(playlist_tracks))
            .route("/me/playlists", get(rate_limited))
            .with_state(FakeSpotify { base: base.clone() });
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        base
    }

    #[tokio::test]
    async fn test_saved_tracks_follows_pagination() {
        let base = serve_fake_spotify().await;
        let client = SpotifyClient::with_base_url("good".into(), base);

        let tracks = client.saved_tracks().await.unwrap();

        let names: Vec<&str> = tracks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Song A", "Song B", "Song C"]);
        assert_eq!(tracks[0].artists, vec!["Artist X".to_string()]);
        assert_eq!(tracks[0].album_name.as_deref(), Some("Album"));
    }

    #[tokio::test]
    async fn test_playlist_tracks_skips_null_entries() {
        let base = serve_fake_spotify().await;
        let client = SpotifyClient::with_base_url("good".into(), base);

        let tracks = client.playlist_tracks("abc").await.unwrap();

        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].id, "9");
    }

    #[tokio::test]
    async fn test_bad_token_is_unauthorized() {
        let base = serve_fake_spotify().await;
        let client = SpotifyClient::with_base_url("expired".into(), base);

        let err = client.saved_tracks().await.unwrap_err();

        assert!(matches!(err, SpotifyApiError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_rate_limit_carries_retry_after() {
        let base = serve_fake_spotify().await;
        let client = SpotifyClient::with_base_url("good".into(), base);

        let err = client.current_user_playlists().await.unwrap_err();

        assert!(matches!(
            err,
            SpotifyApiError::RateLimited {
                retry_after: Some(7)
            }
        ));
    }

    #[test]
    fn test_local_track_gets_synthetic_id() {
        let track: SpotifyTrack = serde_json::from_value(json!({
            "id": null, "name": "demo", "is_local": true,
            "artists": [], "album": null, "duration_ms": null
        }))
        .unwrap();
        let api_track = SpotifyApiTrack::from(track);
        assert_eq!(api_track.id, "local:demo");
    }
}
