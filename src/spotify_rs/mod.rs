//! Minimal Spotify Web API client: OAuth, token cache and the read-only
//! library endpoints.

pub mod auth;
pub mod client;
pub mod login;
pub mod session;
pub mod token_cache;
pub mod types;
