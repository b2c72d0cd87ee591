use std::path::{Path, PathBuf};

use color_eyre::{
    Result,
    eyre::{Context, bail, eyre},
};
use serde::{Deserialize, Serialize};

use crate::track::AudioFormat;

pub const DEFAULT_OUTPUT_DIRECTORY: &str = "downloaded_songs";
pub const DEFAULT_REPORT_PATH: &str = "spotify_ytmusic_results.json";
pub const DEFAULT_AUDIO_QUALITY: u32 = 320;
pub const AUDIO_QUALITIES: &[u32] = &[128, 192, 256, 320];
pub const DEFAULT_CONCURRENCY: usize = 3;
pub const DEFAULT_MAX_RETRIES: usize = 2;
pub const DEFAULT_SEARCH_RESULTS: usize = 5;
pub const DEFAULT_SEARCHES_PER_SECOND: u32 = 2;
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8888/callback";
pub const DEFAULT_TOKEN_CACHE: &str = ".spotify_cache";
pub const DEFAULT_COOKIE_FILE: &str = "ytmusic_cookie.txt";

const DEFAULT_CONFIG: &str = r#"# music-fetch configuration. Every key is optional.

output_directory = "downloaded_songs"
audio_format = "mp3"          # mp3, m4a, opus or wav
audio_quality = 320           # kbps: 128, 192, 256 or 320
concurrency = 3               # parallel downloads, 1 to 16
max_retries = 2
search_results = 5
searches_per_second = 2
report_path = "spotify_ytmusic_results.json"
# ytdlp_path = "/usr/local/bin/yt-dlp"
# ffmpeg_path = "/usr/bin/ffmpeg"

[spotify]
# client_id = ""
# client_secret = ""
redirect_uri = "http://localhost:8888/callback"
token_cache = ".spotify_cache"

[youtube_music]
cookie_file = "ytmusic_cookie.txt"
"#;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub output_directory: Option<String>,
    pub audio_format: Option<AudioFormat>,
    pub audio_quality: Option<u32>,
    pub concurrency: Option<usize>,
    pub max_retries: Option<usize>,
    pub search_results: Option<usize>,
    pub searches_per_second: Option<u32>,
    pub report_path: Option<String>,
    pub ytdlp_path: Option<String>,
    pub ffmpeg_path: Option<String>,
    pub spotify: SpotifyConfig,
    pub youtube_music: YouTubeMusicConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpotifyConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: Option<String>,
    pub token_cache: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct YouTubeMusicConfig {
    pub cookie_file: Option<String>,
}

/// Expand ~ to home directory
fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

pub fn validate_quality(quality: u32) -> Result<u32> {
    if AUDIO_QUALITIES.contains(&quality) {
        Ok(quality)
    } else {
        bail!("Unsupported audio quality {quality} kbps, expected one of {AUDIO_QUALITIES:?}")
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .wrap_err_with(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|path| path.join("music-fetch").join("config.toml"))
    }

    /// Load the default config file, or built-in defaults if there is none.
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => {
                tracing::debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Write a commented default config file, if it doesn't exist
    pub fn create_default() -> Result<PathBuf> {
        let path = Self::config_path().ok_or(eyre!("Could not determine config directory"))?;
        Self::create_default_at(&path)?;
        Ok(path)
    }

    fn create_default_at(path: &Path) -> Result<()> {
        if path.exists() {
            tracing::info!("Config already exists at {}", path.display());
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .wrap_err_with(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, DEFAULT_CONFIG)
            .wrap_err_with(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn output_directory(&self) -> PathBuf {
        expand_path(
            self.output_directory
                .as_deref()
                .unwrap_or(DEFAULT_OUTPUT_DIRECTORY),
        )
    }

    pub fn report_path(&self) -> PathBuf {
        expand_path(self.report_path.as_deref().unwrap_or(DEFAULT_REPORT_PATH))
    }

    pub fn audio_format(&self) -> AudioFormat {
        self.audio_format.unwrap_or_default()
    }

    pub fn audio_quality(&self) -> Result<u32> {
        validate_quality(self.audio_quality.unwrap_or(DEFAULT_AUDIO_QUALITY))
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency.unwrap_or(DEFAULT_CONCURRENCY)
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES)
    }

    pub fn search_results(&self) -> usize {
        self.search_results.unwrap_or(DEFAULT_SEARCH_RESULTS).max(1)
    }

    pub fn searches_per_second(&self) -> u32 {
        self.searches_per_second
            .unwrap_or(DEFAULT_SEARCHES_PER_SECOND)
            .max(1)
    }

    pub fn ytdlp_path(&self) -> Option<PathBuf> {
        self.ytdlp_path.as_deref().map(expand_path)
    }

    pub fn ffmpeg_path(&self) -> Option<PathBuf> {
        self.ffmpeg_path.as_deref().map(expand_path)
    }

    pub fn redirect_uri(&self) -> &str {
        self.spotify
            .redirect_uri
            .as_deref()
            .unwrap_or(DEFAULT_REDIRECT_URI)
    }

    pub fn token_cache(&self) -> PathBuf {
        expand_path(
            self.spotify
                .token_cache
                .as_deref()
                .unwrap_or(DEFAULT_TOKEN_CACHE),
        )
    }

    pub fn cookie_file(&self) -> PathBuf {
        expand_path(
            self.youtube_music
                .cookie_file
                .as_deref()
                .unwrap_or(DEFAULT_COOKIE_FILE),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_template_parses_to_defaults() {
        let config: Config = toml::from_str(DEFAULT_CONFIG).unwrap();

        assert_eq!(config.output_directory(), PathBuf::from(DEFAULT_OUTPUT_DIRECTORY));
        assert_eq!(config.audio_format(), AudioFormat::Mp3);
        assert_eq!(config.audio_quality().unwrap(), 320);
        assert_eq!(config.concurrency(), 3);
        assert_eq!(config.max_retries(), 2);
        assert_eq!(config.report_path(), PathBuf::from(DEFAULT_REPORT_PATH));
        assert_eq!(config.redirect_uri(), DEFAULT_REDIRECT_URI);
        assert_eq!(config.cookie_file(), PathBuf::from(DEFAULT_COOKIE_FILE));
        assert!(config.spotify.client_id.is_none());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.search_results(), DEFAULT_SEARCH_RESULTS);
        assert_eq!(config.searches_per_second(), DEFAULT_SEARCHES_PER_SECOND);
        assert_eq!(config.token_cache(), PathBuf::from(DEFAULT_TOKEN_CACHE));
        assert!(config.ytdlp_path().is_none());
    }

    #[test]
    fn test_parse_custom_values() {
        let config: Config = toml::from_str(
            r#"
            audio_format = "opus"
            audio_quality = 192
            concurrency = 8

            [spotify]
            client_id = "abc"
            "#,
        )
        .unwrap();

        assert_eq!(config.audio_format(), AudioFormat::Opus);
        assert_eq!(config.audio_quality().unwrap(), 192);
        assert_eq!(config.concurrency(), 8);
        assert_eq!(config.spotify.client_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(toml::from_str::<Config>("download_folder = \"x\"").is_err());
    }

    #[test]
    fn test_invalid_quality() {
        let config = Config {
            audio_quality: Some(100),
            ..Config::default()
        };
        assert!(config.audio_quality().is_err());
    }

    #[test]
    fn test_expand_path() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_path("~/Music"), home.join("Music"));
        }
        assert_eq!(expand_path("/tmp/music"), PathBuf::from("/tmp/music"));
    }

    #[test]
    fn test_create_default_at_does_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("music-fetch").join("config.toml");

        Config::create_default_at(&path).unwrap();
        assert!(Config::from_file(&path).is_ok());

        std::fs::write(&path, "concurrency = 5\n").unwrap();
        Config::create_default_at(&path).unwrap();
        assert_eq!(Config::from_file(&path).unwrap().concurrency(), 5);
    }
}
