mod config;
mod coordinator;
mod dedup;
mod error;
mod logging;
mod matching;
mod output;
mod pipeline;
mod ports;
mod report;
mod sources;
mod spotify_rs;
#[cfg(test)]
mod test_utils;
mod tools;
mod track;
mod worker_pool;

use std::io::Read;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::{
    Result,
    eyre::{Context, bail, eyre},
};
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    coordinator::{FetchCoordinator, FetchOptions},
    logging::init_tracing,
    output::OutputDir,
    pipeline::{Pipeline, SourceRequest},
    ports::{source::TrackSource, spotify::SpotifyApi},
    report::ReportWriter,
    sources::{FailedSource, spotify::SpotifySource, youtube_music::YouTubeMusicSource},
    spotify_rs::{
        auth::SpotifyCredentials, client::SpotifyClient, login::login, session,
        token_cache::TokenCache,
    },
    tools::{ffmpeg::Ffmpeg, ytdlp::YtDlp},
    track::{AudioFormat, FetchMode, JobStatus, Origin, RunMode},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The config file to use
    #[arg(short, long, env = "MUSIC_FETCH_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Console log filter, e.g. `info` or `music_fetch=debug`
    #[arg(long, default_value = "info", global = true, env = "LOG_LEVEL")]
    log_level: String,

    /// Also write debug logs to this file
    #[arg(long, env = "MUSIC_FETCH_LOG_FILE", global = true)]
    log_file: Option<PathBuf>,

    /// Export spans to an OTLP collector
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT", global = true)]
    otlp_endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

fn parse_quality(s: &str) -> Result<u32, String> {
    let quality: u32 = s.parse().map_err(|e| format!("`{s}` is not a number: {e}"))?;
    config::validate_quality(quality).map_err(|e| e.to_string())
}

#[derive(clap::Args, Debug)]
struct SpotifyArgs {
    /// Spotify app client id
    #[arg(long, env = "SPOTIFY_CLIENT_ID")]
    spotify_client_id: Option<String>,

    /// Spotify app client secret
    #[arg(long, env = "SPOTIFY_CLIENT_SECRET", hide_env_values = true)]
    spotify_client_secret: Option<String>,

    /// OAuth redirect URI registered for the Spotify app
    #[arg(long, env = "SPOTIFY_REDIRECT_URI")]
    spotify_redirect_uri: Option<String>,
}

impl SpotifyArgs {
    /// Flags and environment win over the config file.
    fn credentials(&self, config: &Config) -> Result<SpotifyCredentials, String> {
        let client_id = self
            .spotify_client_id
            .clone()
            .or_else(|| config.spotify.client_id.clone())
            .ok_or("SPOTIFY_CLIENT_ID is not set")?;
        let client_secret = self
            .spotify_client_secret
            .clone()
            .or_else(|| config.spotify.client_secret.clone())
            .ok_or("SPOTIFY_CLIENT_SECRET is not set")?;
        let redirect_uri = self
            .spotify_redirect_uri
            .clone()
            .unwrap_or_else(|| config.redirect_uri().to_string());
        Ok(SpotifyCredentials {
            client_id,
            client_secret,
            redirect_uri,
        })
    }
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Fetch Spotify liked songs
    #[arg(long)]
    spotify_liked: bool,

    /// Fetch a Spotify playlist (id, URI or URL); repeatable
    #[arg(long = "spotify-playlist", value_name = "PLAYLIST")]
    spotify_playlists: Vec<String>,

    /// Fetch every playlist in the Spotify library
    #[arg(long)]
    spotify_all_playlists: bool,

    /// Fetch YouTube Music liked songs
    #[arg(long)]
    ytmusic_liked: bool,

    /// Fetch a YouTube Music playlist (id or URL); repeatable
    #[arg(long = "ytmusic-playlist", value_name = "PLAYLIST")]
    ytmusic_playlists: Vec<String>,

    /// Only resolve matches and write the report, download nothing
    #[arg(long)]
    report_only: bool,

    /// Directory downloaded songs are written to
    #[arg(short, long, env = "DOWNLOAD_FOLDER")]
    output_directory: Option<PathBuf>,

    /// Output audio format
    #[arg(long, value_enum, env = "AUDIO_FORMAT")]
    format: Option<AudioFormat>,

    /// Bitrate in kbps (128, 192, 256 or 320)
    #[arg(long, env = "AUDIO_QUALITY", value_parser = parse_quality)]
    quality: Option<u32>,

    /// Maximum simultaneous downloads
    #[arg(long, env = "MAX_CONCURRENT_DOWNLOADS")]
    concurrency: Option<usize>,

    /// Where the JSON report is written
    #[arg(long)]
    report_path: Option<PathBuf>,

    #[command(flatten)]
    spotify: SpotifyArgs,
}

impl RunArgs {
    fn wants_spotify(&self) -> bool {
        self.spotify_liked || self.spotify_all_playlists || !self.spotify_playlists.is_empty()
    }

    fn wants_ytmusic(&self) -> bool {
        self.ytmusic_liked || !self.ytmusic_playlists.is_empty()
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch track lists, match them on YouTube and download the audio
    Run(RunArgs),
    /// Spotify account commands
    #[command(subcommand)]
    Spotify(SpotifyCommands),
    /// YouTube Music account commands
    #[command(subcommand, name = "ytmusic")]
    YtMusic(YtMusicCommands),
    /// Config file commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
enum SpotifyCommands {
    /// Authorize this app in the browser and cache the token
    Login {
        #[command(flatten)]
        spotify: SpotifyArgs,
    },
    /// List the playlists in the Spotify library
    Playlists {
        #[command(flatten)]
        spotify: SpotifyArgs,
    },
}

#[derive(Subcommand, Debug)]
enum YtMusicCommands {
    /// Read a `Cookie:` request header from stdin and store it
    SetCookie,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Create a default config file, if it doesn't exist
    CreateDefault,
    /// Print the path to the config file
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;

    let args = Args::parse();
    let tracer_provider = init_tracing(
        env!("CARGO_PKG_NAME"),
        args.otlp_endpoint.as_deref(),
        &args.log_level,
        args.log_file.as_deref(),
    )?;

    tracing::debug!("Loading configuration");
    let config = {
        if let Some(config) = &args.config {
            Config::from_file(config)
        } else {
            Config::load()
        }
    }
    .wrap_err("Failed to load music-fetch config")?;

    let result = match args.command {
        Commands::Run(run_args) => run(run_args, &config).await,
        Commands::Spotify(SpotifyCommands::Login { spotify }) => {
            let credentials = spotify.credentials(&config).map_err(|e| eyre!(e))?;
            login(&credentials, &TokenCache::new(config.token_cache()))
                .await
                .map(|_| ())
        }
        Commands::Spotify(SpotifyCommands::Playlists { spotify }) => {
            list_spotify_playlists(&spotify, &config).await
        }
        Commands::YtMusic(YtMusicCommands::SetCookie) => set_cookie(&config.cookie_file()),
        Commands::Config(config_commands) => match config_commands {
            ConfigCommands::CreateDefault => {
                let path = Config::create_default()?;
                println!("Config file: {}", path.display());
                Ok(())
            }
            ConfigCommands::Path => {
                match Config::config_path() {
                    Some(path) => println!("{}", path.display()),
                    None => println!("No default config path found"),
                }
                Ok(())
            }
        },
    };

    if let Some(provider) = tracer_provider {
        if let Err(e) = provider.shutdown() {
            eprintln!("Failed to flush traces: {e}");
        }
    }

    result
}

async fn run(args: RunArgs, config: &Config) -> Result<()> {
    if !args.wants_spotify() && !args.wants_ytmusic() {
        bail!(
            "Nothing to fetch: pass --spotify-liked, --spotify-playlist, --spotify-all-playlists, \
             --ytmusic-liked or --ytmusic-playlist"
        );
    }

    let format = args.format.unwrap_or_else(|| config.audio_format());
    let quality = match args.quality {
        Some(quality) => quality,
        None => config.audio_quality()?,
    };
    let run_mode = if args.report_only {
        RunMode::ReportOnly
    } else {
        RunMode::DownloadFiles
    };
    let options = FetchOptions {
        run_mode,
        format,
        quality_kbps: quality,
        concurrency: args.concurrency.unwrap_or_else(|| config.concurrency()),
        max_retries: config.max_retries(),
        search_results: config.search_results(),
        searches_per_second: config.searches_per_second(),
        ..FetchOptions::default()
    };

    let ytdlp = YtDlp::locate(config.ytdlp_path().as_deref())?;
    let ffmpeg = Ffmpeg::new(config.ffmpeg_path());
    if run_mode == RunMode::DownloadFiles {
        ffmpeg
            .binary()
            .wrap_err("ffmpeg is needed to convert downloads, use --report-only to skip them")?;
    }

    let output_directory = args
        .output_directory
        .clone()
        .unwrap_or_else(|| config.output_directory());
    let report_path = args
        .report_path
        .clone()
        .unwrap_or_else(|| config.report_path());

    let coordinator = FetchCoordinator::new(
        ytdlp.clone(),
        ytdlp.clone(),
        ffmpeg,
        OutputDir::new(&output_directory, format.extension()),
        options,
    );
    let mut pipeline = Pipeline::new(coordinator, ReportWriter::new(&report_path));
    let mut requests = Vec::new();

    if args.wants_spotify() {
        let (source, playlists) = spotify_source(&args, config).await;
        requests.extend(playlists);
        pipeline = pipeline.with_source(source);
    }
    if args.wants_ytmusic() {
        pipeline = pipeline.with_source(Box::new(YouTubeMusicSource::new(
            ytdlp,
            config.cookie_file(),
        )));
        if args.ytmusic_liked {
            requests.push(SourceRequest {
                origin: Origin::YouTubeMusic,
                mode: FetchMode::LikedSongs,
            });
        }
        requests.extend(args.ytmusic_playlists.iter().map(|playlist| SourceRequest {
            origin: Origin::YouTubeMusic,
            mode: FetchMode::Playlist(playlist.clone()),
        }));
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        let interrupts = futures::stream::unfold((), |()| async {
            tokio::signal::ctrl_c().await.ok().map(|()| ((), ()))
        });
        async move {
            if second_interrupt(Box::pin(interrupts), cancel).await {
                tracing::warn!("Interrupted again, exiting without cleanup");
                std::process::exit(130);
            }
        }
    });

    let outcome = pipeline.run(&requests, cancel).await?;

    for failure in &outcome.source_failures {
        println!(
            "✗ Could not fetch {} {}: {}",
            failure.request.origin, failure.request.mode, failure.error
        );
    }
    for job in outcome
        .jobs
        .iter()
        .filter(|j| j.status == JobStatus::Failed && !j.is_cancelled())
    {
        if let Some(error) = &job.error {
            println!("✗ {}: {}", job.record.display_name(), error);
        }
    }

    let summary = outcome.summary;
    println!();
    match run_mode {
        RunMode::DownloadFiles => println!("Downloaded: {}", summary.succeeded),
        RunMode::ReportOnly => println!("Found: {}", summary.succeeded),
    }
    println!("Failed: {}", summary.failed);
    if summary.cancelled > 0 {
        println!("Cancelled: {}", summary.cancelled);
    }
    println!("Duplicates skipped: {}", summary.skipped_duplicates);
    if run_mode == RunMode::DownloadFiles {
        println!("Songs: {}", output_directory.display());
    }
    println!("Report: {}", report_path.display());
    Ok(())
}

/// Spotify source for this run, and the Spotify requests in priority order.
///
/// Credential and token trouble becomes a failed source instead of aborting,
/// so YouTube Music requests still run.
async fn spotify_source(
    args: &RunArgs,
    config: &Config,
) -> (Box<dyn TrackSource>, Vec<SourceRequest>) {
    let mut requests = Vec::new();
    if args.spotify_liked {
        requests.push(SourceRequest {
            origin: Origin::Spotify,
            mode: FetchMode::LikedSongs,
        });
    }
    requests.extend(args.spotify_playlists.iter().map(|playlist| SourceRequest {
        origin: Origin::Spotify,
        mode: FetchMode::Playlist(playlist.clone()),
    }));

    let token = match args.spotify.credentials(config) {
        Ok(credentials) => {
            session::access_token(&credentials, &TokenCache::new(config.token_cache())).await
        }
        Err(reason) => Err(error::SourceError::auth(Origin::Spotify, reason)),
    };
    let client = match token {
        Ok(token) => SpotifyClient::new(token),
        Err(error) => {
            if args.spotify_all_playlists {
                tracing::error!("Skipping all Spotify playlists: {}", error);
            }
            return (Box::new(FailedSource::new(error)), requests);
        }
    };

    if args.spotify_all_playlists {
        match client.current_user_playlists().await {
            Ok(playlists) => {
                tracing::info!("Found {} Spotify playlists", playlists.len());
                requests.extend(playlists.into_iter().map(|playlist| SourceRequest {
                    origin: Origin::Spotify,
                    mode: FetchMode::Playlist(playlist.id),
                }));
            }
            Err(e) => tracing::error!("Could not list Spotify playlists: {}", e),
        }
    }

    (Box::new(SpotifySource::new(client)), requests)
}

async fn list_spotify_playlists(spotify: &SpotifyArgs, config: &Config) -> Result<()> {
    let credentials = spotify.credentials(config).map_err(|e| eyre!(e))?;
    let token = session::access_token(&credentials, &TokenCache::new(config.token_cache())).await?;
    let playlists = SpotifyClient::new(token)
        .current_user_playlists()
        .await
        .map_err(error::SourceError::from)?;

    if playlists.is_empty() {
        println!("No playlists found");
    }
    for playlist in playlists {
        println!(
            "{}  {:>5} tracks  {}{}",
            playlist.id,
            playlist.total_tracks,
            playlist.name,
            playlist
                .owner
                .map(|owner| format!(" (by {owner})"))
                .unwrap_or_default()
        );
    }
    Ok(())
}

/// Cancels `cancel` on the first interrupt. Returns true once a second one
/// arrives, false if the stream ends before that.
async fn second_interrupt<S>(mut interrupts: S, cancel: CancellationToken) -> bool
where
    S: Stream<Item = ()> + Unpin,
{
    if interrupts.next().await.is_none() {
        return false;
    }
    tracing::warn!(
        "Interrupted, waiting for running jobs to clean up. Press Ctrl-C again to quit immediately"
    );
    cancel.cancel();
    interrupts.next().await.is_some()
}

/// Store the raw header; it is converted to a cookie jar on every fetch.
fn set_cookie(cookie_file: &Path) -> Result<()> {
    println!("Paste the Cookie header from a logged-in music.youtube.com request, then press Ctrl-D:");
    let mut header = String::new();
    std::io::stdin()
        .read_to_string(&mut header)
        .wrap_err("Failed to read cookie header from stdin")?;
    let header = header.trim();
    if header.is_empty() {
        bail!("No cookie header given");
    }

    if let Some(parent) = cookie_file.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .wrap_err_with(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(cookie_file, header)
        .wrap_err_with(|| format!("Failed to write {}", cookie_file.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(cookie_file, std::fs::Permissions::from_mode(0o600))
            .wrap_err_with(|| format!("Failed to restrict {}", cookie_file.display()))?;
    }

    println!("Saved YouTube Music cookie to {}", cookie_file.display());
    Ok(())
}
