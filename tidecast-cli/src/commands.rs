//! CLI command implementations

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use tidecast_core::media::FfprobeProber;
use tidecast_core::transcode::FfmpegEngine;
use tidecast_core::{RelayService, TidecastConfig, TranscodeEngine, TranscodeMode, TranscodeRequest};

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Start the relay server
    Serve {
        /// Host to bind to (overrides TIDECAST_HOST)
        #[arg(long)]
        host: Option<String>,
        /// Port to bind to (overrides TIDECAST_PORT)
        #[arg(short, long)]
        port: Option<u16>,
        /// Size limit for full transcodes in MB, 0 disables the limit
        #[arg(long)]
        max_source_mb: Option<u64>,
        /// ffmpeg binary to use
        #[arg(long)]
        ffmpeg: Option<PathBuf>,
        /// ffprobe binary to use
        #[arg(long)]
        ffprobe: Option<PathBuf>,
    },
    /// Print the media metadata of a remote file as JSON
    Probe {
        /// HTTP(S) URL of the source
        url: String,
    },
    /// Check that ffmpeg and ffprobe can be started
    Check,
}

/// Handle the CLI command
///
/// # Errors
///
/// - `anyhow::Error` - The command failed; the message says which step
pub async fn handle_command(command: Commands) -> Result<()> {
    match command {
        Commands::Serve {
            host,
            port,
            max_source_mb,
            ffmpeg,
            ffprobe,
        } => {
            let mut config = TidecastConfig::from_env();
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(limit) = max_source_mb {
                config.transcode.max_source_mb = (limit > 0).then_some(limit);
            }
            if let Some(path) = ffmpeg {
                config.transcode.ffmpeg_path = path;
            }
            if let Some(path) = ffprobe {
                config.probe.ffprobe_path = path;
            }
            serve(config).await
        }
        Commands::Probe { url } => probe(&url).await,
        Commands::Check => check().await,
    }
}

async fn serve(config: TidecastConfig) -> Result<()> {
    tracing::info!(
        bind = %config.server.bind_address(),
        max_source_mb = ?config.transcode.max_source_mb,
        "Starting relay"
    );
    tidecast_web::run_server(config)
        .await
        .map_err(|e| anyhow::anyhow!("server failed: {e}"))
}

async fn probe(url: &str) -> Result<()> {
    let request = TranscodeRequest::from_query(Some(url), TranscodeMode::InfoOnly)?;
    let service = RelayService::new(TidecastConfig::from_env())?;

    let metadata = service
        .inspect(request)
        .await
        .context("could not read media metadata")?;
    println!("{}", serde_json::to_string_pretty(&metadata)?);
    Ok(())
}

async fn check() -> Result<()> {
    let config = TidecastConfig::from_env();

    let ffmpeg = FfmpegEngine::new(&config.transcode);
    let ffmpeg_ok = ffmpeg.is_available().await;
    let ffprobe_ok = FfprobeProber::new(&config.probe).is_available().await;

    println!(
        "ffmpeg  ({}): {}",
        config.transcode.ffmpeg_path.display(),
        status_label(ffmpeg_ok)
    );
    println!(
        "ffprobe ({}): {}",
        config.probe.ffprobe_path.display(),
        status_label(ffprobe_ok)
    );

    if !(ffmpeg_ok && ffprobe_ok) {
        bail!("required media tools are missing");
    }
    Ok(())
}

fn status_label(ok: bool) -> &'static str {
    if ok { "ok" } else { "not found" }
}
