//! Tidecast CLI - Command-line interface
//!
//! Runs the relay server and offers one-off probes of remote sources.

mod commands;

use std::path::PathBuf;

use clap::Parser;
use tidecast_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "tidecast")]
#[command(about = "Streams remote video as browser-ready fragmented MP4")]
#[command(version)]
struct Cli {
    /// Console log level (RUST_LOG takes precedence)
    #[arg(long, global = true, default_value_t = CliLogLevel::Info)]
    log_level: CliLogLevel,

    /// Also write a full trace log into this directory
    #[arg(long, global = true)]
    logs_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.log_level.as_tracing_level(), cli.logs_dir.as_deref())
        .map_err(|e| anyhow::anyhow!("failed to initialise logging: {e}"))?;

    commands::handle_command(cli.command).await
}
