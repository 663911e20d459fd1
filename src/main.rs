//! vidpress command-line transcoder
//!
//! # Usage
//!
//! ```bash
//! vidpress transcode --input clip.mov --policy camera-fix --video-bitrate 2M
//! vidpress transcode --input clip.mov --start 00:05 --duration 10 --width 640 --height 360
//! vidpress inspect --input clip.mov --json
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use vidpress::cli::{commands, Cli, Commands};
use vidpress::config::VidpressConfig;
use vidpress::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = VidpressConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    init_logging(&config.logging);

    info!("Starting vidpress {}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Transcode(args) => {
            info!("Executing transcode command");
            commands::transcode(args, config).await?;
        }
        Commands::Inspect(args) => {
            info!("Executing inspect command");
            tokio::task::spawn_blocking(move || commands::inspect(args))
                .await
                .context("Inspect task failed")??;
        }
    }

    Ok(())
}
