//! CLI module for vidpress
//!
//! This module handles command-line argument parsing and command execution.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod args;
pub mod commands;
pub mod progress;

pub use args::{InspectArgs, PolicyArg, TranscodeArgs};

/// vidpress video transcoder
///
/// Re-encodes a source video to a bitrate-constrained H.264/AAC container,
/// correcting camera orientation along the way.
#[derive(Parser, Debug)]
#[command(name = "vidpress")]
#[command(about = "vidpress - orientation-aware H.264/AAC transcoding")]
#[command(version)]
#[command(long_about = None)]
pub struct Cli {
    /// Logging level, overrides the config file
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Config file path
    #[arg(long, global = true, env = "VIDPRESS_CONFIG")]
    pub config: Option<PathBuf>,

    /// The command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Transcode a video file
    Transcode(TranscodeArgs),
    /// Inspect video file information
    Inspect(InspectArgs),
}
