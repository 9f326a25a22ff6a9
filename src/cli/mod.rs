//! CLI module for vtrim
//!
//! This module handles command-line argument parsing and command execution.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod args;
pub mod commands;

/// vtrim video trimmer
///
/// Frame-accurate trimming by rewriting MP4 sample tables, plus crop and
/// re-encode jobs driven through ffmpeg.
#[derive(Parser, Debug)]
#[command(name = "vtrim")]
#[command(about = "vtrim - trim, crop and compress videos")]
#[command(version)]
#[command(long_about = None)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, env = "VTRIM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format (pretty, compact, json)
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    /// Emit job events as JSON lines on stdout
    #[arg(long, global = true)]
    pub json: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Trim without re-encoding by rewriting the container's sample tables
    Trim(args::TrimArgs),
    /// Trim with ffmpeg stream copy
    Cut(args::CutArgs),
    /// Crop the whole video with ffmpeg
    Crop(args::CropArgs),
    /// Trim and crop in one re-encode
    Edit(args::EditArgs),
    /// Scale down and re-encode at a lower bitrate
    Compress(args::CompressArgs),
    /// Show media metadata and track layout
    Inspect(args::InspectArgs),
}
