//! Command-line argument definitions

use std::path::PathBuf;

use clap::Args;

use crate::domain::model::{CropRect, Dimensions, VideoQuality};

/// Source and time range shared by the trimming commands
#[derive(Args, Debug, Clone)]
pub struct RangeArgs {
    /// Input video file path
    #[arg(short, long)]
    pub input: PathBuf,

    /// Start time (HH:MM:SS.ms, MM:SS.ms, or seconds)
    #[arg(short, long)]
    pub start: String,

    /// End time (HH:MM:SS.ms, MM:SS.ms, or seconds)
    #[arg(short, long)]
    pub end: String,

    /// Shortest selection; shorter ranges are widened (default from config)
    #[arg(long)]
    pub min_selection_ms: Option<u64>,
}

/// Crop rectangle and the space it was drawn in
#[derive(Args, Debug, Clone)]
pub struct CropSpec {
    /// Crop rectangle as X,Y,W,H
    #[arg(long)]
    pub rect: CropRect,

    /// Size of the surface the rectangle was drawn on, as WxH.
    /// Without it the rectangle is taken as source pixels
    #[arg(long)]
    pub surface: Option<Dimensions>,
}

/// Arguments for the trim command
#[derive(Args, Debug)]
pub struct TrimArgs {
    #[command(flatten)]
    pub range: RangeArgs,

    /// Output directory (default from config)
    #[arg(short = 'd', long)]
    pub dest: Option<PathBuf>,

    /// Job identifier used for cancellation and log correlation
    #[arg(long, default_value = "trim")]
    pub job_id: String,
}

/// Arguments for the cut command
#[derive(Args, Debug)]
pub struct CutArgs {
    #[command(flatten)]
    pub range: RangeArgs,

    /// Output directory (default from config)
    #[arg(short = 'd', long)]
    pub dest: Option<PathBuf>,
}

/// Arguments for the crop command
#[derive(Args, Debug)]
pub struct CropArgs {
    /// Input video file path
    #[arg(short, long)]
    pub input: PathBuf,

    #[command(flatten)]
    pub crop: CropSpec,

    /// Output directory (default from config)
    #[arg(short = 'd', long)]
    pub dest: Option<PathBuf>,
}

/// Arguments for the edit command
#[derive(Args, Debug)]
pub struct EditArgs {
    #[command(flatten)]
    pub range: RangeArgs,

    #[command(flatten)]
    pub crop: CropSpec,

    /// Re-encode quality (low, medium, high, very-high; default from config)
    #[arg(short, long)]
    pub quality: Option<VideoQuality>,

    /// Output directory (default from config)
    #[arg(short = 'd', long)]
    pub dest: Option<PathBuf>,
}

/// Arguments for the compress command
#[derive(Args, Debug)]
pub struct CompressArgs {
    /// Input video file path
    #[arg(short, long)]
    pub input: PathBuf,

    /// Target size as WxH (both even)
    #[arg(long)]
    pub size: Dimensions,

    /// Re-encode quality (low, medium, high, very-high; default from config)
    #[arg(short, long)]
    pub quality: Option<VideoQuality>,

    /// Output directory (default from config)
    #[arg(short = 'd', long)]
    pub dest: Option<PathBuf>,
}

/// Arguments for the inspect command
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Input video file path
    #[arg(short, long)]
    pub input: PathBuf,

    /// Longest initial selection to suggest, in milliseconds
    #[arg(long)]
    pub max_selection_ms: Option<u64>,
}
