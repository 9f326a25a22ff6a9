//! vtrim video trimming library
//!
//! Frame-accurate trimming of MP4/MOV files by rewriting their sample
//! tables, plus crop, trim-and-crop and compress jobs run through an
//! external ffmpeg executable.

pub mod adapters;
pub mod cli;
pub mod container;
pub mod dispatcher;
pub mod domain;
pub mod engine;
pub mod error;
pub mod output;
pub mod planner;
pub mod ports;
pub mod scheduler;
pub mod utils;

// Re-export commonly used types
pub use domain::model::{CropRect, Dimensions, JobStatus, MediaMetadata, TrimRange, VideoQuality};
pub use error::{VtrimError, VtrimResult};
