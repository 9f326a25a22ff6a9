// Domain models - Core types and data structures

use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{VtrimError, VtrimResult};

/// Frame rate assumed when the source does not report one
pub const DEFAULT_FRAME_RATE: f64 = 24.0;

/// Bitrate assumed when the source does not report one (bit/s)
pub const DEFAULT_BITRATE: u64 = 1_500_000;

/// Exact media time as `ticks / timescale`
///
/// Comparisons cross-multiply, so times from tracks with different
/// timescales compare without rounding.
#[derive(Debug, Clone, Copy)]
pub struct MediaTime {
    ticks: u64,
    timescale: u32,
}

impl MediaTime {
    /// Create a time; a zero timescale is treated as 1
    pub fn new(ticks: u64, timescale: u32) -> Self {
        Self {
            ticks,
            timescale: timescale.max(1),
        }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::new(ms, 1000)
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn timescale(&self) -> u32 {
        self.timescale
    }

    /// Milliseconds, rounded down
    pub fn as_millis(&self) -> u64 {
        (self.ticks as u128 * 1000 / self.timescale as u128) as u64
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.ticks as f64 / self.timescale as f64
    }
}

impl PartialEq for MediaTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MediaTime {}

impl PartialOrd for MediaTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MediaTime {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.ticks as u128 * other.timescale as u128;
        let rhs = other.ticks as u128 * self.timescale as u128;
        lhs.cmp(&rhs)
    }
}

impl fmt::Display for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ticks, self.timescale)
    }
}

/// Requested `[start, end)` in milliseconds plus its sync-aligned correction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrimRange {
    pub start_ms: u64,
    pub end_ms: u64,
    corrected: Option<(MediaTime, MediaTime)>,
}

impl TrimRange {
    /// Create a range; `start_ms` must be before `end_ms`
    pub fn new(start_ms: u64, end_ms: u64) -> VtrimResult<Self> {
        if start_ms >= end_ms {
            return Err(VtrimError::invalid(format!(
                "start ({} ms) must be before end ({} ms)",
                start_ms, end_ms
            )));
        }
        Ok(Self {
            start_ms,
            end_ms,
            corrected: None,
        })
    }

    /// Attach the sync-aligned bounds
    pub fn with_correction(mut self, start: MediaTime, end: MediaTime) -> Self {
        self.corrected = Some((start, end));
        self
    }

    pub fn is_corrected(&self) -> bool {
        self.corrected.is_some()
    }

    /// Effective start: the corrected bound when present, else the request
    pub fn start(&self) -> MediaTime {
        self.corrected
            .map(|(start, _)| start)
            .unwrap_or_else(|| MediaTime::from_millis(self.start_ms))
    }

    /// Effective end: the corrected bound when present, else the request
    pub fn end(&self) -> MediaTime {
        self.corrected
            .map(|(_, end)| end)
            .unwrap_or_else(|| MediaTime::from_millis(self.end_ms))
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_ms - self.start_ms
    }
}

/// Width and height in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn transposed(self) -> Self {
        Self::new(self.height, self.width)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl FromStr for Dimensions {
    type Err = VtrimError;

    /// Parse `WIDTHxHEIGHT`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| VtrimError::invalid(format!("expected WIDTHxHEIGHT, got '{}'", s)))?;
        let parse = |v: &str| {
            v.trim()
                .parse::<u32>()
                .map_err(|_| VtrimError::invalid(format!("invalid dimension '{}'", v)))
        };
        Ok(Self::new(parse(w)?, parse(h)?))
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Crop rectangle in integer pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Whether the rectangle is non-empty and lies fully inside `bounds`
    pub fn fits_within(&self, bounds: Dimensions) -> bool {
        self.width > 0
            && self.height > 0
            && self.x as u64 + self.width as u64 <= bounds.width as u64
            && self.y as u64 + self.height as u64 <= bounds.height as u64
    }

    /// ffmpeg `crop` filter argument
    pub fn to_filter(&self) -> String {
        format!("crop={}:{}:{}:{}", self.width, self.height, self.x, self.y)
    }
}

impl FromStr for CropRect {
    type Err = VtrimError;

    /// Parse `X,Y,WIDTH,HEIGHT`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| VtrimError::invalid(format!("invalid crop rectangle '{}'", s)))?;
        match parts.as_slice() {
            [x, y, w, h] => Ok(Self::new(*x, *y, *w, *h)),
            _ => Err(VtrimError::invalid(format!(
                "crop rectangle needs X,Y,WIDTH,HEIGHT, got '{}'",
                s
            ))),
        }
    }
}

/// Display rotation reported by the source metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    /// Normalise any multiple of 90 degrees, negative values included
    pub fn from_degrees(degrees: i64) -> VtrimResult<Self> {
        match degrees.rem_euclid(360) {
            0 => Ok(Rotation::None),
            90 => Ok(Rotation::Cw90),
            180 => Ok(Rotation::Cw180),
            270 => Ok(Rotation::Cw270),
            other => Err(VtrimError::invalid(format!("unsupported rotation {}", other))),
        }
    }

    pub fn degrees(&self) -> u32 {
        match self {
            Rotation::None => 0,
            Rotation::Cw90 => 90,
            Rotation::Cw180 => 180,
            Rotation::Cw270 => 270,
        }
    }

    /// Whether width and height swap on display
    pub fn transposes(&self) -> bool {
        matches!(self, Rotation::Cw90 | Rotation::Cw270)
    }
}

/// Coarse re-encode quality, applied as a bitrate multiplier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoQuality {
    Low,
    #[default]
    Medium,
    High,
    VeryHigh,
}

impl VideoQuality {
    pub fn factor(&self) -> f64 {
        match self {
            VideoQuality::Low => 0.2,
            VideoQuality::Medium => 0.3,
            VideoQuality::High => 0.4,
            VideoQuality::VeryHigh => 0.6,
        }
    }
}

impl FromStr for VideoQuality {
    type Err = VtrimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['-', '_'], "").as_str() {
            "low" => Ok(VideoQuality::Low),
            "medium" => Ok(VideoQuality::Medium),
            "high" => Ok(VideoQuality::High),
            "veryhigh" => Ok(VideoQuality::VeryHigh),
            _ => Err(VtrimError::invalid(format!(
                "invalid quality '{}' (expected low, medium, high or very-high)",
                s
            ))),
        }
    }
}

impl fmt::Display for VideoQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VideoQuality::Low => "low",
            VideoQuality::Medium => "medium",
            VideoQuality::High => "high",
            VideoQuality::VeryHigh => "very-high",
        };
        f.write_str(name)
    }
}

/// What the metadata probe reports about a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub duration_ms: u64,
    /// Coded (storage) dimensions
    pub dimensions: Dimensions,
    pub rotation: Rotation,
    pub frame_rate: Option<f64>,
    /// Overall bitrate in bit/s
    pub bitrate: Option<u64>,
}

impl MediaMetadata {
    pub fn frame_rate_or_default(&self) -> f64 {
        self.frame_rate
            .filter(|r| r.is_finite() && *r > 0.0)
            .unwrap_or(DEFAULT_FRAME_RATE)
    }

    pub fn bitrate_or_default(&self) -> u64 {
        self.bitrate.filter(|&b| b > 0).unwrap_or(DEFAULT_BITRATE)
    }

    /// Dimensions as displayed, with rotation applied
    pub fn display_dimensions(&self) -> Dimensions {
        if self.rotation.transposes() {
            self.dimensions.transposed()
        } else {
            self.dimensions
        }
    }

    /// Expected number of frames over the whole source
    pub fn total_frames(&self) -> f64 {
        self.duration_ms as f64 / 1000.0 * self.frame_rate_or_default()
    }
}

/// One encoder job kind and its parameters
#[derive(Debug, Clone, PartialEq)]
pub enum EncodeOperation {
    /// Stream-copy the range
    Trim { range: TrimRange },
    /// Re-encode the video through a crop filter; progress is frame based
    Crop {
        rect: CropRect,
        duration_ms: u64,
        frame_rate: f64,
    },
    /// Cut and crop with libx264 at the given bitrate
    TrimAndCrop {
        range: TrimRange,
        rect: CropRect,
        bitrate_mbps: f64,
    },
    /// Scale to new dimensions at the given bitrate
    Compress {
        size: Dimensions,
        bitrate_mbps: f64,
        duration_ms: u64,
    },
}

impl EncodeOperation {
    pub fn name(&self) -> &'static str {
        match self {
            EncodeOperation::Trim { .. } => "trim",
            EncodeOperation::Crop { .. } => "crop",
            EncodeOperation::TrimAndCrop { .. } => "trim+crop",
            EncodeOperation::Compress { .. } => "compress",
        }
    }

    /// Length of the media the encoder will produce, used for percentages
    pub fn expected_duration_ms(&self) -> u64 {
        match self {
            EncodeOperation::Trim { range } | EncodeOperation::TrimAndCrop { range, .. } => {
                range.duration_ms()
            }
            EncodeOperation::Crop { duration_ms, .. }
            | EncodeOperation::Compress { duration_ms, .. } => *duration_ms,
        }
    }
}

/// An encoder job: where from, where to, and what to do
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub operation: EncodeOperation,
}

impl EncodeJob {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>, operation: EncodeOperation) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            operation,
        }
    }
}

/// Terminal outcome of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Success(PathBuf),
    Cancelled,
    Failed(String),
}

impl JobStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Success(_))
    }
}

/// The user's current `[start, end)` selection over a source, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub start_ms: u64,
    pub end_ms: u64,
}

impl Selection {
    pub fn new(start_ms: u64, end_ms: u64) -> Self {
        Self { start_ms, end_ms }
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }

    pub fn to_range(&self) -> VtrimResult<TrimRange> {
        TrimRange::new(self.start_ms, self.end_ms)
    }
}

#[cfg(test)]
mod tests;
