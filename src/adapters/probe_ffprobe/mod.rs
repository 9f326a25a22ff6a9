//! FFprobe adapter for media file probing
//!
//! Runs `ffprobe -show_format -show_streams` with JSON output and reduces the
//! first video stream to [`MediaMetadata`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::domain::model::{Dimensions, MediaMetadata, Rotation};
use crate::error::{VtrimError, VtrimResult};
use crate::ports::ProbePort;

/// Probe backed by an `ffprobe` executable
#[derive(Debug, Clone)]
pub struct FfprobeAdapter {
    binary: PathBuf,
}

impl FfprobeAdapter {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for FfprobeAdapter {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

#[async_trait]
impl ProbePort for FfprobeAdapter {
    async fn probe(&self, path: &Path) -> VtrimResult<MediaMetadata> {
        debug!("Probing {}", path.display());
        let output = Command::new(&self.binary)
            .args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| VtrimError::Probe {
                message: format!("cannot start {}: {}", self.binary.display(), e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VtrimError::Probe {
                message: format!(
                    "{} exited with {:?}: {}",
                    self.binary.display(),
                    output.status.code(),
                    stderr.trim()
                ),
            });
        }

        parse_probe_output(&output.stdout)
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
    bit_rate: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
    #[serde(default)]
    side_data_list: Vec<SideData>,
}

#[derive(Debug, Deserialize)]
struct SideData {
    rotation: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
}

/// Reduce ffprobe's JSON document to the metadata the engines need
pub fn parse_probe_output(json: &[u8]) -> VtrimResult<MediaMetadata> {
    let parsed: ProbeOutput = serde_json::from_slice(json).map_err(|e| VtrimError::Probe {
        message: format!("unreadable ffprobe output: {}", e),
    })?;

    let video = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| VtrimError::Probe {
            message: "no video stream found".to_string(),
        })?;

    let format = parsed.format.as_ref();
    let duration_secs = format
        .and_then(|f| parse_f64(f.duration.as_deref()))
        .or_else(|| parse_f64(video.duration.as_deref()))
        .ok_or_else(|| VtrimError::Probe {
            message: "source has no duration".to_string(),
        })?;

    let frame_rate = parse_rational(video.avg_frame_rate.as_deref())
        .or_else(|| parse_rational(video.r_frame_rate.as_deref()));
    let bitrate = format
        .and_then(|f| parse_u64(f.bit_rate.as_deref()))
        .or_else(|| parse_u64(video.bit_rate.as_deref()));

    Ok(MediaMetadata {
        duration_ms: (duration_secs * 1000.0).round() as u64,
        dimensions: Dimensions::new(video.width.unwrap_or(0), video.height.unwrap_or(0)),
        rotation: stream_rotation(video),
        frame_rate,
        bitrate,
    })
}

/// Rotation from the legacy `rotate` tag or the display matrix side data
///
/// The display matrix angle is counter-clockwise, the tag clockwise.
fn stream_rotation(stream: &ProbeStream) -> Rotation {
    let degrees = stream
        .tags
        .get("rotate")
        .and_then(|r| r.trim().parse::<i64>().ok())
        .or_else(|| {
            stream
                .side_data_list
                .iter()
                .find_map(|s| s.rotation)
                .map(|r| -(r.round() as i64))
        })
        .unwrap_or(0);

    Rotation::from_degrees(degrees).unwrap_or_else(|e| {
        warn!("Ignoring rotation: {}", e);
        Rotation::None
    })
}

fn parse_f64(value: Option<&str>) -> Option<f64> {
    value?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}

fn parse_u64(value: Option<&str>) -> Option<u64> {
    value?.trim().parse::<u64>().ok().filter(|&v| v > 0)
}

/// `"30000/1001"` style rates; `0/0` is unknown
fn parse_rational(value: Option<&str>) -> Option<f64> {
    let value = value?.trim();
    let rate = match value.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => value.parse().ok()?,
    };
    Some(rate).filter(|r| r.is_finite() && *r > 0.0)
}
