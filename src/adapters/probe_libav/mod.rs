// Probe LibAV adapter - Media file analysis using libav

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::domain::model::{Dimensions, MediaMetadata, Rotation};
use crate::error::{VtrimError, VtrimResult};
use crate::ports::ProbePort;

/// In-process probe using the linked libav libraries
#[derive(Debug, Default, Clone)]
pub struct LibavProbeAdapter;

impl LibavProbeAdapter {
    pub fn new() -> VtrimResult<Self> {
        ffmpeg_next::init().map_err(|e| probe_error("failed to initialize libav", e))?;
        Ok(Self)
    }

    fn probe_blocking(path: &Path) -> VtrimResult<MediaMetadata> {
        let input = ffmpeg_next::format::input(&path)
            .map_err(|e| probe_error(&format!("cannot open {}", path.display()), e))?;

        let stream = input
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or_else(|| VtrimError::Probe {
                message: "no video stream found".to_string(),
            })?;

        let context = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| probe_error("cannot read codec parameters", e))?;
        let video = context
            .decoder()
            .video()
            .map_err(|e| probe_error("not a video stream", e))?;

        let duration_ms = if input.duration() > 0 {
            (input.duration() as i128 * 1000 / ffmpeg_next::ffi::AV_TIME_BASE as i128) as u64
        } else {
            0
        };

        let rate = stream.avg_frame_rate();
        let frame_rate = if rate.denominator() != 0 && rate.numerator() > 0 {
            Some(rate.numerator() as f64 / rate.denominator() as f64)
        } else {
            None
        };

        let rotation = stream
            .metadata()
            .get("rotate")
            .and_then(|r| r.trim().parse::<i64>().ok())
            .and_then(|degrees| Rotation::from_degrees(degrees).ok())
            .unwrap_or_default();

        let bitrate = u64::try_from(input.bit_rate()).ok().filter(|&b| b > 0);

        debug!(
            "libav probe: {} ms, {}x{}, {:?}",
            duration_ms,
            video.width(),
            video.height(),
            rotation
        );

        Ok(MediaMetadata {
            duration_ms,
            dimensions: Dimensions::new(video.width(), video.height()),
            rotation,
            frame_rate,
            bitrate,
        })
    }
}

#[async_trait]
impl ProbePort for LibavProbeAdapter {
    async fn probe(&self, path: &Path) -> VtrimResult<MediaMetadata> {
        let path: PathBuf = path.to_path_buf();
        tokio::task::spawn_blocking(move || Self::probe_blocking(&path))
            .await
            .map_err(|e| VtrimError::Probe {
                message: format!("probe task failed: {}", e),
            })?
    }
}

fn probe_error(context: &str, err: ffmpeg_next::Error) -> VtrimError {
    VtrimError::Probe {
        message: format!("{}: {}", context, err),
    }
}
