// Domain rules - Business logic and policies

use crate::domain::model::*;
use crate::error::{VtrimError, VtrimResult};

/// Shortest selection the editor accepts by default
pub const DEFAULT_MIN_SELECTION_MS: u64 = 1000;

/// Maps rectangles drawn over the player surface onto source pixels
pub struct CropMapper;

impl CropMapper {
    /// Rescale `rect` from `surface` space into the source frame
    ///
    /// Rotation 90/270 transposes the source dimensions first. The result is
    /// clamped into the source frame and its size rounded down to even values,
    /// which 4:2:0 encoders require.
    pub fn map_to_source(
        rect: CropRect,
        surface: Dimensions,
        metadata: &MediaMetadata,
    ) -> VtrimResult<CropRect> {
        if surface.is_empty() {
            return Err(VtrimError::invalid(format!(
                "player surface {} has no area",
                surface
            )));
        }
        let source = metadata.display_dimensions();
        if source.is_empty() {
            return Err(VtrimError::invalid(format!("source frame {} has no area", source)));
        }

        let scale = |value: u32, src: u32, player: u32| -> u32 {
            (value as u64 * src as u64 / player as u64) as u32
        };

        let x = scale(rect.x, source.width, surface.width).min(source.width);
        let y = scale(rect.y, source.height, surface.height).min(source.height);
        let width = scale(rect.width, source.width, surface.width).min(source.width - x);
        let height = scale(rect.height, source.height, surface.height).min(source.height - y);

        let mapped = CropRect::new(x, y, width & !1, height & !1);
        if !mapped.fits_within(source) {
            return Err(VtrimError::invalid(format!(
                "crop {:?} over {} maps to an empty area of the {} source",
                rect, surface, source
            )));
        }
        Ok(mapped)
    }

    /// Validate a rectangle already expressed in source pixels
    pub fn validate(rect: CropRect, metadata: &MediaMetadata) -> VtrimResult<CropRect> {
        let source = metadata.display_dimensions();
        if rect.fits_within(source) {
            Ok(rect)
        } else {
            Err(VtrimError::invalid(format!(
                "crop {:?} does not fit inside the {} source",
                rect, source
            )))
        }
    }
}

/// Derives the re-encode bitrate from the source bitrate
pub struct BitratePolicy;

impl BitratePolicy {
    /// Target bitrate in Mbit/s
    ///
    /// Sources under 1 Mbit/s are encoded at 1 Mbit/s; everything else is
    /// scaled by the quality factor.
    pub fn target_mbps(source_bps: u64, quality: VideoQuality) -> f64 {
        let mbps = source_bps as f64 / 1_000_000.0;
        if mbps < 1.0 {
            return 1.0;
        }
        mbps * quality.factor()
    }

    pub fn for_metadata(metadata: &MediaMetadata, quality: VideoQuality) -> f64 {
        Self::target_mbps(metadata.bitrate_or_default(), quality)
    }
}

/// Rules governing the editable selection
pub struct SelectionPolicy;

impl SelectionPolicy {
    /// Starting selection for a freshly loaded source
    ///
    /// A source at least as long as `max_ms` gets a centred window of
    /// `max_ms`; one no longer than `min_ms` gets a centred `min_ms` window
    /// clamped to the source; anything else is selected whole.
    pub fn initial(duration_ms: u64, min_ms: Option<u64>, max_ms: Option<u64>) -> Selection {
        if let Some(max) = max_ms.filter(|&m| m > 0 && duration_ms >= m) {
            return Self::centred(duration_ms, max);
        }
        if let Some(min) = min_ms.filter(|&m| m > 0 && duration_ms <= m) {
            return Self::centred(duration_ms, min);
        }
        Selection::new(0, duration_ms)
    }

    /// Stretch a selection shorter than `min_ms`
    ///
    /// The end is extended first when the remaining tail is strictly longer
    /// than the shortfall; otherwise the start is pulled back when it lies
    /// strictly beyond the shortfall. If neither fits, the selection is
    /// returned unchanged.
    pub fn widen_to_minimum(selection: Selection, duration_ms: u64, min_ms: u64) -> Selection {
        let length = selection.duration_ms();
        if length >= min_ms {
            return selection;
        }

        let shortfall = min_ms - length;
        let tail = duration_ms.saturating_sub(selection.end_ms);
        if tail > shortfall {
            Selection::new(selection.start_ms, selection.end_ms + shortfall)
        } else if selection.start_ms > shortfall {
            Selection::new(selection.start_ms - shortfall, selection.end_ms)
        } else {
            selection
        }
    }

    fn centred(duration_ms: u64, window_ms: u64) -> Selection {
        let mid = duration_ms / 2;
        let start = mid.saturating_sub(window_ms / 2);
        let end = (start + window_ms).min(duration_ms);
        Selection::new(start, end)
    }
}

#[cfg(test)]
mod tests;
