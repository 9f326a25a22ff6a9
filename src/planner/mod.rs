//! Trim planning: sync-sample correction and per-track sample ranges

use std::ops::Range;

use serde::Serialize;
use tracing::{debug, info};

use crate::container::Movie;
use crate::domain::model::{MediaTime, TrimRange};
use crate::error::{VtrimError, VtrimResult};

pub mod sync;

/// Which samples of each track survive a trim
#[derive(Debug, Clone)]
pub struct TrimPlan {
    /// Requested range, carrying the sync-aligned bounds when a sync track exists
    pub range: TrimRange,
    /// Index of the track whose sync samples drove the correction
    pub sync_track: Option<usize>,
    /// One half-open sample range per track, in track order
    pub sample_ranges: Vec<Range<usize>>,
}

/// Summary of a plan for reporting
#[derive(Debug, Clone, Serialize)]
pub struct PlanSummary {
    pub requested_start_ms: u64,
    pub requested_end_ms: u64,
    pub start_ms: u64,
    pub end_ms: u64,
    pub samples_per_track: Vec<usize>,
}

impl TrimPlan {
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            requested_start_ms: self.range.start_ms,
            requested_end_ms: self.range.end_ms,
            start_ms: self.range.start().as_millis(),
            end_ms: self.range.end().as_millis(),
            samples_per_track: self.sample_ranges.iter().map(|r| r.len()).collect(),
        }
    }
}

/// Maps a requested time range onto a parsed movie
pub struct TrimPlanner;

impl TrimPlanner {
    pub fn plan(movie: &Movie, requested: TrimRange) -> VtrimResult<TrimPlan> {
        let sync_tracks = movie.sync_tracks();
        if sync_tracks.len() > 1 {
            return Err(VtrimError::MultipleSyncSampleTracks {
                count: sync_tracks.len(),
            });
        }

        let source_end = MediaTime::new(movie.duration(), movie.timescale);
        if MediaTime::from_millis(requested.start_ms) >= source_end {
            return Err(VtrimError::invalid(format!(
                "start {} ms is beyond the end of the source ({} ms)",
                requested.start_ms,
                source_end.as_millis()
            )));
        }

        let sync_track = sync_tracks.first().copied();
        let range = match sync_track {
            Some(index) => {
                let (start, end) = sync::correct_range(
                    &movie.tracks[index],
                    MediaTime::from_millis(requested.start_ms),
                    MediaTime::from_millis(requested.end_ms),
                );
                info!(
                    "Aligned {} - {} ms to sync samples at {} - {} ms",
                    requested.start_ms,
                    requested.end_ms,
                    start.as_millis(),
                    end.as_millis()
                );
                requested.with_correction(start, end)
            }
            None => requested,
        };

        let sample_ranges: Vec<Range<usize>> = movie
            .tracks
            .iter()
            .map(|track| sync::sample_range(track, range.start(), range.end()))
            .collect();

        for (track, samples) in movie.tracks.iter().zip(&sample_ranges) {
            debug!(
                "Track {} keeps samples {}..{} of {}",
                track.header.track_id,
                samples.start,
                samples.end,
                track.samples.len()
            );
        }

        if sample_ranges.iter().all(|r| r.is_empty()) {
            return Err(VtrimError::invalid("the selected range contains no samples"));
        }

        Ok(TrimPlan {
            range,
            sync_track,
            sample_ranges,
        })
    }
}
