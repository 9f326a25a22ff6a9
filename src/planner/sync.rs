//! Sync-sample correction and time-to-sample mapping

use std::ops::Range;

use crate::container::Track;
use crate::domain::model::MediaTime;

/// Align `[start, end)` to the sync samples of `track`
///
/// The start moves back to the last sync sample at or before it (the track
/// start if there is none); the end moves forward to the first sync sample at
/// or after it, or to the track end when no such sample exists.
pub fn correct_range(track: &Track, start: MediaTime, end: MediaTime) -> (MediaTime, MediaTime) {
    let timescale = track.timescale;
    let sync_times: Vec<MediaTime> = track
        .sync_sample_times()
        .into_iter()
        .map(|t| MediaTime::new(t, timescale))
        .collect();

    let corrected_start = sync_times
        .iter()
        .rev()
        .find(|&&t| t <= start)
        .copied()
        .unwrap_or_else(|| MediaTime::new(0, timescale));

    let corrected_end = sync_times
        .iter()
        .find(|&&t| t >= end)
        .copied()
        .unwrap_or_else(|| MediaTime::new(track.duration(), timescale));

    (corrected_start, corrected_end)
}

/// Half-open sample range of `track` covering `[start, end)`
///
/// The first sample is the last one starting at or before `start`; the
/// range stops before the last sample starting at or before `end`, or runs
/// to the final sample once `end` reaches the track duration.
pub fn sample_range(track: &Track, start: MediaTime, end: MediaTime) -> Range<usize> {
    let count = track.samples.len();
    let timescale = track.timescale;
    let total = MediaTime::new(track.duration(), timescale);

    if start >= total {
        return count..count;
    }

    let mut first = 0usize;
    let mut last = 0usize;
    let mut elapsed = 0u64;
    for (index, duration) in track.durations().enumerate() {
        let at = MediaTime::new(elapsed, timescale);
        if at > end {
            break;
        }
        if at <= start {
            first = index;
        }
        last = index;
        elapsed += duration;
    }

    let last = if end >= total { count } else { last };
    first..last.max(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{Sample, TrackHeader};

    fn track(timescale: u32, durations: &[u32], sync: Option<Vec<u32>>) -> Track {
        Track {
            header: TrackHeader::default(),
            handler: *b"vide",
            handler_box: Vec::new(),
            media_header_box: None,
            sample_description_box: Vec::new(),
            timescale,
            language: 0,
            samples: durations
                .iter()
                .map(|&duration| Sample {
                    offset: 0,
                    size: 1,
                    duration,
                    composition_offset: 0,
                    description_index: 1,
                })
                .collect(),
            sync_samples: sync,
            has_composition_offsets: false,
        }
    }

    #[test]
    fn test_correction_to_enclosing_sync_samples() {
        // 100 ms samples, sync every 2 s
        let t = track(1000, &[100; 80], Some(vec![1, 21, 41, 61]));
        let (start, end) = correct_range(&t, MediaTime::from_millis(2500), MediaTime::from_millis(5500));
        assert_eq!(start.as_millis(), 2000);
        assert_eq!(end.as_millis(), 6000);
    }

    #[test]
    fn test_correction_keeps_exact_sync_points() {
        let t = track(1000, &[100; 80], Some(vec![1, 21, 41, 61]));
        let (start, end) = correct_range(&t, MediaTime::from_millis(2000), MediaTime::from_millis(4000));
        assert_eq!(start.as_millis(), 2000);
        assert_eq!(end.as_millis(), 4000);
    }

    #[test]
    fn test_correction_without_later_sync_uses_track_end() {
        let t = track(1000, &[100; 80], Some(vec![1, 21, 41, 61]));
        let (_, end) = correct_range(&t, MediaTime::from_millis(100), MediaTime::from_millis(7000));
        assert_eq!(end.as_millis(), 8000);
    }

    #[test]
    fn test_sample_range_is_exact_without_rounding() {
        let t = track(1000, &[100; 100], None);
        let range = sample_range(&t, MediaTime::from_millis(1000), MediaTime::from_millis(9000));
        assert_eq!(range, 10..90);
    }

    #[test]
    fn test_sample_range_full_duration() {
        let t = track(1000, &[100; 100], None);
        assert_eq!(sample_range(&t, MediaTime::from_millis(0), MediaTime::from_millis(10_000)), 0..100);
        assert_eq!(sample_range(&t, MediaTime::from_millis(0), MediaTime::from_millis(12_000)), 0..100);
    }

    #[test]
    fn test_sample_range_other_timescale() {
        // 1024-tick audio frames at 48 kHz are 21.333 ms each
        let t = track(48_000, &[1024; 470], None);
        let range = sample_range(&t, MediaTime::from_millis(1000), MediaTime::from_millis(9000));
        // Frame 46 starts at 981.33 ms, frame 421 at 8981.33 ms
        assert_eq!(range, 46..421);
    }

    #[test]
    fn test_sample_range_past_track_end() {
        let t = track(1000, &[100; 10], None);
        assert_eq!(sample_range(&t, MediaTime::from_millis(1500), MediaTime::from_millis(2000)), 10..10);
    }
}
