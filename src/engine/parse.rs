//! Encoder output parsing into percentages

use crate::ports::EncoderStream;

/// Turns encoder output lines into progress percentages
pub trait ProgressParser: Send {
    /// Percentage in `[0, 100]` when `line` carries progress, `None` otherwise
    fn parse_line(&mut self, stream: EncoderStream, line: &str) -> Option<f32>;
}

/// Reads `out_time_us`/`out_time_ms` from `-progress` output
///
/// ffmpeg reports both keys in microseconds.
#[derive(Debug, Clone)]
pub struct TimestampProgress {
    total_ms: u64,
}

impl TimestampProgress {
    pub fn new(total_ms: u64) -> Self {
        Self { total_ms }
    }
}

impl ProgressParser for TimestampProgress {
    fn parse_line(&mut self, stream: EncoderStream, line: &str) -> Option<f32> {
        if stream != EncoderStream::Progress || self.total_ms == 0 {
            return None;
        }
        let (key, value) = line.trim().split_once('=')?;
        match key {
            "out_time_us" | "out_time_ms" => {
                // "N/A" before the first frame, negative during pre-roll
                let micros: i64 = value.trim().parse().ok()?;
                let current_ms = micros.max(0) as u64 / 1000;
                let percent = current_ms as f64 * 100.0 / self.total_ms as f64;
                Some(percent.clamp(0.0, 100.0) as f32)
            }
            "progress" if value.trim() == "end" => Some(100.0),
            _ => None,
        }
    }
}

/// Scrapes `frame=<N>` from the encoder's statistics line
#[derive(Debug, Clone)]
pub struct FrameProgress {
    total_frames: f64,
}

impl FrameProgress {
    /// `duration_ms` of source at `frame_rate` frames per second
    pub fn new(duration_ms: u64, frame_rate: f64) -> Self {
        Self {
            total_frames: duration_ms as f64 / 1000.0 * frame_rate,
        }
    }
}

impl ProgressParser for FrameProgress {
    fn parse_line(&mut self, _stream: EncoderStream, line: &str) -> Option<f32> {
        if self.total_frames.is_nan() || self.total_frames <= 0.0 {
            return None;
        }
        let frames: u64 = extract_value(line, "frame=")?.parse().ok()?;
        let percent = frames as f64 / self.total_frames * 100.0;
        Some(percent.clamp(0.0, 100.0) as f32)
    }
}

/// Value following `key`, up to the next whitespace
fn extract_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let start = line.find(key)?;
    let after_key = &line[start + key.len()..];
    let value = after_key.trim_start();
    let end = value.find(char::is_whitespace).unwrap_or(value.len());
    if end == 0 {
        None
    } else {
        Some(&value[..end])
    }
}
