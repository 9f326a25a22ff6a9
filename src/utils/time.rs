//! Time parsing and formatting utilities

use crate::error::{VtrimError, VtrimResult};

/// Parser for user-supplied positions
///
/// Accepts plain seconds (`"75"`, `"75.5"`), `MM:SS(.ms)` and
/// `HH:MM:SS(.ms)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TimeParser;

impl TimeParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a time string to whole milliseconds
    pub fn parse_millis(&self, time_str: &str) -> VtrimResult<u64> {
        let time_str = time_str.trim();
        let seconds = match time_str.matches(':').count() {
            0 => self.parse_seconds(time_str, time_str)?,
            1 => self.parse_mm_ss(time_str)?,
            2 => self.parse_hh_mm_ss(time_str)?,
            _ => return Err(invalid_time(time_str)),
        };
        Ok((seconds * 1000.0).round() as u64)
    }

    /// Parse MM:SS(.ms) format
    fn parse_mm_ss(&self, time_str: &str) -> VtrimResult<f64> {
        let (minutes, seconds) = time_str
            .split_once(':')
            .ok_or_else(|| invalid_time(time_str))?;
        let minutes = self.parse_whole(minutes, time_str)?;
        let seconds = self.parse_seconds(seconds, time_str)?;
        if seconds >= 60.0 {
            return Err(invalid_time(time_str));
        }
        Ok(minutes * 60.0 + seconds)
    }

    /// Parse HH:MM:SS(.ms) format
    fn parse_hh_mm_ss(&self, time_str: &str) -> VtrimResult<f64> {
        let parts: Vec<&str> = time_str.split(':').collect();
        if parts.len() != 3 {
            return Err(invalid_time(time_str));
        }

        let hours = self.parse_whole(parts[0], time_str)?;
        let minutes = self.parse_whole(parts[1], time_str)?;
        let seconds = self.parse_seconds(parts[2], time_str)?;
        if minutes >= 60.0 || seconds >= 60.0 {
            return Err(invalid_time(time_str));
        }
        Ok(hours * 3600.0 + minutes * 60.0 + seconds)
    }

    fn parse_whole(&self, part: &str, time_str: &str) -> VtrimResult<f64> {
        part.parse::<u32>()
            .map(f64::from)
            .map_err(|_| invalid_time(time_str))
    }

    fn parse_seconds(&self, part: &str, time_str: &str) -> VtrimResult<f64> {
        match part.parse::<f64>() {
            Ok(seconds) if seconds.is_finite() && seconds >= 0.0 => Ok(seconds),
            _ => Err(invalid_time(time_str)),
        }
    }
}

fn invalid_time(time_str: &str) -> VtrimError {
    VtrimError::invalid(format!(
        "invalid time '{}', expected seconds, MM:SS(.ms) or HH:MM:SS(.ms)",
        time_str
    ))
}

/// Format a position as `H:MM:SS` past the hour, `MM:SS` otherwise
///
/// Sub-second precision is dropped. This is also the form passed to the
/// encoder's `-ss`/`-to`.
pub fn format_position(ms: u64) -> String {
    let total_seconds = ms / 1000;
    let seconds = total_seconds % 60;
    let minutes = (total_seconds / 60) % 60;
    let hours = total_seconds / 3600;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}
