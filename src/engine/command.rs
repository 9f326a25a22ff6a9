//! Encoder argument vectors for each job kind

use crate::domain::model::{EncodeJob, EncodeOperation};
use crate::utils::time::format_position;

/// Builds `ffmpeg` arguments for an [`EncodeJob`]
pub struct CommandBuilder;

impl CommandBuilder {
    /// Full argument vector, without the executable
    pub fn build(job: &EncodeJob) -> Vec<String> {
        let input = job.input.to_string_lossy().into_owned();
        let output = job.output.to_string_lossy().into_owned();

        let mut args = vec!["-y".to_string(), "-i".to_string(), input];
        match &job.operation {
            EncodeOperation::Trim { range } => {
                push(&mut args, ["-ss", &format_position(range.start_ms)]);
                push(&mut args, ["-to", &format_position(range.end_ms)]);
                push(&mut args, ["-c", "copy"]);
            }
            EncodeOperation::Crop { rect, .. } => {
                push(&mut args, ["-filter:v", &rect.to_filter()]);
                push(&mut args, ["-c:a", "copy"]);
            }
            EncodeOperation::TrimAndCrop {
                range,
                rect,
                bitrate_mbps,
            } => {
                push(&mut args, ["-ss", &format_position(range.start_ms)]);
                push(&mut args, ["-to", &format_position(range.end_ms)]);
                push(&mut args, ["-filter:v", &rect.to_filter()]);
                push(&mut args, ["-vcodec", "libx264"]);
                push(&mut args, ["-b", &format_bitrate(*bitrate_mbps)]);
                push(&mut args, ["-preset", "ultrafast"]);
                push(&mut args, ["-c:a", "copy"]);
            }
            EncodeOperation::Compress {
                size, bitrate_mbps, ..
            } => {
                let scale = format!("scale={}:{}", size.width, size.height);
                push(&mut args, ["-vf", &scale]);
                push(&mut args, ["-b:v", &format_bitrate(*bitrate_mbps)]);
            }
        }

        if Self::uses_structured_progress(&job.operation) {
            push(&mut args, ["-progress", "pipe:1", "-nostats"]);
        }
        args.push(output);
        args
    }

    /// Whether the job reports through `-progress` rather than the stats line
    pub fn uses_structured_progress(operation: &EncodeOperation) -> bool {
        !matches!(operation, EncodeOperation::Crop { .. })
    }
}

fn push<const N: usize>(args: &mut Vec<String>, items: [&str; N]) {
    args.extend(items.iter().map(|s| s.to_string()));
}

/// `3M`, `2.4M`; at most two decimals
fn format_bitrate(mbps: f64) -> String {
    let fixed = format!("{:.2}", mbps);
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    format!("{}M", trimmed)
}
