//! Encoder-driven jobs: trim, crop, trim+crop and compress
//!
//! Each job builds an argument vector, runs it through an [`EncoderPort`],
//! turns output lines into progress and maps the exit into exactly one
//! terminal listener callback.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::model::{
    CropRect, Dimensions, EncodeJob, EncodeOperation, JobStatus, MediaMetadata, TrimRange,
    VideoQuality,
};
use crate::domain::rules::{BitratePolicy, CropMapper};
use crate::engine::command::CommandBuilder;
use crate::engine::parse::{FrameProgress, ProgressParser, TimestampProgress};
use crate::error::{VtrimError, VtrimResult};
use crate::ports::{EncoderExit, EncoderPort, EncoderStream, JobListener};

/// Exit code ffmpeg uses when it stops on a signal or `q`
const ENCODER_CANCELLED_CODE: i32 = 255;

/// Runs encoder jobs one at a time
pub struct EncodingOrchestrator<E: EncoderPort> {
    encoder: E,
    /// Parent of every job token handed out since the last cancel
    cancel: Mutex<CancellationToken>,
    busy: tokio::sync::Mutex<()>,
}

impl<E: EncoderPort> EncodingOrchestrator<E> {
    pub fn new(encoder: E) -> Self {
        Self {
            encoder,
            cancel: Mutex::new(CancellationToken::new()),
            busy: tokio::sync::Mutex::new(()),
        }
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    /// Stop the running job and any job waiting for its turn
    ///
    /// Each of them reports `on_cancelled`. Jobs submitted afterwards are not
    /// affected.
    pub fn cancel(&self) {
        info!("Cancellation requested");
        let mut current = self.current_cancel();
        current.cancel();
        *current = CancellationToken::new();
    }

    fn current_cancel(&self) -> MutexGuard<'_, CancellationToken> {
        self.cancel.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stream-copy `range` of `input`
    pub async fn trim_only(
        &self,
        input: &Path,
        output: &Path,
        range: TrimRange,
        listener: &dyn JobListener,
    ) -> JobStatus {
        let job = EncodeJob::new(input, output, EncodeOperation::Trim { range });
        self.run(&job, listener).await
    }

    /// Crop the whole of `input` to `rect`, given in source pixels
    pub async fn crop_only(
        &self,
        input: &Path,
        output: &Path,
        rect: CropRect,
        metadata: &MediaMetadata,
        listener: &dyn JobListener,
    ) -> JobStatus {
        let operation = CropMapper::validate(rect, metadata).map(|rect| EncodeOperation::Crop {
            rect,
            duration_ms: metadata.duration_ms,
            frame_rate: metadata.frame_rate_or_default(),
        });
        self.run_checked(input, output, operation, listener).await
    }

    /// Cut `range` and crop to `rect` in one re-encode
    pub async fn trim_and_crop(
        &self,
        input: &Path,
        output: &Path,
        range: TrimRange,
        rect: CropRect,
        metadata: &MediaMetadata,
        quality: VideoQuality,
        listener: &dyn JobListener,
    ) -> JobStatus {
        let operation = CropMapper::validate(rect, metadata).map(|rect| {
            EncodeOperation::TrimAndCrop {
                range,
                rect,
                bitrate_mbps: BitratePolicy::for_metadata(metadata, quality),
            }
        });
        self.run_checked(input, output, operation, listener).await
    }

    /// Scale to `size` at a bitrate derived from the source
    pub async fn compress(
        &self,
        input: &Path,
        output: &Path,
        size: Dimensions,
        metadata: &MediaMetadata,
        quality: VideoQuality,
        listener: &dyn JobListener,
    ) -> JobStatus {
        let operation = if size.is_empty() || size.width % 2 != 0 || size.height % 2 != 0 {
            Err(VtrimError::invalid(format!(
                "target size {} must be non-zero and even",
                size
            )))
        } else {
            Ok(EncodeOperation::Compress {
                size,
                bitrate_mbps: BitratePolicy::for_metadata(metadata, quality),
                duration_ms: metadata.duration_ms,
            })
        };
        self.run_checked(input, output, operation, listener).await
    }

    async fn run_checked(
        &self,
        input: &Path,
        output: &Path,
        operation: VtrimResult<EncodeOperation>,
        listener: &dyn JobListener,
    ) -> JobStatus {
        match operation {
            Ok(operation) => {
                let job = EncodeJob::new(input, output, operation);
                self.run(&job, listener).await
            }
            Err(e) => {
                let message = e.to_string();
                listener.on_error(&message);
                JobStatus::Failed(message)
            }
        }
    }

    /// Run `job` to completion, reporting to `listener`
    pub async fn run(&self, job: &EncodeJob, listener: &dyn JobListener) -> JobStatus {
        let token = self.current_cancel().child_token();
        let _busy = self.busy.lock().await;
        if token.is_cancelled() {
            info!("{} job cancelled before it started", job.operation.name());
            listener.on_cancelled();
            return JobStatus::Cancelled;
        }

        info!(
            "Starting {} job: {} -> {}",
            job.operation.name(),
            job.input.display(),
            job.output.display()
        );
        listener.on_started();

        let args = CommandBuilder::build(job);
        let parser: Mutex<Box<dyn ProgressParser>> = Mutex::new(progress_parser(&job.operation));
        let on_line = |stream: EncoderStream, line: &str| {
            if stream == EncoderStream::Log {
                debug!(target: "vtrim::encoder", "{}", line);
            }
            let percent = parser
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .parse_line(stream, line);
            if let Some(percent) = percent {
                listener.on_progress(percent);
            }
        };

        let result = self.encoder.execute(&args, &on_line, &token).await;
        let status = classify(result, &job.output, &token);

        match &status {
            JobStatus::Success(output) => listener.on_result(output),
            JobStatus::Cancelled => {
                discard_partial(&job.output).await;
                listener.on_cancelled();
            }
            JobStatus::Failed(message) => {
                discard_partial(&job.output).await;
                listener.on_error(message);
            }
        }
        status
    }
}

fn classify(
    result: VtrimResult<EncoderExit>,
    output: &Path,
    token: &CancellationToken,
) -> JobStatus {
    match result {
        Ok(exit) if exit.success() => {
            info!("Encoder finished: {}", output.display());
            JobStatus::Success(output.to_path_buf())
        }
        Ok(exit)
            if exit.killed
                || token.is_cancelled()
                || exit.code == Some(ENCODER_CANCELLED_CODE) =>
        {
            info!("Encoder job cancelled");
            JobStatus::Cancelled
        }
        Ok(exit) => {
            let error = VtrimError::EncoderInvocationFailed {
                code: exit.code,
                message: if exit.diagnostic.trim().is_empty() {
                    "no diagnostic output".to_string()
                } else {
                    exit.diagnostic
                },
            };
            warn!("{}", error);
            JobStatus::Failed(error.to_string())
        }
        Err(e) if e.is_cancellation() => JobStatus::Cancelled,
        Err(e) => {
            warn!("Encoder could not run: {}", e);
            JobStatus::Failed(e.to_string())
        }
    }
}

fn progress_parser(operation: &EncodeOperation) -> Box<dyn ProgressParser> {
    match operation {
        EncodeOperation::Crop {
            duration_ms,
            frame_rate,
            ..
        } => Box::new(FrameProgress::new(*duration_ms, *frame_rate)),
        other => Box::new(TimestampProgress::new(other.expected_duration_ms())),
    }
}

/// Remove whatever the encoder left behind for a job that did not succeed
async fn discard_partial(output: &Path) {
    let output: PathBuf = output.to_path_buf();
    match tokio::fs::remove_file(&output).await {
        Ok(()) => debug!("Removed partial output {}", output.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove partial output {}: {}", output.display(), e),
    }
}
