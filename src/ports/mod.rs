// Ports - Interface definitions (contracts)

use std::path::Path;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::model::MediaMetadata;
use crate::error::VtrimResult;

/// Receiver of one job's lifecycle events
///
/// Exactly one of `on_result`, `on_error` or `on_cancelled` is delivered per
/// job that reports an outcome.
pub trait JobListener: Send + Sync {
    /// Called once the job has been picked up
    fn on_started(&self);

    /// Called with a percentage in `[0, 100]`
    fn on_progress(&self, percent: f32);

    /// Called when the output file is complete
    fn on_result(&self, output: &Path);

    /// Called when the job failed; `message` is never empty
    fn on_error(&self, message: &str);

    /// Called when the job stopped because the user cancelled it
    fn on_cancelled(&self);
}

/// Which encoder output a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderStream {
    /// Machine-readable `key=value` lines requested with `-progress`
    Progress,
    /// Human-readable log and statistics lines
    Log,
}

/// How an encoder invocation ended
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncoderExit {
    /// Process exit code; `None` when terminated by a signal
    pub code: Option<i32>,
    /// The process was killed in response to cancellation
    pub killed: bool,
    /// Last log lines, for error reporting
    pub diagnostic: String,
}

impl EncoderExit {
    pub fn success(&self) -> bool {
        !self.killed && self.code == Some(0)
    }
}

/// Port for running the external encoder
#[async_trait]
pub trait EncoderPort: Send + Sync {
    /// Run the encoder with `args`, feeding every output line to `on_line`
    ///
    /// Returns once the process has exited. When `cancel` fires the process is
    /// killed and the exit is reported with `killed` set. Failing to start the
    /// process is `EncoderUnavailable`.
    async fn execute(
        &self,
        args: &[String],
        on_line: &(dyn for<'line> Fn(EncoderStream, &'line str) + Send + Sync),
        cancel: &CancellationToken,
    ) -> VtrimResult<EncoderExit>;
}

/// Port for media metadata probing
#[async_trait]
pub trait ProbePort: Send + Sync {
    async fn probe(&self, path: &Path) -> VtrimResult<MediaMetadata>;
}
