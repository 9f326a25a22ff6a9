//! Stream-copy trimming by sample-table rewrite

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::container::{write_movie, Movie};
use crate::domain::model::TrimRange;
use crate::error::{VtrimError, VtrimResult};
use crate::output::OutputWriter;
use crate::planner::TrimPlanner;
use crate::ports::JobListener;
use crate::scheduler::{Task, TaskHandle, TaskScheduler};

/// What to trim and where to put the result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrimRequest {
    /// Cancellation key for this job
    pub job_id: String,
    pub source: PathBuf,
    pub start_ms: u64,
    pub end_ms: u64,
    pub destination_dir: PathBuf,
}

/// Trims containers without re-encoding, on the scheduler's pool
pub struct ContainerTrimEngine {
    scheduler: Arc<TaskScheduler>,
}

impl ContainerTrimEngine {
    /// Lane shared by all trim jobs; they run one at a time
    pub const LANE: &'static str = "trim";

    pub fn new(scheduler: Arc<TaskScheduler>) -> Self {
        Self { scheduler }
    }

    /// Schedule a trim job
    ///
    /// A job cancelled before it starts reports nothing. Once started it
    /// reports `on_started`, progress, then exactly one of `on_result`,
    /// `on_cancelled` or `on_error`.
    pub fn trim(
        &self,
        request: TrimRequest,
        listener: Arc<dyn JobListener>,
    ) -> VtrimResult<TaskHandle> {
        let job_id = request.job_id.clone();
        let task = Task::new(move |ctx| {
            if ctx.is_interrupted() {
                debug!("Trim job {} interrupted before start", request.job_id);
                return;
            }
            listener.on_started();

            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                execute(&request, &|| ctx.is_interrupted(), &mut |percent| {
                    listener.on_progress(percent)
                })
            }))
            .unwrap_or_else(|payload| {
                let reason = panic_reason(payload.as_ref());
                error!("Trim job {} aborted: {}", request.job_id, reason);
                Err(VtrimError::write(format!("trim aborted: {}", reason)))
            });
            match result {
                Ok(output) => listener.on_result(&output),
                Err(e) if e.is_cancellation() => {
                    info!("Trim job {} cancelled", request.job_id);
                    listener.on_cancelled();
                }
                Err(e) => listener.on_error(&e.to_string()),
            }
        })
        .with_id(job_id)
        .with_serial(Self::LANE);

        self.scheduler.schedule(task)
    }

    /// Perform a trim on the calling thread
    pub fn trim_blocking(&self, request: &TrimRequest) -> VtrimResult<PathBuf> {
        execute(request, &|| false, &mut |_| {})
    }

    /// Interrupt the job registered under `job_id`
    pub fn cancel(&self, job_id: &str) {
        self.scheduler.cancel_all(job_id, true);
    }
}

fn panic_reason(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "internal error".to_string())
}

fn execute(
    request: &TrimRequest,
    interrupted: &dyn Fn() -> bool,
    progress: &mut dyn FnMut(f32),
) -> VtrimResult<PathBuf> {
    let range = TrimRange::new(request.start_ms, request.end_ms)?;
    info!("Input: {}", request.source.display());
    info!("Requested range: {} - {} ms", range.start_ms, range.end_ms);

    let movie = Movie::open(&request.source)?;
    let plan = TrimPlanner::plan(&movie, range)?;
    let summary = plan.summary();
    info!(
        "Cutting {} - {} ms, samples per track {:?}",
        summary.start_ms, summary.end_ms, summary.samples_per_track
    );
    let trimmed = movie.slice(&plan.sample_ranges)?;

    let writer = OutputWriter::new(&request.destination_dir);
    let target = writer.next_output_path(&request.source)?;
    let mut scratch = writer.temp_file()?;

    let mut source = BufReader::new(File::open(&request.source)?);
    {
        let mut out = BufWriter::new(scratch.as_file_mut());
        write_movie(&mut source, &trimmed, &mut out, &mut |written, total| {
            if interrupted() {
                return Err(VtrimError::UserCancelled);
            }
            if total > 0 {
                progress((written as f64 * 100.0 / total as f64) as f32);
            }
            Ok(())
        })?;
        out.flush()?;
    }
    scratch.as_file().sync_all()?;

    writer.persist(scratch, &target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_reason_reads_payload() {
        let payload = panic::catch_unwind(|| panic!("boom {}", 7)).unwrap_err();
        assert_eq!(panic_reason(payload.as_ref()), "boom 7");

        let payload = panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_reason(payload.as_ref()), "static");
    }
}
