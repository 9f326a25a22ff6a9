//! Command implementations

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tokio::runtime::Runtime;
use tracing::{info, warn};

use crate::adapters::{FfmpegAdapter, VtrimConfig};
use crate::cli::args::{
    CompressArgs, CropArgs, CropSpec, CutArgs, EditArgs, InspectArgs, RangeArgs, TrimArgs,
};
use crate::container::Movie;
use crate::dispatcher::{Anchor, MainThreadDispatcher};
use crate::domain::model::{CropRect, JobStatus, MediaMetadata, MediaTime, Selection, TrimRange};
use crate::domain::rules::{CropMapper, SelectionPolicy};
use crate::engine::{
    ConsoleListener, ContainerTrimEngine, DispatchedListener, EncodingOrchestrator, JsonListener,
    StatusRecorder, TrimRequest,
};
use crate::output::OutputWriter;
use crate::ports::{EncoderPort, JobListener, ProbePort};
use crate::scheduler::{default_workers, SchedulerConfig, TaskScheduler};
use crate::utils::time::{format_position, TimeParser};

/// How long to wait for queued listener callbacks before exiting
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings shared by every command
#[derive(Debug, Clone)]
pub struct AppContext {
    pub config: VtrimConfig,
    /// Emit JSON events instead of the console progress bar
    pub json: bool,
}

impl AppContext {
    fn destination(&self, dest: &Option<PathBuf>) -> PathBuf {
        dest.clone()
            .unwrap_or_else(|| self.config.destination_dir.clone())
    }
}

/// Process exit code for a job outcome
pub fn exit_code(status: &JobStatus) -> ExitCode {
    match status {
        JobStatus::Success(_) => ExitCode::SUCCESS,
        JobStatus::Failed(_) => ExitCode::from(1),
        JobStatus::Cancelled => ExitCode::from(130),
    }
}

/// Execute the trim command
pub fn trim(args: TrimArgs, ctx: &AppContext) -> Result<JobStatus> {
    info!("Starting trim operation");
    ensure_input(&args.range.input)?;

    let movie = Movie::open(&args.range.input).context("Failed to read input container")?;
    let duration_ms = MediaTime::new(movie.duration(), movie.timescale).as_millis();
    let range = resolve_range(&args.range, duration_ms, &ctx.config)?;

    let scheduler = TaskScheduler::with_config(SchedulerConfig {
        workers: ctx.config.worker_threads.unwrap_or_else(default_workers),
        timers: true,
    })?;
    let engine = ContainerTrimEngine::new(Arc::new(scheduler));

    let surface = ControlSurface::new(ctx.json)?;
    let recorder = surface.listener(&args.job_id);
    let request = TrimRequest {
        job_id: args.job_id.clone(),
        source: args.range.input.clone(),
        start_ms: range.start_ms,
        end_ms: range.end_ms,
        destination_dir: ctx.destination(&args.dest),
    };
    let handle = engine.trim(request, recorder.clone())?;

    runtime()?.block_on(async {
        let waiter = handle.clone();
        let mut done = tokio::task::spawn_blocking(move || {
            while !waiter.wait_timeout(Duration::from_millis(250)) {}
        });
        tokio::select! {
            _ = &mut done => {}
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, cancelling {}", args.job_id);
                engine.cancel(&args.job_id);
                let _ = done.await;
            }
        }
    });

    surface.finish();
    Ok(recorder.status().unwrap_or_else(|| {
        warn!("Trim job {} stopped before reporting an outcome", args.job_id);
        JobStatus::Cancelled
    }))
}

/// Execute the cut command
pub fn cut(args: CutArgs, ctx: &AppContext) -> Result<JobStatus> {
    info!("Starting cut operation");
    ensure_input(&args.range.input)?;

    runtime()?.block_on(async {
        let metadata = probe(&args.range.input, ctx).await?;
        let range = resolve_range(&args.range, metadata.duration_ms, &ctx.config)?;
        let output = output_path(&args.range.input, &ctx.destination(&args.dest))?;

        let surface = ControlSurface::new(ctx.json)?;
        let recorder = surface.listener("cut");
        let orchestrator = orchestrator(ctx);
        let status = cancellable(
            &orchestrator,
            orchestrator.trim_only(&args.range.input, &output, range, recorder.as_ref()),
        )
        .await;
        surface.finish();
        Ok::<_, anyhow::Error>(status)
    })
}

/// Execute the crop command
pub fn crop(args: CropArgs, ctx: &AppContext) -> Result<JobStatus> {
    info!("Starting crop operation");
    ensure_input(&args.input)?;

    runtime()?.block_on(async {
        let metadata = probe(&args.input, ctx).await?;
        let rect = source_rect(&args.crop, &metadata)?;
        let output = output_path(&args.input, &ctx.destination(&args.dest))?;

        let surface = ControlSurface::new(ctx.json)?;
        let recorder = surface.listener("crop");
        let orchestrator = orchestrator(ctx);
        let status = cancellable(
            &orchestrator,
            orchestrator.crop_only(&args.input, &output, rect, &metadata, recorder.as_ref()),
        )
        .await;
        surface.finish();
        Ok::<_, anyhow::Error>(status)
    })
}

/// Execute the edit command
pub fn edit(args: EditArgs, ctx: &AppContext) -> Result<JobStatus> {
    info!("Starting edit operation");
    ensure_input(&args.range.input)?;
    let quality = args.quality.unwrap_or(ctx.config.quality);

    runtime()?.block_on(async {
        let metadata = probe(&args.range.input, ctx).await?;
        let range = resolve_range(&args.range, metadata.duration_ms, &ctx.config)?;
        let rect = source_rect(&args.crop, &metadata)?;
        let output = output_path(&args.range.input, &ctx.destination(&args.dest))?;

        let surface = ControlSurface::new(ctx.json)?;
        let recorder = surface.listener("edit");
        let orchestrator = orchestrator(ctx);
        let status = cancellable(
            &orchestrator,
            orchestrator.trim_and_crop(
                &args.range.input,
                &output,
                range,
                rect,
                &metadata,
                quality,
                recorder.as_ref(),
            ),
        )
        .await;
        surface.finish();
        Ok::<_, anyhow::Error>(status)
    })
}

/// Execute the compress command
pub fn compress(args: CompressArgs, ctx: &AppContext) -> Result<JobStatus> {
    info!("Starting compress operation");
    ensure_input(&args.input)?;
    let quality = args.quality.unwrap_or(ctx.config.quality);

    runtime()?.block_on(async {
        let metadata = probe(&args.input, ctx).await?;
        let output = output_path(&args.input, &ctx.destination(&args.dest))?;

        let surface = ControlSurface::new(ctx.json)?;
        let recorder = surface.listener("compress");
        let orchestrator = orchestrator(ctx);
        let status = cancellable(
            &orchestrator,
            orchestrator.compress(
                &args.input,
                &output,
                args.size,
                &metadata,
                quality,
                recorder.as_ref(),
            ),
        )
        .await;
        surface.finish();
        Ok::<_, anyhow::Error>(status)
    })
}

#[derive(Debug, Serialize)]
struct InspectReport {
    path: PathBuf,
    metadata: Option<MediaMetadata>,
    tracks: Vec<TrackReport>,
    suggested_selection: Option<Selection>,
}

#[derive(Debug, Serialize)]
struct TrackReport {
    track_id: u32,
    handler: String,
    timescale: u32,
    samples: usize,
    duration_ms: u64,
    sync_samples: Option<usize>,
}

/// Execute the inspect command
pub fn inspect(args: InspectArgs, ctx: &AppContext) -> Result<()> {
    info!("Starting inspect operation");
    info!("Input: {}", args.input.display());
    ensure_input(&args.input)?;

    let metadata = match runtime()?.block_on(probe(&args.input, ctx)) {
        Ok(metadata) => Some(metadata),
        Err(e) => {
            warn!("Metadata probe failed: {:#}", e);
            None
        }
    };

    let (tracks, container_duration) = match Movie::open(&args.input) {
        Ok(movie) => {
            let tracks = movie
                .tracks
                .iter()
                .map(|t| TrackReport {
                    track_id: t.header.track_id,
                    handler: String::from_utf8_lossy(&t.handler).into_owned(),
                    timescale: t.timescale,
                    samples: t.samples.len(),
                    duration_ms: MediaTime::new(t.duration(), t.timescale).as_millis(),
                    sync_samples: t.sync_samples.as_ref().map(Vec::len),
                })
                .collect();
            let duration = MediaTime::new(movie.duration(), movie.timescale).as_millis();
            (tracks, Some(duration))
        }
        Err(e) => {
            warn!("Container not readable for stream-copy trimming: {}", e);
            (Vec::new(), None)
        }
    };

    let duration_ms = metadata
        .as_ref()
        .map(|m| m.duration_ms)
        .or(container_duration);
    if duration_ms.is_none() {
        bail!("Could not read {} as media", args.input.display());
    }
    let suggested_selection = duration_ms.map(|duration| {
        SelectionPolicy::initial(
            duration,
            Some(ctx.config.min_selection_ms),
            args.max_selection_ms,
        )
    });

    let report = InspectReport {
        path: args.input.clone(),
        metadata,
        tracks,
        suggested_selection,
    };

    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &InspectReport) {
    println!("File: {}", report.path.display());
    if let Some(meta) = &report.metadata {
        println!("Duration: {}", format_position(meta.duration_ms));
        println!(
            "Video: {} (displayed {}, rotation {})",
            meta.dimensions,
            meta.display_dimensions(),
            meta.rotation.degrees()
        );
        println!("Frame rate: {:.3}", meta.frame_rate_or_default());
        println!("Bitrate: {} bit/s", meta.bitrate_or_default());
    }
    for track in &report.tracks {
        let sync = match track.sync_samples {
            Some(count) => format!("{} sync samples", count),
            None => "all samples sync".to_string(),
        };
        println!(
            "Track {} [{}]: {} samples, {}, {}",
            track.track_id,
            track.handler,
            track.samples,
            format_position(track.duration_ms),
            sync
        );
    }
    if let Some(selection) = &report.suggested_selection {
        println!(
            "Suggested selection: {} - {}",
            format_position(selection.start_ms),
            format_position(selection.end_ms)
        );
    }
}

/// UI-side listener fed through the dispatcher thread
struct ControlSurface {
    dispatcher: Arc<MainThreadDispatcher>,
    anchor: Anchor<dyn JobListener>,
}

impl ControlSurface {
    fn new(json: bool) -> Result<Self> {
        let listener: Arc<dyn JobListener> = if json {
            Arc::new(JsonListener::new(true))
        } else {
            Arc::new(ConsoleListener::new(false))
        };
        Ok(Self {
            dispatcher: Arc::new(MainThreadDispatcher::new()?),
            anchor: Anchor::new(listener),
        })
    }

    /// Listener for one job, recording its outcome as it is reported
    fn listener(&self, group: &str) -> Arc<StatusRecorder> {
        let dispatched = DispatchedListener::new(
            Arc::clone(&self.dispatcher),
            group,
            self.anchor.handle(),
        );
        Arc::new(StatusRecorder::new(Arc::new(dispatched)))
    }

    /// Deliver everything already posted
    fn finish(&self) {
        if !self.dispatcher.flush(FLUSH_TIMEOUT) {
            warn!("Timed out delivering job events");
        }
    }
}

fn runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
}

fn ensure_input(path: &Path) -> Result<()> {
    if !path.is_file() {
        bail!("Input file does not exist: {}", path.display());
    }
    Ok(())
}

fn orchestrator(ctx: &AppContext) -> EncodingOrchestrator<FfmpegAdapter> {
    EncodingOrchestrator::new(FfmpegAdapter::new(&ctx.config.ffmpeg_path))
}

/// Run an encoder job, cancelling it on Ctrl+C
async fn cancellable<E, F>(orchestrator: &EncodingOrchestrator<E>, job: F) -> JobStatus
where
    E: EncoderPort,
    F: Future<Output = JobStatus>,
{
    tokio::pin!(job);
    tokio::select! {
        status = &mut job => status,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling encoder job");
            orchestrator.cancel();
            job.await
        }
    }
}

#[cfg(feature = "libav")]
fn probe_port(_ctx: &AppContext) -> Result<Box<dyn ProbePort>> {
    Ok(Box::new(crate::adapters::LibavProbeAdapter::new()?))
}

#[cfg(not(feature = "libav"))]
fn probe_port(ctx: &AppContext) -> Result<Box<dyn ProbePort>> {
    Ok(Box::new(crate::adapters::FfprobeAdapter::new(
        &ctx.config.ffprobe_path,
    )))
}

async fn probe(input: &Path, ctx: &AppContext) -> Result<MediaMetadata> {
    let port = probe_port(ctx)?;
    let metadata = port
        .probe(input)
        .await
        .with_context(|| format!("Failed to probe {}", input.display()))?;
    info!(
        "Media: {} ms, {}, rotation {}",
        metadata.duration_ms,
        metadata.dimensions,
        metadata.rotation.degrees()
    );
    Ok(metadata)
}

fn output_path(input: &Path, dest: &Path) -> Result<PathBuf> {
    let writer = OutputWriter::new(dest);
    writer.prepare().context("Failed to create output directory")?;
    let path = writer.next_output_path(input)?;
    info!("Output: {}", path.display());
    Ok(path)
}

/// Parse the requested range and widen it to the minimum selection
fn resolve_range(args: &RangeArgs, duration_ms: u64, config: &VtrimConfig) -> Result<TrimRange> {
    let parser = TimeParser::new();
    let start = parser
        .parse_millis(&args.start)
        .with_context(|| format!("Invalid start time '{}'", args.start))?;
    let mut end = parser
        .parse_millis(&args.end)
        .with_context(|| format!("Invalid end time '{}'", args.end))?;
    if start >= end {
        bail!("Start time must be before end time");
    }
    if duration_ms > 0 && end > duration_ms {
        info!("End {} ms clamped to source duration {} ms", end, duration_ms);
        end = duration_ms;
    }
    if start >= end {
        bail!("Start time {} ms is beyond the end of the source", start);
    }

    let min = args.min_selection_ms.unwrap_or(config.min_selection_ms);
    let requested = Selection::new(start, end);
    let selection = SelectionPolicy::widen_to_minimum(requested, duration_ms, min);
    if selection != requested {
        info!(
            "Selection widened to {} - {} ms (minimum {} ms)",
            selection.start_ms, selection.end_ms, min
        );
    }
    selection.to_range().context("Invalid time range")
}

/// Crop rectangle in source pixels, mapped from the drawing surface if given
fn source_rect(spec: &CropSpec, metadata: &MediaMetadata) -> Result<CropRect> {
    let rect = match spec.surface {
        Some(surface) => CropMapper::map_to_source(spec.rect, surface, metadata)?,
        None => spec.rect,
    };
    info!("Crop: {} at {},{}", rect.to_filter(), rect.x, rect.y);
    Ok(rect)
}
