//! Integration tests for container parsing, trim planning and the trim engine

mod common;

use std::io::Cursor;
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use common::{build_mp4, ftyp_only, patch_fourcc, write_mp4, RecordingListener, TrackSpec};
use tempfile::TempDir;
use vtrim::container::Movie;
use vtrim::domain::model::{MediaTime, TrimRange};
use vtrim::engine::{ContainerTrimEngine, TrimRequest};
use vtrim::error::VtrimError;
use vtrim::planner::TrimPlanner;
use vtrim::ports::JobListener;
use vtrim::scheduler::{SchedulerConfig, Task, TaskScheduler, TaskState};

const WAIT: Duration = Duration::from_secs(10);

fn parse(bytes: Vec<u8>) -> Result<Movie, VtrimError> {
    Movie::read_from(&mut Cursor::new(bytes))
}

fn duration_ms(movie: &Movie) -> u64 {
    MediaTime::new(movie.duration(), movie.timescale).as_millis()
}

fn engine() -> (Arc<TaskScheduler>, ContainerTrimEngine) {
    let scheduler = Arc::new(
        TaskScheduler::with_config(SchedulerConfig {
            workers: 2,
            timers: true,
        })
        .unwrap(),
    );
    let engine = ContainerTrimEngine::new(Arc::clone(&scheduler));
    (scheduler, engine)
}

/// Cancels its own job as soon as it starts
struct CancelOnStart {
    engine: Arc<ContainerTrimEngine>,
    job_id: String,
    recorded: RecordingListener,
}

impl JobListener for CancelOnStart {
    fn on_started(&self) {
        self.recorded.on_started();
        self.engine.cancel(&self.job_id);
    }

    fn on_progress(&self, percent: f32) {
        self.recorded.on_progress(percent);
    }

    fn on_result(&self, output: &Path) {
        self.recorded.on_result(output);
    }

    fn on_error(&self, message: &str) {
        self.recorded.on_error(message);
    }

    fn on_cancelled(&self) {
        self.recorded.on_cancelled();
    }
}

fn request(dir: &TempDir, job_id: &str, start_ms: u64, end_ms: u64) -> TrimRequest {
    TrimRequest {
        job_id: job_id.to_string(),
        source: dir.path().join("source.mp4"),
        start_ms,
        end_ms,
        destination_dir: dir.path().join("out"),
    }
}

#[test]
fn test_generated_file_parses_back() {
    let movie = parse(build_mp4(&[
        TrackSpec::video(50, 40, Some(vec![1, 26])),
        TrackSpec::audio(94),
    ]))
    .unwrap();

    assert_eq!(movie.timescale, 1000);
    assert_eq!(movie.tracks.len(), 2);
    assert_eq!(movie.tracks[0].samples.len(), 50);
    assert_eq!(movie.tracks[0].sync_samples, Some(vec![1, 26]));
    assert_eq!(movie.tracks[1].timescale, 48_000);
    assert!(movie.tracks[1].sync_samples.is_none());
    assert_eq!(movie.sync_tracks(), vec![0]);
    assert_eq!(duration_ms(&movie), 2005);
}

#[test]
fn test_plan_without_sync_samples_is_exact() {
    let movie = parse(build_mp4(&[TrackSpec::video(100, 100, None)])).unwrap();
    let plan = TrimPlanner::plan(&movie, TrimRange::new(1000, 9000).unwrap()).unwrap();

    assert_eq!(plan.sync_track, None);
    assert_eq!(plan.sample_ranges, vec![10..90]);
    let summary = plan.summary();
    assert_eq!((summary.start_ms, summary.end_ms), (1000, 9000));
}

#[test]
fn test_plan_aligns_to_sync_samples() {
    // Sync samples at 0, 2000, 4000 and 6000 ms
    let movie = parse(build_mp4(&[
        TrackSpec::video(80, 100, Some(vec![1, 21, 41, 61])),
        TrackSpec::audio(375),
    ]))
    .unwrap();
    let plan = TrimPlanner::plan(&movie, TrimRange::new(2500, 5500).unwrap()).unwrap();

    assert_eq!(plan.sync_track, Some(0));
    let summary = plan.summary();
    assert_eq!((summary.requested_start_ms, summary.requested_end_ms), (2500, 5500));
    assert_eq!((summary.start_ms, summary.end_ms), (2000, 6000));
    assert_eq!(plan.sample_ranges[0], 20..60);
    // Audio follows the corrected bounds: frame 93 starts at 1984 ms, frame 281 at 5994.67 ms
    assert_eq!(plan.sample_ranges[1], 93..281);
}

#[test]
fn test_plan_rejects_two_sync_tracks() {
    let movie = parse(build_mp4(&[
        TrackSpec::video(20, 100, Some(vec![1, 11])),
        TrackSpec::video(20, 100, Some(vec![1])),
    ]))
    .unwrap();

    let err = TrimPlanner::plan(&movie, TrimRange::new(0, 1000).unwrap()).unwrap_err();
    assert!(matches!(err, VtrimError::MultipleSyncSampleTracks { count: 2 }));
}

#[test]
fn test_plan_rejects_start_beyond_source() {
    let movie = parse(build_mp4(&[TrackSpec::video(10, 100, None)])).unwrap();
    let err = TrimPlanner::plan(&movie, TrimRange::new(1500, 2000).unwrap()).unwrap_err();
    assert!(matches!(err, VtrimError::InvalidInput { .. }));
}

#[test]
fn test_plan_ignores_empty_sync_table() {
    let movie = parse(build_mp4(&[
        TrackSpec::video(60, 100, Some(vec![1, 21, 41])),
        TrackSpec::video(60, 100, Some(Vec::new())),
    ]))
    .unwrap();
    assert_eq!(movie.tracks[1].sync_samples, Some(Vec::new()));

    let plan = TrimPlanner::plan(&movie, TrimRange::new(1000, 3000).unwrap()).unwrap();
    assert_eq!(plan.sync_track, Some(0));
    let summary = plan.summary();
    assert_eq!((summary.start_ms, summary.end_ms), (0, 4000));
}

#[test]
fn test_plan_with_only_empty_sync_table_is_exact() {
    let movie = parse(build_mp4(&[TrackSpec::video(100, 100, Some(Vec::new()))])).unwrap();
    let plan = TrimPlanner::plan(&movie, TrimRange::new(1000, 9000).unwrap()).unwrap();

    assert_eq!(plan.sync_track, None);
    assert_eq!(plan.sample_ranges, vec![10..90]);
}

#[test]
fn test_huge_large_size_box_is_rejected() {
    let mut bytes = build_mp4(&[TrackSpec::video(10, 100, None)]);
    bytes.extend_from_slice(&1u32.to_be_bytes());
    bytes.extend_from_slice(b"free");
    bytes.extend_from_slice(&(u64::MAX - 4).to_be_bytes());

    let err = parse(bytes).unwrap_err();
    assert!(matches!(err, VtrimError::ContainerParse { .. }));
}

#[test]
fn test_fragmented_file_is_rejected() {
    let mut bytes = build_mp4(&[TrackSpec::video(10, 100, None)]);
    bytes.extend_from_slice(&[0, 0, 0, 8, b'm', b'o', b'o', b'f']);

    let err = parse(bytes).unwrap_err();
    assert!(matches!(err, VtrimError::ContainerParse { .. }));
}

#[test]
fn test_compact_sample_sizes_are_rejected() {
    let mut bytes = build_mp4(&[TrackSpec::video(10, 100, None)]);
    patch_fourcc(&mut bytes, b"stsz", b"stz2");

    let err = parse(bytes).unwrap_err();
    assert!(err.to_string().contains("stz2"));
}

#[test]
fn test_missing_movie_box_is_rejected() {
    let err = parse(ftyp_only()).unwrap_err();
    assert!(matches!(err, VtrimError::ContainerParse { .. }));
}

#[test]
fn test_trim_blocking_keeps_exact_range() {
    let dir = TempDir::new().unwrap();
    write_mp4(&dir.path().join("source.mp4"), &[TrackSpec::video(100, 100, None)]);
    let (_scheduler, engine) = engine();

    let output = engine.trim_blocking(&request(&dir, "exact", 1000, 9000)).unwrap();

    let name = output.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("t_"));
    assert!(name.ends_with("_source.mp4"));
    assert_eq!(output.parent().unwrap(), dir.path().join("out"));

    let trimmed = Movie::open(&output).unwrap();
    assert_eq!(trimmed.tracks[0].samples.len(), 80);
    assert_eq!(duration_ms(&trimmed), 8000);
}

#[test]
fn test_trim_full_range_preserves_duration() {
    let dir = TempDir::new().unwrap();
    write_mp4(
        &dir.path().join("source.mp4"),
        &[
            TrackSpec::video(75, 40, Some(vec![1, 26, 51])),
            TrackSpec::audio(141),
        ],
    );
    let source = Movie::open(&dir.path().join("source.mp4")).unwrap();
    let total = duration_ms(&source);
    let (_scheduler, engine) = engine();

    let output = engine.trim_blocking(&request(&dir, "full", 0, total)).unwrap();
    let trimmed = Movie::open(&output).unwrap();

    assert!(duration_ms(&trimmed).abs_diff(total) <= 40);
    assert_eq!(trimmed.tracks[0].samples.len(), 75);
    assert_eq!(trimmed.tracks[0].sync_samples, Some(vec![1, 26, 51]));
}

#[test]
fn test_trim_copies_sample_payloads() {
    let dir = TempDir::new().unwrap();
    let source_path = dir.path().join("source.mp4");
    write_mp4(&source_path, &[TrackSpec::video(20, 100, None)]);
    let (_scheduler, engine) = engine();

    let output = engine.trim_blocking(&request(&dir, "copy", 500, 1500)).unwrap();

    let source = Movie::open(&source_path).unwrap();
    let trimmed = Movie::open(&output).unwrap();
    let source_bytes = std::fs::read(&source_path).unwrap();
    let output_bytes = std::fs::read(&output).unwrap();
    for (kept, original) in trimmed.tracks[0]
        .samples
        .iter()
        .zip(&source.tracks[0].samples[5..])
    {
        let a = &output_bytes[kept.offset as usize..][..kept.size as usize];
        let b = &source_bytes[original.offset as usize..][..original.size as usize];
        assert_eq!(a, b);
    }
}

#[test]
fn test_scheduled_trim_reports_result() {
    let dir = TempDir::new().unwrap();
    write_mp4(&dir.path().join("source.mp4"), &[TrackSpec::video(100, 100, None)]);
    let (_scheduler, engine) = engine();
    let listener = Arc::new(RecordingListener::default());

    let handle = engine
        .trim(request(&dir, "job-1", 2000, 4000), listener.clone())
        .unwrap();
    assert!(handle.wait_timeout(WAIT));
    assert_eq!(handle.state(), TaskState::Completed);

    let milestones = listener.milestones();
    assert_eq!(milestones.len(), 2);
    assert_eq!(milestones[0], "started");
    assert!(milestones[1].starts_with("result "));
    assert!(listener.events().iter().any(|e| e == "progress 100"));
}

#[test]
fn test_scheduled_trim_reports_error_for_bad_source() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("source.mp4"), ftyp_only()).unwrap();
    let (_scheduler, engine) = engine();
    let listener = Arc::new(RecordingListener::default());

    let handle = engine
        .trim(request(&dir, "bad", 0, 1000), listener.clone())
        .unwrap();
    assert!(handle.wait_timeout(WAIT));

    let milestones = listener.milestones();
    assert_eq!(milestones.len(), 2);
    assert!(milestones[1].starts_with("error "));
    assert!(!dir.path().join("out").exists());
}

#[test]
fn test_scheduled_trim_reports_error_for_oversized_box() {
    let dir = TempDir::new().unwrap();
    let mut bytes = build_mp4(&[TrackSpec::video(100, 100, None)]);
    bytes.extend_from_slice(&1u32.to_be_bytes());
    bytes.extend_from_slice(b"free");
    bytes.extend_from_slice(&(u64::MAX - 4).to_be_bytes());
    std::fs::write(dir.path().join("source.mp4"), bytes).unwrap();
    let (_scheduler, engine) = engine();
    let listener = Arc::new(RecordingListener::default());

    let handle = engine
        .trim(request(&dir, "oversized", 0, 1000), listener.clone())
        .unwrap();
    assert!(handle.wait_timeout(WAIT));

    let milestones = listener.milestones();
    assert_eq!(milestones.len(), 2);
    assert_eq!(milestones[0], "started");
    assert!(milestones[1].starts_with("error "));
}

#[test]
fn test_started_trim_cancel_reports_once_and_leaves_nothing() {
    let dir = TempDir::new().unwrap();
    write_mp4(
        &dir.path().join("source.mp4"),
        &[
            TrackSpec::video(100, 100, Some(vec![1, 26, 51, 76])),
            TrackSpec::audio(470),
        ],
    );
    let (_scheduler, engine) = engine();
    let engine = Arc::new(engine);
    let listener = Arc::new(CancelOnStart {
        engine: Arc::clone(&engine),
        job_id: "running".to_string(),
        recorded: RecordingListener::default(),
    });

    let handle = engine
        .trim(request(&dir, "running", 0, 9000), listener.clone())
        .unwrap();
    assert!(handle.wait_timeout(WAIT));
    assert_eq!(handle.state(), TaskState::Cancelled);

    assert_eq!(
        listener.recorded.milestones(),
        vec!["started".to_string(), "cancelled".to_string()]
    );
    let out = dir.path().join("out");
    let leftovers = match std::fs::read_dir(&out) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    };
    assert_eq!(leftovers, 0);
}

#[test]
fn test_trim_cancelled_while_queued_reports_nothing() {
    let dir = TempDir::new().unwrap();
    write_mp4(&dir.path().join("source.mp4"), &[TrackSpec::video(100, 100, None)]);
    let (scheduler, engine) = engine();
    let listener = Arc::new(RecordingListener::default());

    // Occupy the trim lane so the job stays queued
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let blocker = scheduler
        .schedule(
            Task::new(move |_| {
                release_rx.recv_timeout(WAIT).ok();
            })
            .with_serial(ContainerTrimEngine::LANE),
        )
        .unwrap();

    let shared: Arc<dyn JobListener> = listener.clone();
    let handle = engine.trim(request(&dir, "queued", 0, 5000), shared).unwrap();
    engine.cancel("queued");
    assert_eq!(handle.state(), TaskState::Cancelled);

    release_tx.send(()).unwrap();
    assert!(blocker.wait_timeout(WAIT));
    std::thread::sleep(Duration::from_millis(50));

    assert!(listener.events().is_empty());
    assert_eq!(scheduler.registered(), 0);
}
