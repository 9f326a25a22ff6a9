//! Job listeners for CLI and UI integration

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::dispatcher::{LiveHandle, MainThreadDispatcher};
use crate::domain::model::JobStatus;
use crate::ports::JobListener;

/// Console listener rendering a progress bar on stderr
pub struct ConsoleListener {
    verbose: bool,
    last_percent: AtomicI32,
}

impl ConsoleListener {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            last_percent: AtomicI32::new(-1),
        }
    }
}

impl JobListener for ConsoleListener {
    fn on_started(&self) {
        if self.verbose {
            eprintln!("🚀 Started");
        }
    }

    fn on_progress(&self, percent: f32) {
        let whole = percent.clamp(0.0, 100.0) as i32;
        // Only redraw when the integer percentage moves
        if self.last_percent.swap(whole, Ordering::Relaxed) == whole {
            return;
        }
        let bar_length = 20;
        let filled = (whole as usize * bar_length) / 100;
        let bar = "█".repeat(filled) + &"░".repeat(bar_length - filled);
        eprint!("\r🔄 [{}] {:>3}%", bar, whole);
        let _ = std::io::stderr().flush();
    }

    fn on_result(&self, output: &Path) {
        if self.last_percent.load(Ordering::Relaxed) >= 0 {
            eprintln!();
        }
        println!("✅ Saved: {}", output.display());
    }

    fn on_error(&self, message: &str) {
        if self.last_percent.load(Ordering::Relaxed) >= 0 {
            eprintln!();
        }
        eprintln!("❌ Error: {}", message);
    }

    fn on_cancelled(&self) {
        if self.last_percent.load(Ordering::Relaxed) >= 0 {
            eprintln!();
        }
        eprintln!("⚠️  Cancelled");
    }
}

/// JSON listener writing one event object per line on stdout
pub struct JsonListener {
    output_progress_events: bool,
}

impl JsonListener {
    pub fn new(output_progress_events: bool) -> Self {
        Self {
            output_progress_events,
        }
    }
}

impl JobListener for JsonListener {
    fn on_started(&self) {
        let event = serde_json::json!({
            "event": "started",
            "timestamp": chrono::Utc::now().to_rfc3339()
        });
        println!("{}", event);
    }

    fn on_progress(&self, percent: f32) {
        if self.output_progress_events {
            let event = serde_json::json!({
                "event": "progress",
                "percent": percent,
                "timestamp": chrono::Utc::now().to_rfc3339()
            });
            println!("{}", event);
        }
    }

    fn on_result(&self, output: &Path) {
        let event = serde_json::json!({
            "event": "result",
            "output": output.display().to_string(),
            "timestamp": chrono::Utc::now().to_rfc3339()
        });
        println!("{}", event);
    }

    fn on_error(&self, message: &str) {
        let event = serde_json::json!({
            "event": "error",
            "error": message,
            "timestamp": chrono::Utc::now().to_rfc3339()
        });
        println!("{}", event);
    }

    fn on_cancelled(&self) {
        let event = serde_json::json!({
            "event": "cancelled",
            "timestamp": chrono::Utc::now().to_rfc3339()
        });
        println!("{}", event);
    }
}

/// Listener that ignores everything
pub struct NoOpListener;

impl JobListener for NoOpListener {
    fn on_started(&self) {}
    fn on_progress(&self, _percent: f32) {}
    fn on_result(&self, _output: &Path) {}
    fn on_error(&self, _message: &str) {}
    fn on_cancelled(&self) {}
}

/// Forwards to another listener and remembers the terminal outcome
pub struct StatusRecorder {
    inner: Arc<dyn JobListener>,
    status: Mutex<Option<JobStatus>>,
}

impl StatusRecorder {
    pub fn new(inner: Arc<dyn JobListener>) -> Self {
        Self {
            inner,
            status: Mutex::new(None),
        }
    }

    /// Terminal outcome, if one has been reported
    pub fn status(&self) -> Option<JobStatus> {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, status: JobStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = Some(status);
    }
}

impl JobListener for StatusRecorder {
    fn on_started(&self) {
        self.inner.on_started();
    }

    fn on_progress(&self, percent: f32) {
        self.inner.on_progress(percent);
    }

    fn on_result(&self, output: &Path) {
        self.record(JobStatus::Success(output.to_path_buf()));
        self.inner.on_result(output);
    }

    fn on_error(&self, message: &str) {
        self.record(JobStatus::Failed(message.to_string()));
        self.inner.on_error(message);
    }

    fn on_cancelled(&self) {
        self.record(JobStatus::Cancelled);
        self.inner.on_cancelled();
    }
}

/// Delivers callbacks on the dispatcher thread while the target is alive
///
/// Every callback is posted under `group`, so `cancel_all(group)` on the
/// dispatcher discards the ones not yet delivered.
pub struct DispatchedListener {
    dispatcher: Arc<MainThreadDispatcher>,
    group: String,
    target: LiveHandle<dyn JobListener>,
}

impl DispatchedListener {
    pub fn new(
        dispatcher: Arc<MainThreadDispatcher>,
        group: impl Into<String>,
        target: LiveHandle<dyn JobListener>,
    ) -> Self {
        Self {
            dispatcher,
            group: group.into(),
            target,
        }
    }

    fn post<F>(&self, deliver: F)
    where
        F: FnOnce(&dyn JobListener) + Send + 'static,
    {
        let target = self.target.clone();
        self.dispatcher.run_task(
            &self.group,
            move || {
                if let Some(listener) = target.get() {
                    deliver(listener.as_ref());
                }
            },
            Duration::ZERO,
        );
    }
}

impl JobListener for DispatchedListener {
    fn on_started(&self) {
        self.post(|l| l.on_started());
    }

    fn on_progress(&self, percent: f32) {
        self.post(move |l| l.on_progress(percent));
    }

    fn on_result(&self, output: &Path) {
        let output: PathBuf = output.to_path_buf();
        self.post(move |l| l.on_result(&output));
    }

    fn on_error(&self, message: &str) {
        let message = message.to_string();
        self.post(move |l| l.on_error(&message));
    }

    fn on_cancelled(&self) {
        self.post(|l| l.on_cancelled());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Anchor;
    use std::sync::atomic::{AtomicBool, AtomicU64};
    use std::sync::mpsc;

    struct TestListener {
        started: AtomicBool,
        progress_calls: AtomicU64,
        result: AtomicBool,
        error_called: AtomicBool,
        cancelled: AtomicBool,
    }

    impl TestListener {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                started: AtomicBool::new(false),
                progress_calls: AtomicU64::new(0),
                result: AtomicBool::new(false),
                error_called: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
            })
        }
    }

    impl JobListener for TestListener {
        fn on_started(&self) {
            self.started.store(true, Ordering::Relaxed);
        }

        fn on_progress(&self, _percent: f32) {
            self.progress_calls.fetch_add(1, Ordering::Relaxed);
        }

        fn on_result(&self, _output: &Path) {
            self.result.store(true, Ordering::Relaxed);
        }

        fn on_error(&self, _message: &str) {
            self.error_called.store(true, Ordering::Relaxed);
        }

        fn on_cancelled(&self) {
            self.cancelled.store(true, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_status_recorder_forwards_and_records() {
        let inner = TestListener::new();
        let recorder = StatusRecorder::new(inner.clone());
        assert_eq!(recorder.status(), None);

        recorder.on_started();
        recorder.on_progress(50.0);
        recorder.on_error("boom");

        assert!(inner.started.load(Ordering::Relaxed));
        assert_eq!(inner.progress_calls.load(Ordering::Relaxed), 1);
        assert!(inner.error_called.load(Ordering::Relaxed));
        assert_eq!(recorder.status(), Some(JobStatus::Failed("boom".to_string())));
    }

    #[test]
    fn test_dispatched_listener_delivers_on_dispatch_thread() {
        let dispatcher = Arc::new(MainThreadDispatcher::new().unwrap());
        let target = TestListener::new();
        let shared: Arc<dyn JobListener> = target.clone();
        let anchor = Anchor::new(shared);
        let listener = DispatchedListener::new(dispatcher.clone(), "job", anchor.handle());

        listener.on_started();
        listener.on_result(Path::new("/tmp/out.mp4"));

        let (tx, rx) = mpsc::channel();
        let probe = dispatcher.clone();
        dispatcher.run_task("", move || tx.send(probe.is_dispatch_thread()).unwrap(), Duration::ZERO);
        assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap());

        assert!(target.started.load(Ordering::Relaxed));
        assert!(target.result.load(Ordering::Relaxed));
    }

    #[test]
    fn test_dispatched_listener_skips_invalidated_target() {
        let dispatcher = Arc::new(MainThreadDispatcher::new().unwrap());
        let target = TestListener::new();
        let shared: Arc<dyn JobListener> = target.clone();
        let anchor = Anchor::new(shared);
        let listener = DispatchedListener::new(dispatcher.clone(), "job", anchor.handle());
        anchor.invalidate();

        listener.on_cancelled();

        let (tx, rx) = mpsc::channel();
        dispatcher.run_task("", move || tx.send(()).unwrap(), Duration::ZERO);
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(!target.cancelled.load(Ordering::Relaxed));
    }
}
