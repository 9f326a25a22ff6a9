//! Task definitions for the background scheduler

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Work closure executed on a pool worker
pub(crate) type Work = Box<dyn FnOnce(&TaskContext) + Send + 'static>;

/// Lifecycle of a scheduled task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Registered, waiting for its lane or its delay
    Queued,
    /// Executing on a worker
    Running,
    /// Dropped or interrupted by `cancel_all`
    Cancelled,
    /// Ran to the end (including a caught panic)
    Completed,
}

impl TaskState {
    /// Whether the task will never run again
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Cancelled | TaskState::Completed)
    }
}

/// A unit of background work
///
/// An empty `id` or `serial` is treated as absent. A task with neither is
/// fire-and-forget: it cannot be cancelled and is never retained.
pub struct Task {
    pub(crate) id: Option<String>,
    pub(crate) serial: Option<String>,
    pub(crate) delay: Duration,
    pub(crate) work: Work,
}

impl Task {
    /// Create a new task around a blocking closure
    pub fn new<F>(work: F) -> Self
    where
        F: FnOnce(&TaskContext) + Send + 'static,
    {
        Self {
            id: None,
            serial: None,
            delay: Duration::ZERO,
            work: Box::new(work),
        }
    }

    /// Set the cancellation key
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = non_empty(id.into());
        self
    }

    /// Set the ordering lane
    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = non_empty(serial.into());
        self
    }

    /// Delay execution by at least `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Cancellation key, if any
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Ordering lane, if any
    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    /// Requested delay
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("serial", &self.serial)
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// State shared between the registry, the worker and any [`TaskHandle`]
pub(crate) struct TaskShared {
    /// Set by whichever of the run path or the cancel path gets there first
    managed: AtomicBool,
    interrupted: AtomicBool,
    state: Mutex<TaskState>,
    changed: Condvar,
}

impl TaskShared {
    pub(crate) fn new() -> Self {
        Self {
            managed: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
            state: Mutex::new(TaskState::Queued),
            changed: Condvar::new(),
        }
    }

    /// Take ownership of post-execution; `true` for exactly one caller
    pub(crate) fn claim(&self) -> bool {
        !self.managed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
    }

    pub(crate) fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        let mut current = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *current = state;
        self.changed.notify_all();
    }

    pub(crate) fn state(&self) -> TaskState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_terminal(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while !state.is_terminal() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            state = self
                .changed
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

/// Execution context handed to a running task
pub struct TaskContext {
    pub(crate) id: Option<String>,
    pub(crate) serial: Option<String>,
    pub(crate) shared: Arc<TaskShared>,
}

impl TaskContext {
    /// Cancellation key of the running task
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Lane of the running task
    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    /// Whether `cancel_all(id, true)` has been issued for this task
    pub fn is_interrupted(&self) -> bool {
        self.shared.is_interrupted()
    }
}

/// Observer for a scheduled task
#[derive(Clone)]
pub struct TaskHandle {
    shared: Arc<TaskShared>,
}

impl TaskHandle {
    pub(crate) fn new(shared: Arc<TaskShared>) -> Self {
        Self { shared }
    }

    /// Current state
    pub fn state(&self) -> TaskState {
        self.shared.state()
    }

    /// Block until the task is completed or cancelled; `false` on timeout
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.shared.wait_terminal(timeout)
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("state", &self.state())
            .finish()
    }
}
