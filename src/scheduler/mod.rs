//! Background task scheduler
//!
//! A fixed-size worker pool running blocking tasks. Tasks sharing a serial
//! lane run one at a time in submission order; tasks sharing an id can be
//! cancelled together. The registry of retained tasks is owned by the
//! scheduler and only reachable through [`TaskScheduler::schedule`] and
//! [`TaskScheduler::cancel_all`].

pub mod task;

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::{VtrimError, VtrimResult};
use task::{TaskShared, Work};

pub use task::{Task, TaskContext, TaskHandle, TaskState};

/// Worker pool configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of worker threads
    pub workers: usize,
    /// Whether delayed tasks are supported
    ///
    /// Delays are measured by the pool's own timer, which only advances while
    /// a worker is idle. With every worker busy, a delayed task starts once one
    /// frees up, later than its nominal delay.
    pub timers: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            timers: true,
        }
    }
}

/// Twice the available hardware parallelism
pub fn default_workers() -> usize {
    2 * num_cpus::get().max(1)
}

/// Parallel scheduler with serial lanes and id-based cancellation
pub struct TaskScheduler {
    runtime: Option<Runtime>,
    inner: Arc<Inner>,
}

struct Inner {
    handle: Handle,
    timers: bool,
    registry: Mutex<Registry>,
}

#[derive(Default)]
struct Registry {
    next_seq: u64,
    entries: Vec<Entry>,
}

struct Entry {
    seq: u64,
    id: Option<String>,
    serial: Option<String>,
    remaining_delay: Duration,
    target: Option<Instant>,
    execution_asked: bool,
    join: Option<JoinHandle<()>>,
    shared: Arc<TaskShared>,
    work: Option<Work>,
}

/// Everything a worker needs once the task leaves the registry lock
struct Launch {
    seq: u64,
    retained: bool,
    delay: Duration,
    id: Option<String>,
    serial: Option<String>,
    shared: Arc<TaskShared>,
    work: Work,
}

impl TaskScheduler {
    /// Create a scheduler with the default pool (2x cores, timers enabled)
    pub fn new() -> VtrimResult<Self> {
        Self::with_config(SchedulerConfig::default())
    }

    /// Create a scheduler with an explicit pool configuration
    pub fn with_config(config: SchedulerConfig) -> VtrimResult<Self> {
        if config.workers == 0 {
            return Err(VtrimError::invalid("scheduler needs at least one worker"));
        }

        let mut builder = Builder::new_multi_thread();
        builder
            .worker_threads(config.workers)
            .thread_name("vtrim-worker");
        if config.timers {
            builder.enable_time();
        }
        let runtime = builder.build()?;

        debug!(
            "Task scheduler started with {} workers (timers: {})",
            config.workers, config.timers
        );

        let inner = Arc::new(Inner {
            handle: runtime.handle().clone(),
            timers: config.timers,
            registry: Mutex::new(Registry::default()),
        });

        Ok(Self {
            runtime: Some(runtime),
            inner,
        })
    }

    /// Submit a task
    ///
    /// If another task of the same lane has already been handed to the pool,
    /// this one is parked until its predecessor finishes.
    pub fn schedule(&self, task: Task) -> VtrimResult<TaskHandle> {
        let Task {
            id,
            serial,
            delay,
            work,
        } = task;

        if !delay.is_zero() && !self.inner.timers {
            return Err(VtrimError::invalid(
                "the worker pool does not support delayed tasks",
            ));
        }

        let shared = Arc::new(TaskShared::new());
        let handle = TaskHandle::new(Arc::clone(&shared));
        let retained = id.is_some() || serial.is_some();

        let mut registry = self.inner.registry();
        let lane_busy = serial
            .as_deref()
            .map_or(false, |lane| registry.lane_busy(lane));

        registry.next_seq += 1;
        let mut entry = Entry {
            seq: registry.next_seq,
            id,
            serial,
            remaining_delay: delay,
            target: (!delay.is_zero()).then(|| Instant::now() + delay),
            execution_asked: false,
            join: None,
            shared,
            work: Some(work),
        };

        if lane_busy {
            debug!(
                "Task {} parked behind lane {:?}",
                entry.seq, entry.serial
            );
        } else {
            self.inner.start(&mut entry, retained);
        }

        if retained {
            registry.entries.push(entry);
        }

        Ok(handle)
    }

    /// Cancel every registered task carrying `id`
    ///
    /// Tasks that never reached the pool are dropped. Submitted tasks that have
    /// not started are prevented from starting and their lane moves on.
    /// Running tasks finish normally unless they observe the interruption
    /// flag, raised when `interrupt` is set.
    pub fn cancel_all(&self, id: &str, interrupt: bool) {
        let mut registry = self.inner.registry();

        registry.entries.retain(|entry| {
            if entry.id.as_deref() == Some(id) && !entry.execution_asked {
                entry.shared.set_state(TaskState::Cancelled);
                false
            } else {
                true
            }
        });

        let submitted: Vec<u64> = registry
            .entries
            .iter()
            .filter(|entry| entry.id.as_deref() == Some(id))
            .map(|entry| entry.seq)
            .collect();

        for seq in submitted {
            let Some(entry) = registry.entries.iter_mut().find(|e| e.seq == seq) else {
                continue;
            };

            if interrupt {
                entry.shared.interrupt();
            }
            match &entry.join {
                // Only stops tasks still waiting on their delay or a worker
                Some(join) => join.abort(),
                None => warn!("Task {} with id {} cannot be cancelled", seq, id),
            }

            if entry.shared.claim() {
                // Never started, so its run path will not finalize it
                entry.shared.set_state(TaskState::Cancelled);
                self.inner.finalize(&mut registry, seq);
            }
        }
    }

    /// Number of tasks currently retained in the registry
    pub fn registered(&self) -> usize {
        self.inner.registry().entries.len()
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl Registry {
    fn lane_busy(&self, lane: &str) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.execution_asked && entry.serial.as_deref() == Some(lane))
    }
}

impl Inner {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand an entry to the pool; caller holds the registry lock
    fn start(self: &Arc<Self>, entry: &mut Entry, retained: bool) {
        entry.execution_asked = true;
        let Some(work) = entry.work.take() else {
            return;
        };

        let launch = Launch {
            seq: entry.seq,
            retained,
            delay: entry.remaining_delay,
            id: entry.id.clone(),
            serial: entry.serial.clone(),
            shared: Arc::clone(&entry.shared),
            work,
        };

        let inner = Arc::clone(self);
        entry.join = Some(self.handle.spawn(async move {
            if !launch.delay.is_zero() {
                tokio::time::sleep(launch.delay).await;
            }
            inner.run(launch);
        }));
    }

    fn run(self: &Arc<Self>, launch: Launch) {
        if !launch.shared.claim() {
            // Cancelled and finalized before a worker picked it up
            return;
        }

        launch.shared.set_state(TaskState::Running);
        let context = TaskContext {
            id: launch.id,
            serial: launch.serial,
            shared: Arc::clone(&launch.shared),
        };

        let work = launch.work;
        if panic::catch_unwind(AssertUnwindSafe(|| work(&context))).is_err() {
            error!("Task {} panicked; lane continues", launch.seq);
        }

        if launch.retained {
            let mut registry = self.registry();
            self.finalize(&mut registry, launch.seq);
        }

        let state = if launch.shared.is_interrupted() {
            TaskState::Cancelled
        } else {
            TaskState::Completed
        };
        launch.shared.set_state(state);
    }

    /// Remove a task and release the next task of its lane
    fn finalize(self: &Arc<Self>, registry: &mut Registry, seq: u64) {
        let Some(position) = registry.entries.iter().position(|e| e.seq == seq) else {
            return;
        };
        let finished = registry.entries.remove(position);

        let Some(lane) = finished.serial else {
            return;
        };

        let next = registry
            .entries
            .iter_mut()
            .find(|e| e.serial.as_deref() == Some(lane.as_str()) && !e.execution_asked);

        if let Some(next) = next {
            if !next.remaining_delay.is_zero() {
                // The delay may have partly elapsed while parked
                next.remaining_delay = next
                    .target
                    .map(|target| target.saturating_duration_since(Instant::now()))
                    .unwrap_or_default();
            }
            debug!("Lane {} advances to task {}", lane, next.seq);
            self.start(next, true);
        }
    }
}
