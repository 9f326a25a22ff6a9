//! Single-thread callback dispatcher
//!
//! Posted callbacks run one at a time on a dedicated thread, in due-time
//! order. Callbacks posted under a non-empty id share a reference-counted
//! token; `cancel_all(id)` retires the token and discards every callback of
//! that group that has not started yet.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use tracing::{debug, error};

use crate::error::VtrimResult;

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Dispatcher bound to one dedicated execution thread
pub struct MainThreadDispatcher {
    shared: Arc<DispatchShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

struct DispatchShared {
    tokens: Mutex<HashMap<String, Arc<Token>>>,
    queue: Mutex<Queue>,
    wakeup: Condvar,
}

#[derive(Default)]
struct Queue {
    next_seq: u64,
    pending: Vec<Posted>,
    shutdown: bool,
}

struct Posted {
    seq: u64,
    due: Instant,
    token: Option<Arc<Token>>,
    callback: Callback,
}

/// Cancellation group; only touched under the token map lock
struct Token {
    id: String,
    posted: Mutex<usize>,
}

impl MainThreadDispatcher {
    /// Start the dispatcher thread
    pub fn new() -> VtrimResult<Self> {
        let shared = Arc::new(DispatchShared {
            tokens: Mutex::new(HashMap::new()),
            queue: Mutex::new(Queue::default()),
            wakeup: Condvar::new(),
        });

        let loop_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("vtrim-dispatch".to_string())
            .spawn(move || loop_shared.run_loop())?;
        let thread_id = handle.thread().id();

        Ok(Self {
            shared,
            thread: Mutex::new(Some(handle)),
            thread_id,
        })
    }

    /// Post `callback` to run after `delay`, grouped under `id` when non-empty
    pub fn run_task<F>(&self, id: &str, callback: F, delay: Duration)
    where
        F: FnOnce() + Send + 'static,
    {
        let due = Instant::now() + delay;
        if id.is_empty() {
            self.shared.post(None, due, Box::new(callback));
            return;
        }

        // Token lock is held across the post so cancel_all cannot slip in between
        let mut tokens = self.shared.tokens();
        let token = tokens
            .entry(id.to_string())
            .or_insert_with(|| {
                Arc::new(Token {
                    id: id.to_string(),
                    posted: Mutex::new(0),
                })
            })
            .clone();
        *token.count() += 1;
        self.shared.post(Some(token), due, Box::new(callback));
        drop(tokens);
    }

    /// Retire the token for `id` and drop its callbacks that have not started
    pub fn cancel_all(&self, id: &str) {
        let mut tokens = self.shared.tokens();
        let Some(token) = tokens.remove(id) else {
            return;
        };

        let mut queue = self.shared.queue();
        let before = queue.pending.len();
        queue.pending.retain(|posted| {
            posted
                .token
                .as_ref()
                .map_or(true, |t| !Arc::ptr_eq(t, &token))
        });
        debug!(
            "Dispatcher discarded {} pending callbacks for {}",
            before - queue.pending.len(),
            id
        );
    }

    /// Whether the caller is running on the dispatcher thread
    pub fn is_dispatch_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Number of callbacks waiting to run
    pub fn pending(&self) -> usize {
        self.shared.queue().pending.len()
    }

    /// Whether a live token exists for `id`
    pub fn has_token(&self, id: &str) -> bool {
        self.shared.tokens().contains_key(id)
    }

    /// Block until every callback due now has run; `false` on timeout
    ///
    /// Always `false` on the dispatcher thread itself.
    pub fn flush(&self, timeout: Duration) -> bool {
        if self.is_dispatch_thread() {
            return false;
        }
        let (tx, rx) = mpsc::channel();
        self.run_task(
            "",
            move || {
                let _ = tx.send(());
            },
            Duration::ZERO,
        );
        rx.recv_timeout(timeout).is_ok()
    }

    /// Stop the dispatcher thread; pending callbacks are dropped
    pub fn shutdown(&self) {
        {
            let mut queue = self.shared.queue();
            queue.shutdown = true;
            queue.pending.clear();
        }
        self.shared.wakeup.notify_all();

        if self.is_dispatch_thread() {
            return;
        }
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Dispatcher thread terminated abnormally");
            }
        }
    }
}

impl Drop for MainThreadDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for MainThreadDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MainThreadDispatcher")
            .field("thread_id", &self.thread_id)
            .field("pending", &self.pending())
            .finish()
    }
}

impl Token {
    fn count(&self) -> MutexGuard<'_, usize> {
        self.posted.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DispatchShared {
    fn tokens(&self) -> MutexGuard<'_, HashMap<String, Arc<Token>>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn queue(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn post(&self, token: Option<Arc<Token>>, due: Instant, callback: Callback) {
        let mut queue = self.queue();
        if queue.shutdown {
            return;
        }
        queue.next_seq += 1;
        let seq = queue.next_seq;
        queue.pending.push(Posted {
            seq,
            due,
            token,
            callback,
        });
        self.wakeup.notify_one();
    }

    fn run_loop(&self) {
        while let Some(posted) = self.next_posted() {
            let Posted {
                seq,
                token,
                callback,
                ..
            } = posted;

            if panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
                error!("Dispatched callback {} panicked", seq);
            }
            if let Some(token) = token {
                self.release(&token);
            }
        }
        debug!("Dispatcher thread stopped");
    }

    /// Wait for the earliest due callback; `None` once shut down
    fn next_posted(&self) -> Option<Posted> {
        let mut queue = self.queue();
        loop {
            if queue.shutdown {
                return None;
            }

            let earliest = queue
                .pending
                .iter()
                .enumerate()
                .min_by_key(|(_, posted)| (posted.due, posted.seq))
                .map(|(index, posted)| (index, posted.due));

            let now = Instant::now();
            queue = match earliest {
                Some((index, due)) if due <= now => return Some(queue.pending.remove(index)),
                Some((_, due)) => {
                    self.wakeup
                        .wait_timeout(queue, due - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .wakeup
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    /// Drop one reference from a finished callback's token
    fn release(&self, token: &Arc<Token>) {
        let mut tokens = self.tokens();
        let mut count = token.count();
        *count = count.saturating_sub(1);
        if *count > 0 {
            return;
        }
        drop(count);

        // A cancel_all may have replaced the token under the same id
        if let Some(current) = tokens.remove(&token.id) {
            if !Arc::ptr_eq(&current, token) {
                tokens.insert(token.id.clone(), current);
            }
        }
    }
}

/// Owner side of an explicitly invalidated reference
///
/// The owner keeps the value alive; any number of [`LiveHandle`]s may observe
/// it and must check liveness before each use.
pub struct Anchor<T: ?Sized> {
    value: Arc<T>,
    alive: Arc<AtomicBool>,
}

impl<T: ?Sized> Anchor<T> {
    pub fn new(value: Arc<T>) -> Self {
        Self {
            value,
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Hand out an observer
    pub fn handle(&self) -> LiveHandle<T> {
        LiveHandle {
            value: Arc::downgrade(&self.value),
            alive: Arc::clone(&self.alive),
        }
    }

    /// Mark the value as torn down; handles stop resolving immediately
    pub fn invalidate(&self) {
        self.alive.store(false, Ordering::Release);
    }

    pub fn get(&self) -> &T {
        &self.value
    }
}

impl<T: ?Sized> Drop for Anchor<T> {
    fn drop(&mut self) {
        self.invalidate();
    }
}

/// Observer side of an [`Anchor`]
pub struct LiveHandle<T: ?Sized> {
    value: Weak<T>,
    alive: Arc<AtomicBool>,
}

impl<T: ?Sized> LiveHandle<T> {
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire) && self.value.strong_count() > 0
    }

    /// Resolve the value if its owner has not invalidated it
    pub fn get(&self) -> Option<Arc<T>> {
        if !self.alive.load(Ordering::Acquire) {
            return None;
        }
        self.value.upgrade()
    }
}

impl<T: ?Sized> Clone for LiveHandle<T> {
    fn clone(&self) -> Self {
        Self {
            value: Weak::clone(&self.value),
            alive: Arc::clone(&self.alive),
        }
    }
}
