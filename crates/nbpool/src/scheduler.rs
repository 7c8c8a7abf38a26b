//! Execution contexts used to deliver resources to waiters.
//!
//! The drain loop never completes a waiter on its own stack. Each dispatch is
//! handed to a [`Scheduler`], which runs it somewhere else: a fresh tokio task
//! or a fresh OS thread. A caller that checks a resource in as soon as it
//! receives it therefore starts a new drain on a new stack instead of nesting
//! inside the previous one, however long the acquire/checkin chain grows.

use std::fmt;
use std::sync::Arc;

use tokio::runtime::Handle;

/// Unit of work submitted by the pool.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs dispatch tasks off the caller's stack.
pub trait Scheduler: Send + Sync + 'static {
    /// Run `task` on a context other than the current call stack.
    fn schedule(&self, task: Task);
}

impl<S: Scheduler + ?Sized> Scheduler for Arc<S> {
    fn schedule(&self, task: Task) {
        (**self).schedule(task);
    }
}

/// Schedules each task as a new tokio task.
#[derive(Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    /// Schedule onto the given runtime.
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Schedule onto the runtime the caller is running in, if any.
    #[must_use]
    pub fn try_current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }
}

impl fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioScheduler")
            .field("runtime", &self.handle.runtime_flavor())
            .finish()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, task: Task) {
        self.handle.spawn(async move { task() });
    }
}

/// Schedules each task on a newly spawned OS thread.
///
/// Useful when the pool is driven from synchronous code with no runtime.
///
/// If the OS refuses to spawn a thread, the task runs inline on the caller's
/// stack and a warning is logged. Deliveries are then no longer off-stack, so
/// a caller that checks in from inside its own delivery nests one level
/// deeper per round trip until threads can be spawned again.
#[derive(Debug, Clone, Default)]
pub struct ThreadScheduler {
    _private: (),
}

impl ThreadScheduler {
    /// Create a thread-per-dispatch scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for ThreadScheduler {
    fn schedule(&self, task: Task) {
        // `spawn` consumes the closure even on failure, so keep the task in a
        // shared cell that we can reclaim and run inline as a last resort.
        let cell = Arc::new(parking_lot::Mutex::new(Some(task)));
        let worker_cell = Arc::clone(&cell);
        let spawned = std::thread::Builder::new()
            .name("nbpool-dispatch".into())
            .spawn(move || {
                if let Some(task) = worker_cell.lock().take() {
                    task();
                }
            });
        if let Err(e) = spawned {
            tracing::warn!(error = %e, "failed to spawn dispatch thread, running inline");
            if let Some(task) = cell.lock().take() {
                task();
            }
        }
    }
}
