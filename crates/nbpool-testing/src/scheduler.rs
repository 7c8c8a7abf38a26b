//! Instrumented schedulers.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::ThreadId;

use nbpool::Scheduler;
use nbpool::scheduler::Task;
use parking_lot::Mutex;

#[derive(Debug, Default)]
struct Counters {
    scheduled: AtomicUsize,
    ran_inline: AtomicUsize,
    completed: AtomicUsize,
}

/// Wraps another scheduler and counts what goes through it.
///
/// Also records how often a task ran on the thread that scheduled it, which
/// should never happen with the schedulers shipped by `nbpool`.
#[derive(Clone)]
pub struct CountingScheduler<S> {
    inner: S,
    counters: Arc<Counters>,
    threads: Arc<Mutex<Vec<ThreadId>>>,
}

impl<S: Scheduler> CountingScheduler<S> {
    /// Wrap `inner`.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            counters: Arc::default(),
            threads: Arc::default(),
        }
    }

    /// Number of tasks scheduled so far.
    #[must_use]
    pub fn scheduled(&self) -> usize {
        self.counters.scheduled.load(Ordering::SeqCst)
    }

    /// Number of tasks that have finished running.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.counters.completed.load(Ordering::SeqCst)
    }

    /// Number of tasks that ran on the thread that scheduled them.
    #[must_use]
    pub fn ran_inline(&self) -> usize {
        self.counters.ran_inline.load(Ordering::SeqCst)
    }

    /// Threads tasks ran on, in completion order.
    #[must_use]
    pub fn threads(&self) -> Vec<ThreadId> {
        self.threads.lock().clone()
    }
}

impl<S: Scheduler> Scheduler for CountingScheduler<S> {
    fn schedule(&self, task: Task) {
        self.counters.scheduled.fetch_add(1, Ordering::SeqCst);
        let origin = std::thread::current().id();
        let counters = Arc::clone(&self.counters);
        let threads = Arc::clone(&self.threads);
        self.inner.schedule(Box::new(move || {
            let here = std::thread::current().id();
            if here == origin {
                counters.ran_inline.fetch_add(1, Ordering::SeqCst);
            }
            task();
            threads.lock().push(here);
            counters.completed.fetch_add(1, Ordering::SeqCst);
        }));
    }
}
