//! Mock resources and factories.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use nbpool::ResourceFactory;
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

/// Errors produced by the mock factory and mock resources.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MockError {
    /// Injected creation failure.
    #[error("mock create failure for slot {0}")]
    Create(usize),
    /// Injected close failure.
    #[error("mock close failure for resource {0}")]
    Close(u64),
    /// A query the mock was told to reject.
    #[error("mock query failure: {0}")]
    Query(String),
}

/// A fake connection handed out by [`MockFactory`].
#[derive(Debug)]
pub struct MockResource {
    id: u64,
    slot: usize,
    executed: Vec<String>,
}

impl MockResource {
    /// Identity of this resource, unique per factory.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Slot the resource was created for.
    #[must_use]
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Statements executed on this resource, oldest first.
    #[must_use]
    pub fn executed(&self) -> &[String] {
        &self.executed
    }

    /// Pretend to run a statement. Statements containing `FAIL` are rejected.
    pub fn execute(&mut self, sql: &str) -> Result<u64, MockError> {
        if sql.contains("FAIL") {
            return Err(MockError::Query(sql.to_string()));
        }
        self.executed.push(sql.to_string());
        Ok(self.executed.len() as u64)
    }
}

#[derive(Debug, Default)]
struct MockState {
    next_id: AtomicU64,
    created: AtomicUsize,
    create_attempts: AtomicUsize,
    closed: Mutex<Vec<u64>>,
    fail_creates: AtomicUsize,
    fail_closes: AtomicBool,
    invalid: Mutex<HashSet<u64>>,
    created_slots: Mutex<Vec<usize>>,
    paused: Mutex<bool>,
    resumed: Condvar,
    held_creates: AtomicUsize,
}

/// A [`ResourceFactory`] producing [`MockResource`]s.
///
/// Clones share their counters, so a test can keep one clone and hand the
/// other to the pool.
#[derive(Debug, Clone, Default)]
pub struct MockFactory {
    state: Arc<MockState>,
}

impl MockFactory {
    /// Create a factory that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` creations fail.
    pub fn fail_next_creates(&self, count: usize) {
        self.state.fail_creates.store(count, Ordering::SeqCst);
    }

    /// Make every close fail (the resource is still counted as closed).
    pub fn fail_closes(&self, enabled: bool) {
        self.state.fail_closes.store(enabled, Ordering::SeqCst);
    }

    /// Make every `create` call block until [`resume_creates`] is called.
    ///
    /// [`resume_creates`]: Self::resume_creates
    pub fn pause_creates(&self) {
        *self.state.paused.lock() = true;
    }

    /// Release every `create` call blocked by [`pause_creates`].
    ///
    /// [`pause_creates`]: Self::pause_creates
    pub fn resume_creates(&self) {
        *self.state.paused.lock() = false;
        self.state.resumed.notify_all();
    }

    /// Number of `create` calls currently held by [`pause_creates`].
    ///
    /// [`pause_creates`]: Self::pause_creates
    #[must_use]
    pub fn held_creates(&self) -> usize {
        self.state.held_creates.load(Ordering::SeqCst)
    }

    /// Mark a resource as no longer valid for reuse.
    pub fn invalidate(&self, id: u64) {
        self.state.invalid.lock().insert(id);
    }

    /// Number of resources successfully created.
    #[must_use]
    pub fn created(&self) -> usize {
        self.state.created.load(Ordering::SeqCst)
    }

    /// Number of times `create` was called, including failures.
    #[must_use]
    pub fn create_attempts(&self) -> usize {
        self.state.create_attempts.load(Ordering::SeqCst)
    }

    /// Number of close attempts.
    #[must_use]
    pub fn closed(&self) -> usize {
        self.state.closed.lock().len()
    }

    /// Ids of closed resources, in close order.
    #[must_use]
    pub fn closed_ids(&self) -> Vec<u64> {
        self.state.closed.lock().clone()
    }

    /// Slots passed to successful creations, in creation order.
    #[must_use]
    pub fn created_slots(&self) -> Vec<usize> {
        self.state.created_slots.lock().clone()
    }
}

impl ResourceFactory for MockFactory {
    type Resource = MockResource;
    type Error = MockError;

    fn create(&self, slot: usize) -> Result<MockResource, MockError> {
        self.state.create_attempts.fetch_add(1, Ordering::SeqCst);
        {
            let mut paused = self.state.paused.lock();
            if *paused {
                self.state.held_creates.fetch_add(1, Ordering::SeqCst);
                while *paused {
                    self.state.resumed.wait(&mut paused);
                }
                self.state.held_creates.fetch_sub(1, Ordering::SeqCst);
            }
        }

        let should_fail = self
            .state
            .fail_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(MockError::Create(slot));
        }

        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst);
        self.state.created.fetch_add(1, Ordering::SeqCst);
        self.state.created_slots.lock().push(slot);
        tracing::trace!(id, slot, "mock resource created");
        Ok(MockResource {
            id,
            slot,
            executed: Vec::new(),
        })
    }

    fn is_valid(&self, resource: &MockResource) -> bool {
        !self.state.invalid.lock().contains(&resource.id)
    }

    fn close(&self, resource: MockResource) -> Result<(), MockError> {
        self.state.closed.lock().push(resource.id);
        if self.state.fail_closes.load(Ordering::SeqCst) {
            return Err(MockError::Close(resource.id));
        }
        Ok(())
    }
}

/// Tracks how many resources are in use at once.
#[derive(Debug, Clone, Default)]
pub struct UsageTracker {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl UsageTracker {
    /// Create a tracker with nothing in use.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the start of a use. The use ends when the guard drops.
    #[must_use]
    pub fn enter(&self) -> UsageGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        UsageGuard {
            current: Arc::clone(&self.current),
        }
    }

    /// Uses currently in progress.
    #[must_use]
    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous uses seen.
    #[must_use]
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Ends a use recorded by [`UsageTracker::enter`] when dropped.
#[derive(Debug)]
pub struct UsageGuard {
    current: Arc<AtomicUsize>,
}

impl Drop for UsageGuard {
    fn drop(&mut self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}
