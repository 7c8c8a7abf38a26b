//! Resource pool implementation.
//!
//! All matching of idle resources to waiters happens in a single drain loop.
//! Every event that might let a waiter make progress (acquire, checkin,
//! cancellation, close) bumps the `wip` counter and calls [`Shared::drain`].
//! Only the caller that moves the counter off zero actually drains; everyone
//! else returns immediately and the active drainer picks up their work on its
//! next pass. No caller ever blocks waiting for another.
//!
//! State that only the drainer touches (the `created` cursor, the round-robin
//! cursor, the slot being populated) therefore needs no further
//! synchronization. The waiter registry and the returned-resource queue are
//! lock-free and safe to write from any thread.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use crossbeam_queue::SegQueue;

use crate::checkout::{Acquire, Pooled};
use crate::config::PoolConfig;
use crate::error::{CloseErrors, PoolError, ResourceCloseError};
use crate::lifecycle::{ResourceFactory, ResourceState, Slot, SlotInfo};
use crate::registry::{Registry, Snapshot};
use crate::scheduler::{Scheduler, ThreadScheduler, TokioScheduler};
use crate::waiter::{Completion, Outcome, Waiter};

/// A bounded, non-blocking pool of resources.
///
/// Resources are created lazily, one slot at a time, up to
/// [`PoolConfig::max_size`]. Cloning a `Pool` is cheap and every clone refers
/// to the same set of resources.
pub struct Pool<M: ResourceFactory> {
    inner: Arc<Shared<M>>,
}

impl<M: ResourceFactory> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: ResourceFactory> Pool<M> {
    /// Create a new pool builder for the given factory.
    pub fn builder(factory: M) -> PoolBuilder<M> {
        PoolBuilder::new(factory)
    }

    /// Create a pool with the given configuration and the default scheduler.
    pub fn new(factory: M, config: PoolConfig) -> Result<Self, PoolError> {
        PoolBuilder::new(factory).config(config).build()
    }

    /// Request a resource.
    ///
    /// Never blocks. The returned handle resolves once a resource is handed
    /// over, creation fails, the pool closes, or the request is cancelled.
    /// Dropping the handle cancels the request.
    ///
    /// If the pool has spare capacity and no idle resource, the resource is
    /// created synchronously by this call, before it returns.
    pub fn acquire(&self) -> Acquire<M> {
        let shared = &self.inner;
        let id = shared.next_waiter_id.fetch_add(1, Ordering::Relaxed);
        let (waiter, rx) = Waiter::new(id);

        if shared.closed.load(Ordering::Acquire) {
            if let Some(completion) = waiter.claim() {
                let _ = completion.complete(Err(PoolError::PoolClosed));
            }
            return Acquire::new(None, rx, Arc::clone(shared));
        }

        let waiter = Arc::new(waiter);
        shared.waiters.register(Arc::clone(&waiter));
        tracing::trace!(pool = %shared.config.name, waiter = id, "acquire registered");
        shared.drain();

        Acquire::new(Some(waiter), rx, Arc::clone(shared))
    }

    /// Get a resource, waiting at most [`PoolConfig::acquire_timeout`].
    ///
    /// On timeout the request is cancelled. A resource that was already on
    /// its way is returned to the pool.
    pub async fn get(&self) -> Result<Pooled<M>, PoolError> {
        let acquire = self.acquire();
        match self.inner.config.acquire_timeout {
            Some(timeout) => tokio::time::timeout(timeout, acquire)
                .await
                .map_err(|_| {
                    tracing::debug!(pool = %self.inner.config.name, ?timeout, "acquire timed out");
                    PoolError::AcquisitionTimeout(timeout)
                })?,
            None => acquire.await,
        }
    }

    /// Return a resource to the pool.
    ///
    /// Equivalent to dropping the guard. The resource always goes back to the
    /// pool it was taken from.
    pub fn checkin(&self, resource: Pooled<M>) {
        drop(resource);
    }

    /// Close the pool.
    ///
    /// Pending acquires fail with [`PoolError::PoolClosed`] and every idle
    /// resource is closed before this returns, even while another thread is
    /// dispatching. Resources that are checked out are left alone and closed
    /// when they are returned; close failures at that point are only logged.
    /// The same goes for a resource the dispatcher is holding at that moment,
    /// and for a delivery that had already passed its closed check, which
    /// still reaches its waiter as a checked-out resource.
    ///
    /// Calling `close` again does nothing and returns `Ok(())`.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::ResourceClose`] listing every resource that failed
    /// to close. The remaining resources are still closed.
    pub fn close(&self) -> Result<(), PoolError> {
        let shared = &self.inner;
        if shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::info!(pool = %shared.config.name, "closing resource pool");
        let errors = shared.flush_closed();
        // Anything returned from here on is closed by the drain loop.
        shared.drain();

        if errors.is_empty() {
            Ok(())
        } else {
            tracing::warn!(
                pool = %shared.config.name,
                failed = errors.len(),
                "resource pool closed with errors"
            );
            Err(CloseErrors(errors).into())
        }
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let shared = &self.inner;
        let in_use = shared
            .slots
            .iter()
            .filter(|slot| slot.state().is_busy())
            .count();
        PoolStatus {
            available: shared.returned.len(),
            in_use,
            created: shared.created.load(Ordering::Acquire),
            waiting: shared.waiters.len(),
            max: shared.slots.len(),
        }
    }

    /// Describe every slot in the pool.
    #[must_use]
    pub fn slots(&self) -> Vec<SlotInfo> {
        self.inner
            .slots
            .iter()
            .enumerate()
            .map(|(i, slot)| slot.info(i))
            .collect()
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Get the resource factory.
    #[must_use]
    pub fn factory(&self) -> &M {
        &self.inner.factory
    }
}

impl<M: ResourceFactory> fmt::Debug for Pool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.inner.config.name)
            .field("closed", &self.is_closed())
            .field("status", &self.status())
            .finish()
    }
}

/// Builder for [`Pool`].
pub struct PoolBuilder<M: ResourceFactory> {
    factory: M,
    config: PoolConfig,
    scheduler: Option<Arc<dyn Scheduler>>,
}

impl<M: ResourceFactory> PoolBuilder<M> {
    /// Start building a pool around `factory`.
    pub fn new(factory: M) -> Self {
        Self {
            factory,
            config: PoolConfig::default(),
            scheduler: None,
        }
    }

    /// Replace the whole configuration.
    #[must_use]
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the maximum number of resources.
    #[must_use]
    pub fn max_size(mut self, size: usize) -> Self {
        self.config.max_size = size;
        self
    }

    /// Set the timeout used by [`Pool::get`].
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config.acquire_timeout = Some(timeout);
        self
    }

    /// Enable or disable validating resources before reuse.
    #[must_use]
    pub fn test_on_checkout(mut self, enabled: bool) -> Self {
        self.config.test_on_checkout = enabled;
        self
    }

    /// Enable or disable validating resources on return.
    #[must_use]
    pub fn test_on_checkin(mut self, enabled: bool) -> Self {
        self.config.test_on_checkin = enabled;
        self
    }

    /// Set the pool name used in logs.
    #[must_use]
    pub fn name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the scheduler used to deliver resources to waiters.
    ///
    /// Defaults to a [`TokioScheduler`] on the current runtime, or a
    /// [`ThreadScheduler`] when built outside a runtime.
    #[must_use]
    pub fn scheduler(mut self, scheduler: impl Scheduler) -> Self {
        self.scheduler = Some(Arc::new(scheduler));
        self
    }

    /// Build the pool. No resource is created until the first acquire.
    pub fn build(self) -> Result<Pool<M>, PoolError> {
        self.config.validate()?;

        let scheduler = self.scheduler.unwrap_or_else(|| {
            match TokioScheduler::try_current() {
                Some(scheduler) => Arc::new(scheduler) as Arc<dyn Scheduler>,
                None => Arc::new(ThreadScheduler::new()),
            }
        });
        let slots = (0..self.config.max_size).map(|_| Slot::new()).collect();

        tracing::debug!(
            pool = %self.config.name,
            max_size = self.config.max_size,
            "resource pool created"
        );

        Ok(Pool {
            inner: Arc::new(Shared {
                config: self.config,
                factory: self.factory,
                scheduler,
                slots,
                created: AtomicUsize::new(0),
                vacated: SegQueue::new(),
                returned: SegQueue::new(),
                waiters: Registry::new(),
                wip: AtomicUsize::new(0),
                cursor: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                next_waiter_id: AtomicU64::new(0),
            }),
        })
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of returned resources waiting to be handed out.
    pub available: usize,
    /// Number of resources currently checked out.
    pub in_use: usize,
    /// Number of slots populated so far. Never decreases.
    pub created: usize,
    /// Number of pending acquires.
    pub waiting: usize,
    /// Maximum allowed resources.
    pub max: usize,
}

/// An idle resource together with the slot it belongs to.
struct Idle<R> {
    slot: usize,
    resource: R,
}

/// A slot the drainer intends to populate.
#[derive(Debug, Clone, Copy)]
enum Reservation {
    /// Next never-used slot, at the `created` cursor.
    Fresh(usize),
    /// Slot whose resource was discarded.
    Vacated(usize),
}

impl Reservation {
    fn slot(self) -> usize {
        match self {
            Self::Fresh(slot) | Self::Vacated(slot) => slot,
        }
    }
}

type PoolWaiter<M> = Waiter<Pooled<M>>;

pub(crate) struct Shared<M: ResourceFactory> {
    config: PoolConfig,
    factory: M,
    scheduler: Arc<dyn Scheduler>,
    slots: Box<[Slot]>,
    /// Number of populated slots. Written only by the drainer.
    created: AtomicUsize,
    /// Slots that lost their resource and may be populated again.
    vacated: SegQueue<usize>,
    returned: SegQueue<Idle<M::Resource>>,
    waiters: Registry<PoolWaiter<M>>,
    wip: AtomicUsize,
    /// Round-robin position over the waiter snapshot. Written only by the drainer.
    cursor: AtomicUsize,
    closed: AtomicBool,
    next_waiter_id: AtomicU64,
}

impl<M: ResourceFactory> Shared<M> {
    pub(crate) fn name(&self) -> &str {
        &self.config.name
    }

    pub(crate) fn slot_info(&self, slot: usize) -> SlotInfo {
        self.slots[slot].info(slot)
    }

    /// Take a resource back from a caller.
    pub(crate) fn checkin(self: &Arc<Self>, slot: usize, resource: M::Resource) {
        if !self.slots[slot].mark_checkin() {
            tracing::error!(
                pool = %self.config.name,
                slot,
                state = ?self.slots[slot].state(),
                "resource returned while not checked out, discarding it"
            );
            if let Err(e) = self.factory.close(resource) {
                tracing::warn!(pool = %self.config.name, slot, error = %e, "failed to close resource");
            }
            return;
        }

        if self.config.test_on_checkin && !self.factory.is_valid(&resource) {
            self.retire(slot, resource);
        } else {
            tracing::trace!(pool = %self.config.name, slot, "resource checked in");
            self.returned.push(Idle { slot, resource });
        }
        self.drain();
    }

    /// Give up a slot whose resource the caller took ownership of.
    pub(crate) fn detach(self: &Arc<Self>, slot: usize) {
        tracing::debug!(pool = %self.config.name, slot, "resource detached from pool");
        self.vacate(slot);
        self.drain();
    }

    /// Withdraw a cancelled waiter and let the drainer re-evaluate.
    ///
    /// Returns `false` if the waiter had already been claimed.
    pub(crate) fn cancel(self: &Arc<Self>, waiter: &Arc<PoolWaiter<M>>) -> bool {
        if !waiter.cancel() {
            return false;
        }
        self.waiters.unregister(waiter);
        tracing::trace!(pool = %self.config.name, waiter = waiter.id(), "acquire cancelled");
        self.drain();
        true
    }

    /// Enter the drain loop, or hand our work to whoever is already in it.
    fn drain(self: &Arc<Self>) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        let mut missed = 1;
        loop {
            self.drain_pass();
            missed = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if missed == 0 {
                return;
            }
        }
    }

    /// Dispatch resources until there is no demand or nothing to hand out.
    fn drain_pass(self: &Arc<Self>) {
        let mut in_hand: Option<Idle<M::Resource>> = None;
        loop {
            if self.closed.load(Ordering::Acquire) {
                if let Some(idle) = in_hand.take() {
                    let _ = self.close_idle(idle);
                }
                let _ = self.flush_closed();
                return;
            }

            let waiters = self.waiters.snapshot();
            if waiters.is_empty() {
                if let Some(idle) = in_hand.take() {
                    self.returned.push(idle);
                }
                return;
            }

            let idle = match in_hand.take().or_else(|| self.take_returned()) {
                Some(idle) => idle,
                None => match self.reserve_slot() {
                    Some(reservation) => {
                        self.create_for(&waiters, reservation);
                        continue;
                    }
                    // Exhausted: waiters stay pending until a checkin.
                    None => return,
                },
            };
            in_hand = self.dispatch(&waiters, idle);
        }
    }

    /// Pop the next reusable resource, retiring any that fail validation.
    fn take_returned(&self) -> Option<Idle<M::Resource>> {
        while let Some(idle) = self.returned.pop() {
            if self.config.test_on_checkout && !self.factory.is_valid(&idle.resource) {
                self.retire(idle.slot, idle.resource);
                continue;
            }
            return Some(idle);
        }
        None
    }

    fn reserve_slot(&self) -> Option<Reservation> {
        if let Some(slot) = self.vacated.pop() {
            return Some(Reservation::Vacated(slot));
        }
        let created = self.created.load(Ordering::Acquire);
        (created < self.slots.len()).then_some(Reservation::Fresh(created))
    }

    fn release_slot(&self, reservation: Reservation) {
        if let Reservation::Vacated(slot) = reservation {
            self.vacated.push(slot);
        }
    }

    /// Round-robin selection of the next waiter.
    ///
    /// The chosen waiter is always unregistered. `None` means it had been
    /// cancelled in the meantime.
    fn select(
        &self,
        waiters: &Snapshot<PoolWaiter<M>>,
    ) -> Option<(u64, Completion<Pooled<M>>)> {
        let index = self.cursor.load(Ordering::Relaxed) % waiters.len();
        self.cursor.store(index + 1, Ordering::Relaxed);

        let waiter = &waiters[index];
        let completion = waiter.claim();
        self.waiters.unregister(waiter);
        completion.map(|completion| (waiter.id(), completion))
    }

    /// Create a resource for the next waiter.
    ///
    /// A failed creation is reported to that waiter only. It is not retried,
    /// but the slot stays free for whoever is selected next.
    fn create_for(
        self: &Arc<Self>,
        waiters: &Snapshot<PoolWaiter<M>>,
        reservation: Reservation,
    ) {
        let Some((waiter, completion)) = self.select(waiters) else {
            self.release_slot(reservation);
            return;
        };

        let slot = reservation.slot();
        match self.factory.create(slot) {
            Ok(resource) => {
                if let Reservation::Fresh(slot) = reservation {
                    self.created.store(slot + 1, Ordering::Release);
                }
                self.slots[slot].mark_created();
                tracing::debug!(pool = %self.config.name, slot, "resource created");
                self.deliver(waiter, completion, Idle { slot, resource });
            }
            Err(e) => {
                self.release_slot(reservation);
                tracing::warn!(
                    pool = %self.config.name,
                    slot,
                    waiter,
                    error = %e,
                    "resource creation failed"
                );
                let _ = completion.complete(Err(PoolError::CreationFailed {
                    slot,
                    source: Box::new(e),
                }));
            }
        }
    }

    /// Hand `idle` to the next waiter, or give it back if that waiter was
    /// cancelled.
    fn dispatch(
        self: &Arc<Self>,
        waiters: &Snapshot<PoolWaiter<M>>,
        idle: Idle<M::Resource>,
    ) -> Option<Idle<M::Resource>> {
        match self.select(waiters) {
            Some((waiter, completion)) => {
                self.deliver(waiter, completion, idle);
                None
            }
            None => Some(idle),
        }
    }

    /// Complete a waiter with a resource on the scheduler, off this stack.
    ///
    /// The closed flag is read once when the task runs. A close landing after
    /// that read still lets this delivery through as a checked-out resource.
    fn deliver(
        self: &Arc<Self>,
        waiter: u64,
        completion: Completion<Pooled<M>>,
        idle: Idle<M::Resource>,
    ) {
        let Idle { slot, resource } = idle;
        if !self.slots[slot].mark_checkout() {
            tracing::error!(
                pool = %self.config.name,
                slot,
                state = ?self.slots[slot].state(),
                "dispatching a resource that is not idle"
            );
        }
        tracing::trace!(pool = %self.config.name, slot, waiter, "dispatching resource");

        let pooled = Pooled::new(resource, slot, Arc::clone(self));
        let shared = Arc::clone(self);
        self.scheduler.schedule(Box::new(move || {
            let outcome: Outcome<Pooled<M>> = if shared.closed.load(Ordering::Acquire) {
                // Dropping the guard routes the resource back for closing.
                drop(pooled);
                Err(PoolError::PoolClosed)
            } else {
                Ok(pooled)
            };
            if completion.complete(outcome).is_err() {
                tracing::trace!(
                    pool = %shared.config.name,
                    slot,
                    waiter,
                    "waiter went away, returning resource"
                );
            }
        }));
    }

    /// Close the queued resources and fail every pending waiter.
    ///
    /// Safe to run from any thread alongside the drainer. Returns the close
    /// failures of the resources this call closed.
    fn flush_closed(&self) -> Vec<ResourceCloseError> {
        let mut errors = Vec::new();
        while let Some(idle) = self.returned.pop() {
            errors.extend(self.close_idle(idle));
        }
        let waiters = self.waiters.snapshot();
        for waiter in waiters.iter() {
            if let Some(completion) = waiter.claim() {
                let _ = completion.complete(Err(PoolError::PoolClosed));
            }
            self.waiters.unregister(waiter);
        }
        errors
    }

    #[must_use]
    fn close_idle(&self, idle: Idle<M::Resource>) -> Option<ResourceCloseError> {
        let Idle { slot, resource } = idle;
        self.slots[slot].replace(ResourceState::Closed);
        match self.factory.close(resource) {
            Ok(()) => {
                tracing::debug!(pool = %self.config.name, slot, "resource closed");
                None
            }
            Err(e) => {
                tracing::warn!(pool = %self.config.name, slot, error = %e, "failed to close resource");
                Some(ResourceCloseError {
                    slot,
                    source: Box::new(e),
                })
            }
        }
    }

    /// Close an invalid resource and free its slot for re-creation.
    fn retire(&self, slot: usize, resource: M::Resource) {
        tracing::debug!(pool = %self.config.name, slot, "discarding invalid resource");
        if let Err(e) = self.factory.close(resource) {
            tracing::warn!(pool = %self.config.name, slot, error = %e, "failed to close resource");
        }
        self.vacate(slot);
    }

    fn vacate(&self, slot: usize) {
        self.slots[slot].replace(ResourceState::Uninitialized);
        self.vacated.push(slot);
    }
}

impl<M: ResourceFactory> Drop for Shared<M> {
    fn drop(&mut self) {
        // Last handle gone: nothing is checked out and nobody is waiting.
        while let Some(idle) = self.returned.pop() {
            let _ = self.close_idle(idle);
        }
    }
}
