//! Pending acquires and checked-out resources.

use std::fmt;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use tokio::sync::oneshot;

use crate::error::PoolError;
use crate::lifecycle::{ResourceFactory, SlotInfo};
use crate::pool::Shared;
use crate::waiter::{Outcome, Waiter};

/// A pending request for a resource, returned by [`Pool::acquire`].
///
/// Resolves to exactly one of: a checked-out resource, a creation failure,
/// [`PoolError::PoolClosed`], or [`PoolError::Cancelled`].
///
/// Dropping the handle before it resolves cancels the request. If a resource
/// was already on its way it goes straight back to the pool.
///
/// [`Pool::acquire`]: crate::Pool::acquire
#[must_use = "dropping an Acquire cancels the request"]
pub struct Acquire<M: ResourceFactory> {
    waiter: Option<Arc<Waiter<Pooled<M>>>>,
    rx: oneshot::Receiver<Outcome<Pooled<M>>>,
    pool: Arc<Shared<M>>,
}

impl<M: ResourceFactory> Acquire<M> {
    pub(crate) fn new(
        waiter: Option<Arc<Waiter<Pooled<M>>>>,
        rx: oneshot::Receiver<Outcome<Pooled<M>>>,
        pool: Arc<Shared<M>>,
    ) -> Self {
        Self { waiter, rx, pool }
    }

    /// Cancel the request.
    ///
    /// Returns `true` if the request was withdrawn; awaiting the handle then
    /// yields [`PoolError::Cancelled`]. Returns `false` if the pool had
    /// already committed an outcome, which awaiting the handle still yields.
    pub fn cancel(&mut self) -> bool {
        match self.waiter.take() {
            Some(waiter) => self.pool.cancel(&waiter),
            None => false,
        }
    }
}

impl<M: ResourceFactory> Future for Acquire<M> {
    type Output = Result<Pooled<M>, PoolError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let outcome = ready!(Pin::new(&mut this.rx).poll(cx));
        this.waiter = None;
        Poll::Ready(match outcome {
            Ok(outcome) => outcome,
            Err(_) => Err(PoolError::Cancelled),
        })
    }
}

impl<M: ResourceFactory> Drop for Acquire<M> {
    fn drop(&mut self) {
        if let Some(waiter) = self.waiter.take() {
            self.pool.cancel(&waiter);
        }
    }
}

impl<M: ResourceFactory> fmt::Debug for Acquire<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acquire")
            .field("pool", &self.pool.name())
            .field("waiter", &self.waiter)
            .finish()
    }
}

/// A resource checked out of the pool.
///
/// Dereferences to the resource. When dropped, the resource is returned to
/// the pool, so it goes back exactly once on every path, including early
/// returns and panics.
pub struct Pooled<M: ResourceFactory> {
    // Always `Some` until `drop` or `detach` consumes the guard.
    resource: Option<M::Resource>,
    slot: usize,
    pool: Arc<Shared<M>>,
}

impl<M: ResourceFactory> Pooled<M> {
    pub(crate) fn new(resource: M::Resource, slot: usize, pool: Arc<Shared<M>>) -> Self {
        Self {
            resource: Some(resource),
            slot,
            pool,
        }
    }

    /// Index of the slot this resource occupies.
    #[must_use]
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Bookkeeping for this resource's slot.
    #[must_use]
    pub fn info(&self) -> SlotInfo {
        self.pool.slot_info(self.slot)
    }

    /// Take the resource out of the pool.
    ///
    /// The pool forgets about it and the slot becomes free, so the pool may
    /// create a replacement. The caller is now responsible for closing it.
    #[allow(clippy::expect_used)]
    pub fn detach(mut self) -> M::Resource {
        let resource = self
            .resource
            .take()
            .expect("resource is present until the guard is consumed");
        self.pool.detach(self.slot);
        resource
    }
}

impl<M: ResourceFactory> Deref for Pooled<M> {
    type Target = M::Resource;

    #[allow(clippy::expect_used)]
    fn deref(&self) -> &Self::Target {
        self.resource
            .as_ref()
            .expect("resource is present until the guard is consumed")
    }
}

impl<M: ResourceFactory> DerefMut for Pooled<M> {
    #[allow(clippy::expect_used)]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.resource
            .as_mut()
            .expect("resource is present until the guard is consumed")
    }
}

impl<M: ResourceFactory> Drop for Pooled<M> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            self.pool.checkin(self.slot, resource);
        }
    }
}

impl<M> fmt::Debug for Pooled<M>
where
    M: ResourceFactory,
    M::Resource: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("slot", &self.slot)
            .field("resource", &self.resource)
            .finish()
    }
}
