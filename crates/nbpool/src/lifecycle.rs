//! Resource lifecycle management.
//!
//! This module defines the factory trait the pool uses to create, validate
//! and close resources, and the per-slot state the pool tracks for each of
//! them.

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

/// Trait for creating and tearing down pooled resources.
///
/// The pool calls [`create`](Self::create) from inside its drain loop, on
/// whichever thread happens to be draining, so implementations should not
/// assume a particular thread or runtime context.
///
/// # Example
///
/// ```rust
/// use std::convert::Infallible;
/// use nbpool::ResourceFactory;
///
/// struct Counter;
///
/// impl ResourceFactory for Counter {
///     type Resource = u64;
///     type Error = Infallible;
///
///     fn create(&self, slot: usize) -> Result<u64, Infallible> {
///         Ok(slot as u64)
///     }
///
///     fn close(&self, _resource: u64) -> Result<(), Infallible> {
///         Ok(())
///     }
/// }
/// ```
pub trait ResourceFactory: Send + Sync + 'static {
    /// The pooled resource type.
    type Resource: Send + 'static;

    /// Error returned by [`create`](Self::create) and [`close`](Self::close).
    type Error: std::error::Error + Send + Sync + 'static;

    /// Create the resource for `slot`.
    ///
    /// A failure is reported to the waiter that triggered the creation and
    /// leaves the slot empty, so a later acquire will try again.
    fn create(&self, slot: usize) -> Result<Self::Resource, Self::Error>;

    /// Check if an idle resource can still be handed out.
    ///
    /// This should be cheap, typically just checking whether the underlying
    /// handle is still open.
    fn is_valid(&self, resource: &Self::Resource) -> bool {
        let _ = resource;
        true
    }

    /// Close a resource.
    ///
    /// Never called on a checked-out resource.
    fn close(&self, resource: Self::Resource) -> Result<(), Self::Error>;
}

/// Resource state tracked by the pool, one per slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResourceState {
    /// Slot has no resource yet, or its resource was discarded.
    Uninitialized = 0,
    /// Resource is idle and available for checkout.
    Idle = 1,
    /// Resource is held by a caller.
    CheckedOut = 2,
    /// Resource is closed. Terminal.
    Closed = 3,
}

impl ResourceState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Idle,
            2 => Self::CheckedOut,
            3 => Self::Closed,
            _ => Self::Uninitialized,
        }
    }

    /// Check if the resource is available for checkout.
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Check if the resource is currently in use.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::CheckedOut)
    }

    /// Check if the slot currently holds a live resource.
    #[must_use]
    pub fn is_populated(&self) -> bool {
        matches!(self, Self::Idle | Self::CheckedOut)
    }
}

/// Point-in-time description of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotInfo {
    /// Index of the slot in the pool.
    pub slot: usize,
    /// Current state of the slot.
    pub state: ResourceState,
    /// How many resources have been created for this slot.
    ///
    /// Greater than one when an invalid or detached resource was replaced.
    pub generation: u64,
    /// Number of times a resource in this slot has been checked out.
    pub checkout_count: u64,
}

/// Bookkeeping for one entry of the slot table.
#[derive(Debug)]
pub(crate) struct Slot {
    state: AtomicU8,
    generation: AtomicU64,
    checkouts: AtomicU64,
}

impl Slot {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(ResourceState::Uninitialized as u8),
            generation: AtomicU64::new(0),
            checkouts: AtomicU64::new(0),
        }
    }

    pub(crate) fn state(&self) -> ResourceState {
        ResourceState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`, failing if the slot is in any other state.
    pub(crate) fn transition(&self, from: ResourceState, to: ResourceState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Unconditionally set the state, returning the previous one.
    pub(crate) fn replace(&self, to: ResourceState) -> ResourceState {
        ResourceState::from_u8(self.state.swap(to as u8, Ordering::AcqRel))
    }

    /// Record a freshly created resource. The slot is handed straight out.
    pub(crate) fn mark_created(&self) {
        self.generation.fetch_add(1, Ordering::Relaxed);
        self.replace(ResourceState::Idle);
    }

    /// Mark an idle resource as checked out.
    pub(crate) fn mark_checkout(&self) -> bool {
        if self.transition(ResourceState::Idle, ResourceState::CheckedOut) {
            self.checkouts.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Mark a checked-out resource as returned.
    pub(crate) fn mark_checkin(&self) -> bool {
        self.transition(ResourceState::CheckedOut, ResourceState::Idle)
    }

    pub(crate) fn info(&self, slot: usize) -> SlotInfo {
        SlotInfo {
            slot,
            state: self.state(),
            generation: self.generation.load(Ordering::Relaxed),
            checkout_count: self.checkouts.load(Ordering::Relaxed),
        }
    }
}
