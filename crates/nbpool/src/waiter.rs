//! Single-fulfillment waiters.
//!
//! A waiter is completed or cancelled at most once. Both paths race on one
//! atomic `Pending -> Fulfilled | Cancelled` transition; whichever wins owns the
//! result channel and the loser does nothing.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::PoolError;

const PENDING: u8 = 0;
const FULFILLED: u8 = 1;
const CANCELLED: u8 = 2;

pub(crate) type Outcome<T> = Result<T, PoolError>;

pub(crate) struct Waiter<T> {
    id: u64,
    state: AtomicU8,
    sender: Mutex<Option<oneshot::Sender<Outcome<T>>>>,
}

impl<T> Waiter<T> {
    pub(crate) fn new(id: u64) -> (Self, oneshot::Receiver<Outcome<T>>) {
        let (tx, rx) = oneshot::channel();
        let waiter = Self {
            id,
            state: AtomicU8::new(PENDING),
            sender: Mutex::new(Some(tx)),
        };
        (waiter, rx)
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    #[cfg(test)]
    pub(crate) fn is_pending(&self) -> bool {
        self.state.load(Ordering::Acquire) == PENDING
    }

    /// Win the right to complete this waiter.
    ///
    /// Returns `None` if the waiter was already claimed or cancelled.
    pub(crate) fn claim(&self) -> Option<Completion<T>> {
        self.state
            .compare_exchange(PENDING, FULFILLED, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        self.sender.lock().take().map(|sender| Completion { sender })
    }

    /// Cancel the waiter. Returns `false` if it was already claimed.
    pub(crate) fn cancel(&self) -> bool {
        if self
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        // Dropping the sender resolves the receiver as cancelled.
        drop(self.sender.lock().take());
        true
    }
}

impl<T> fmt::Debug for Waiter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state.load(Ordering::Acquire) {
            PENDING => "pending",
            FULFILLED => "fulfilled",
            _ => "cancelled",
        };
        f.debug_struct("Waiter")
            .field("id", &self.id)
            .field("state", &state)
            .finish()
    }
}

/// Exclusive right to deliver a waiter's outcome.
pub(crate) struct Completion<T> {
    sender: oneshot::Sender<Outcome<T>>,
}

impl<T> Completion<T> {
    /// Deliver the outcome. Hands it back if the receiver is gone.
    pub(crate) fn complete(self, outcome: Outcome<T>) -> Result<(), Outcome<T>> {
        self.sender.send(outcome)
    }
}
