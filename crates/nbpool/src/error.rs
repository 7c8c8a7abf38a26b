//! Pool error types.

use std::time::Duration;

use thiserror::Error;

/// Boxed error produced by a [`ResourceFactory`](crate::ResourceFactory).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur during pool operations.
///
/// Temporary exhaustion is never reported here: a waiter simply stays pending
/// until a resource is returned or a slot frees up.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// The factory failed while populating a slot.
    ///
    /// Only the waiter that triggered the creation sees this. The slot stays
    /// unpopulated and a later acquire may try again.
    #[error("failed to create resource for slot {slot}: {source}")]
    CreationFailed {
        /// Slot the factory was asked to populate.
        slot: usize,
        /// Error returned by the factory.
        #[source]
        source: BoxError,
    },

    /// Pool is closed.
    #[error("pool is closed")]
    PoolClosed,

    /// The acquire was cancelled before a resource was handed over.
    #[error("acquire was cancelled")]
    Cancelled,

    /// Failed to acquire a resource within the timeout.
    #[error("resource acquisition timeout after {0:?}")]
    AcquisitionTimeout(Duration),

    /// Pool configuration error.
    #[error("pool configuration error: {0}")]
    Configuration(String),

    /// One or more resources failed to close while the pool was closing.
    #[error("pool close completed with errors: {0}")]
    ResourceClose(#[from] CloseErrors),
}

impl PoolError {
    /// Check if this error means the pool can no longer serve requests.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::PoolClosed)
    }

    /// Check if a later acquire could succeed where this one failed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::CreationFailed { .. } | Self::AcquisitionTimeout(_) | Self::Cancelled
        )
    }
}

/// A single resource that failed to close.
#[derive(Debug, Error)]
#[error("failed to close resource in slot {slot}: {source}")]
pub struct ResourceCloseError {
    /// Slot the resource occupied.
    pub slot: usize,
    /// Error returned by the factory.
    #[source]
    pub source: BoxError,
}

/// Close failures accumulated while the pool was shutting down.
#[derive(Debug, Error)]
#[error("{} resource(s) failed to close", .0.len())]
pub struct CloseErrors(pub Vec<ResourceCloseError>);

impl CloseErrors {
    /// Slots whose resources failed to close, in the order they were closed.
    #[must_use]
    pub fn slots(&self) -> Vec<usize> {
        self.0.iter().map(|e| e.slot).collect()
    }

    /// Number of failures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no failures were recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
