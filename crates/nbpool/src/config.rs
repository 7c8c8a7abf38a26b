//! Pool configuration.

use std::sync::Arc;
use std::time::Duration;

use crate::error::PoolError;

/// Default pool name used in log output.
pub const DEFAULT_POOL_NAME: &str = "nbpool";

/// Configuration for the resource pool.
///
/// This struct is marked `#[non_exhaustive]` to allow adding new fields
/// in future minor versions without breaking changes. Use the builder
/// pattern methods or [`Default::default()`] to construct instances.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Maximum number of resources the pool will ever hold at once.
    pub max_size: usize,

    /// Time [`Pool::get`](crate::Pool::get) waits before giving up.
    ///
    /// `None` waits indefinitely.
    pub acquire_timeout: Option<Duration>,

    /// Whether to check a returned resource with
    /// [`ResourceFactory::is_valid`](crate::ResourceFactory::is_valid) before
    /// handing it to the next waiter.
    pub test_on_checkout: bool,

    /// Whether to check a resource as soon as it is returned.
    pub test_on_checkin: bool,

    /// Name attached to every log event emitted by the pool.
    pub name: Arc<str>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            acquire_timeout: Some(Duration::from_secs(30)),
            test_on_checkout: true,
            test_on_checkin: false,
            name: Arc::from(DEFAULT_POOL_NAME),
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of resources.
    #[must_use]
    pub fn max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Set the acquisition timeout used by [`Pool::get`](crate::Pool::get).
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Let [`Pool::get`](crate::Pool::get) wait without a deadline.
    #[must_use]
    pub fn no_acquire_timeout(mut self) -> Self {
        self.acquire_timeout = None;
        self
    }

    /// Enable or disable validating resources before reuse.
    #[must_use]
    pub fn test_on_checkout(mut self, enabled: bool) -> Self {
        self.test_on_checkout = enabled;
        self
    }

    /// Enable or disable validating resources on return.
    #[must_use]
    pub fn test_on_checkin(mut self, enabled: bool) -> Self {
        self.test_on_checkin = enabled;
        self
    }

    /// Set the pool name used in logs.
    #[must_use]
    pub fn name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_size == 0 {
            return Err(PoolError::Configuration(
                "max_size must be greater than 0".into(),
            ));
        }
        if self.acquire_timeout == Some(Duration::ZERO) {
            return Err(PoolError::Configuration(
                "acquire_timeout must be non-zero; use no_acquire_timeout() to wait forever"
                    .into(),
            ));
        }
        Ok(())
    }
}
