//! # nbpool-testing
//!
//! Test infrastructure for the `nbpool` crate.
//!
//! ## Features
//!
//! - [`MockFactory`]: a resource factory with counters and fault injection
//! - [`UsageTracker`]: records the peak number of resources in use at once
//! - [`CountingScheduler`]: wraps a scheduler and counts dispatches
//! - [`init_tracing`]: installs a test-friendly `tracing` subscriber
//!
//! ## Example
//!
//! ```rust,ignore
//! use nbpool::Pool;
//! use nbpool_testing::MockFactory;
//!
//! #[tokio::test]
//! async fn test_with_mock_factory() {
//!     let factory = MockFactory::new();
//!     let pool = Pool::builder(factory.clone()).max_size(2).build().unwrap();
//!
//!     let conn = pool.acquire().await.unwrap();
//!     assert_eq!(factory.created(), 1);
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod fixtures;
pub mod scheduler;

pub use fixtures::{MockError, MockFactory, MockResource, UsageGuard, UsageTracker};
pub use scheduler::CountingScheduler;

/// Install a `tracing` subscriber that writes through the test harness.
///
/// Honors `RUST_LOG`; defaults to `nbpool=debug`. Safe to call from every
/// test, only the first call installs anything.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("nbpool=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
