//! # nbpool
//!
//! A bounded, non-blocking pool for expensive, stateful resources such as
//! database connections or network handles.
//!
//! The pool creates resources lazily, up to a fixed capacity, and hands them
//! to concurrent callers without ever blocking a calling thread. Returned
//! resources are redistributed to pending callers in round-robin order.
//!
//! ## Features
//!
//! - Lazy creation, one slot at a time, never more than `max_size` resources
//! - Lock-free waiter registry and return queue
//! - Single-flight drain loop instead of a held lock
//! - Delivery through a pluggable [`Scheduler`], bounding stack depth across
//!   long acquire/checkin chains
//! - Cancellable acquires, with cancel-vs-fulfill races resolved exactly once
//! - Validation of idle resources and replacement of invalid ones
//! - Best-effort close that reports every resource that failed to close
//!
//! ## Example
//!
//! ```rust,ignore
//! use nbpool::{Pool, PoolConfig};
//!
//! let pool = Pool::new(ConnectionFactory::new(url), PoolConfig::new().max_size(8))?;
//!
//! let mut conn = pool.get().await?;
//! conn.execute("UPDATE jobs SET state = 'done' WHERE id = 7")?;
//! // Connection automatically returned to pool on drop
//!
//! pool.close()?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod checkout;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod pool;
mod registry;
pub mod scheduler;
mod waiter;

pub use checkout::{Acquire, Pooled};
pub use config::PoolConfig;
pub use error::{CloseErrors, PoolError, ResourceCloseError};
pub use lifecycle::{ResourceFactory, ResourceState, SlotInfo};
pub use pool::{Pool, PoolBuilder, PoolStatus};
pub use scheduler::{Scheduler, ThreadScheduler, TokioScheduler};
