//! Resource pool usage example.
//!
//! Demonstrates sharing a small pool of "connections" between many tasks,
//! returning them on every path, and shutting the pool down.
//!
//! # Running
//!
//! ```bash
//! RUST_LOG=nbpool=debug cargo run -p nbpool --example pool_usage
//! ```

// Allow common patterns in example code
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use nbpool::{Pool, PoolConfig, PoolError, ResourceFactory};

/// A pretend database session.
#[derive(Debug)]
struct Session {
    id: u64,
    queries: u64,
}

impl Session {
    fn query(&mut self, sql: &str) -> Result<u64, SessionError> {
        if sql.trim().is_empty() {
            return Err(SessionError(format!("session {}: empty statement", self.id)));
        }
        self.queries += 1;
        Ok(self.queries)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct SessionError(String);

#[derive(Debug, Default)]
struct SessionFactory {
    next_id: AtomicU64,
}

impl ResourceFactory for SessionFactory {
    type Resource = Session;
    type Error = SessionError;

    fn create(&self, slot: usize) -> Result<Session, SessionError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        println!("  opened session {id} in slot {slot}");
        Ok(Session { id, queries: 0 })
    }

    fn close(&self, session: Session) -> Result<(), SessionError> {
        println!(
            "  closed session {} after {} queries",
            session.id, session.queries
        );
        Ok(())
    }
}

/// Run one statement on a pooled session.
///
/// The session goes back to the pool when the guard drops, on success and on
/// error alike.
async fn run(
    pool: &Pool<SessionFactory>,
    sql: &str,
) -> Result<u64, Box<dyn std::error::Error + Send + Sync>> {
    let mut session = pool.get().await?;
    Ok(session.query(sql)?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("nbpool=info")),
        )
        .init();

    println!("=== Resource Pool Example ===\n");

    let config = PoolConfig::new()
        .max_size(3)
        .acquire_timeout(Duration::from_secs(5))
        .name("sessions");
    println!("Pool configuration:");
    println!("  Max size: {}", config.max_size);
    println!("  Acquire timeout: {:?}", config.acquire_timeout);
    println!();

    let pool = Arc::new(Pool::new(SessionFactory::default(), config)?);

    println!("Running 12 concurrent workers against 3 sessions...");
    let mut workers = Vec::new();
    for worker in 0..12 {
        let pool = Arc::clone(&pool);
        workers.push(tokio::spawn(async move {
            let sql = format!("UPDATE jobs SET owner = {worker}");
            let count = run(&pool, &sql).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            count
        }));
    }
    for worker in workers {
        worker.await?;
    }

    let status = pool.status();
    println!("\nAfter workers:");
    println!("  Created: {}/{}", status.created, status.max);
    println!("  Available: {}", status.available);
    println!("  In use: {}", status.in_use);

    println!("\nError path returns the session too:");
    match run(&pool, "   ").await {
        Ok(_) => println!("  unexpected success"),
        Err(e) => println!("  query failed: {e}"),
    }
    println!("  In use after error: {}", pool.status().in_use);

    println!("\nPer-slot detail:");
    for info in pool.slots() {
        println!(
            "  slot {}: {:?}, generation {}, {} checkouts",
            info.slot, info.state, info.generation, info.checkout_count
        );
    }

    println!("\nClosing pool...");
    pool.close()?;
    match pool.get().await {
        Err(PoolError::PoolClosed) => println!("  acquire after close: pool closed"),
        other => println!("  acquire after close: {other:?}"),
    }

    println!("\n=== Example Complete ===");
    Ok(())
}
