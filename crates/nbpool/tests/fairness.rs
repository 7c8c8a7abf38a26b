//! Dispatch fairness and cancellation.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashSet;
use std::time::Duration;

use nbpool::{Pool, PoolError, ThreadScheduler, TokioScheduler};
use nbpool_testing::{CountingScheduler, MockFactory, init_tracing};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_test::{assert_pending, assert_ready_err, assert_ready_ok};

const WAIT: Duration = Duration::from_secs(5);

fn pool_with(factory: &MockFactory, max_size: usize) -> Pool<MockFactory> {
    init_tracing();
    Pool::builder(factory.clone())
        .max_size(max_size)
        .build()
        .expect("valid pool config")
}

/// Yield to the runtime until `task` has been woken, or give up.
async fn until_woken<T: std::future::Future>(task: &tokio_test::task::Spawn<T>) {
    for _ in 0..1_000 {
        if task.is_woken() {
            return;
        }
        tokio::task::yield_now().await;
    }
}

// =============================================================================
// Round-Robin Dispatch
// =============================================================================

#[tokio::test]
async fn test_each_waiter_served_once_before_any_twice() {
    const WAITERS: usize = 6;

    let factory = MockFactory::new();
    let pool = pool_with(&factory, 1);
    let held = pool.acquire().await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    for index in 0..WAITERS {
        let acquire = pool.acquire();
        let tx = tx.clone();
        tokio::spawn(async move {
            let conn = acquire.await.unwrap();
            tx.send((index, conn)).unwrap();
        });
    }
    drop(tx);
    assert_eq!(pool.status().waiting, WAITERS);

    drop(held);

    let mut served = Vec::new();
    for _ in 0..WAITERS {
        let (index, conn) = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        served.push(index);
        drop(conn);
    }

    let distinct: HashSet<_> = served.iter().copied().collect();
    assert_eq!(distinct.len(), WAITERS, "a waiter was served twice: {served:?}");
    assert_eq!(factory.created(), 1);
    assert_eq!(pool.status().waiting, 0);
}

#[tokio::test]
async fn test_returned_resources_spread_across_waiters() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, 2);
    let a = pool.acquire().await.unwrap();
    let b = pool.acquire().await.unwrap();

    let mut first = tokio_test::task::spawn(pool.acquire());
    let mut second = tokio_test::task::spawn(pool.acquire());
    assert_pending!(first.poll());
    assert_pending!(second.poll());

    drop(a);
    drop(b);
    until_woken(&first).await;
    until_woken(&second).await;

    let first = assert_ready_ok!(first.poll());
    let second = assert_ready_ok!(second.poll());
    assert_ne!(first.id(), second.id());
}

#[tokio::test]
async fn test_every_dispatch_goes_through_scheduler() {
    init_tracing();
    let factory = MockFactory::new();
    let scheduler = CountingScheduler::new(TokioScheduler::try_current().unwrap());
    let pool = Pool::builder(factory.clone())
        .max_size(1)
        .scheduler(scheduler.clone())
        .build()
        .unwrap();

    for _ in 0..100 {
        let conn = pool.acquire().await.unwrap();
        drop(conn);
    }

    assert_eq!(scheduler.scheduled(), 100);
    assert_eq!(factory.created(), 1);
}

#[test]
fn test_thread_deliveries_run_off_the_draining_stack() {
    init_tracing();
    let factory = MockFactory::new();
    let scheduler = CountingScheduler::new(ThreadScheduler::new());
    let pool = Pool::builder(factory.clone())
        .max_size(1)
        .scheduler(scheduler.clone())
        .build()
        .unwrap();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();

    let held = runtime.block_on(pool.acquire()).unwrap();
    let waiters: Vec<_> = (0..20)
        .map(|_| {
            let acquire = pool.acquire();
            runtime.spawn(async move { drop(acquire.await.unwrap()) })
        })
        .collect();
    drop(held);
    runtime.block_on(async {
        for waiter in waiters {
            timeout(WAIT, waiter).await.unwrap().unwrap();
        }
    });

    assert_eq!(scheduler.scheduled(), 21);
    assert_eq!(scheduler.ran_inline(), 0);
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_cancel_before_available_wastes_nothing() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, 1);
    let held = pool.acquire().await.unwrap();

    let mut pending = pool.acquire();
    assert!(pending.cancel());
    assert!(matches!(pending.await, Err(PoolError::Cancelled)));

    drop(held);
    let status = pool.status();
    assert_eq!(status.available, 1);
    assert_eq!(status.waiting, 0);
    assert_eq!(factory.created(), 1);
}

#[tokio::test]
async fn test_dropping_acquire_cancels() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, 1);
    let held = pool.acquire().await.unwrap();

    let pending = pool.acquire();
    assert_eq!(pool.status().waiting, 1);
    drop(pending);
    assert_eq!(pool.status().waiting, 0);

    drop(held);
    assert_eq!(pool.status().available, 1);
}

#[tokio::test]
async fn test_cancel_after_fulfillment_is_noop() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, 1);

    let mut task = tokio_test::task::spawn(pool.acquire());
    assert_pending!(task.poll());
    until_woken(&task).await;

    // Delivered but not yet observed: the pool already committed the outcome.
    assert!(!task.cancel());
    let conn = assert_ready_ok!(task.poll());
    assert_eq!(conn.slot(), 0);
    assert_eq!(pool.status().in_use, 1);
}

#[tokio::test]
async fn test_cancelled_waiter_skipped_for_next() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, 1);
    let held = pool.acquire().await.unwrap();

    let mut cancelled = tokio_test::task::spawn(pool.acquire());
    let mut kept = tokio_test::task::spawn(pool.acquire());
    assert_pending!(cancelled.poll());
    assert_pending!(kept.poll());

    assert!(cancelled.cancel());
    drop(held);
    until_woken(&kept).await;

    assert_ready_err!(cancelled.poll());
    assert_ready_ok!(kept.poll());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_races_fulfillment() {
    init_tracing();
    for _ in 0..200 {
        let factory = MockFactory::new();
        let pool = Pool::builder(factory.clone()).max_size(1).build().unwrap();
        let held = pool.acquire().await.unwrap();

        let mut pending = pool.acquire();
        let releaser = std::thread::spawn(move || drop(held));
        let cancelled = pending.cancel();
        releaser.join().unwrap();

        let outcome = timeout(WAIT, pending).await.unwrap();
        if cancelled {
            assert!(matches!(outcome, Err(PoolError::Cancelled)));
        } else {
            assert!(outcome.is_ok(), "lost cancel must deliver: {outcome:?}");
        }
        drop(outcome);

        // Either way the resource ends up back in the pool, exactly once.
        let status = pool.status();
        assert_eq!(status.in_use, 0);
        assert_eq!(status.available, 1);
        assert_eq!(factory.created(), 1);
    }
}
