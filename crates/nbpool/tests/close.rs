//! Pool shutdown behavior.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use nbpool::{Pool, PoolError, ResourceState, ThreadScheduler};
use nbpool_testing::{MockFactory, init_tracing};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn pool_with(factory: &MockFactory, max_size: usize) -> Pool<MockFactory> {
    init_tracing();
    Pool::builder(factory.clone())
        .max_size(max_size)
        .build()
        .expect("valid pool config")
}

#[tokio::test]
async fn test_close_fails_pending_acquire() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, 1);
    let held = pool.acquire().await.unwrap();

    let pending = pool.acquire();
    pool.close().unwrap();

    let outcome = timeout(WAIT, pending).await.unwrap();
    assert!(matches!(outcome, Err(PoolError::PoolClosed)));
    assert_eq!(pool.status().waiting, 0);
    drop(held);
}

#[tokio::test]
async fn test_acquire_after_close_fails_fast() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, 1);
    pool.close().unwrap();

    let err = pool.acquire().await.unwrap_err();
    assert!(err.is_closed());
    assert!(matches!(pool.get().await, Err(PoolError::PoolClosed)));
    assert_eq!(factory.create_attempts(), 0);
}

#[tokio::test]
async fn test_close_closes_idle_resources() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, 2);

    let a = pool.acquire().await.unwrap();
    let b = pool.acquire().await.unwrap();
    let ids = [a.id(), b.id()];
    drop(a);
    drop(b);

    pool.close().unwrap();
    let mut closed = factory.closed_ids();
    closed.sort_unstable();
    assert_eq!(closed, ids);
    assert!(pool.slots().iter().all(|s| s.state == ResourceState::Closed));
    assert_eq!(pool.status().available, 0);
}

#[tokio::test]
async fn test_close_twice_is_noop() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, 2);
    drop(pool.acquire().await.unwrap());

    pool.close().unwrap();
    assert_eq!(factory.closed(), 1);

    pool.close().unwrap();
    assert_eq!(factory.closed(), 1);
    assert!(pool.is_closed());
}

#[tokio::test]
async fn test_checked_out_resource_closed_on_return() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, 1);
    let mut held = pool.acquire().await.unwrap();

    pool.close().unwrap();
    // Still usable: close never pulls a resource from under its holder.
    assert_eq!(factory.closed(), 0);
    held.execute("SELECT 1").unwrap();
    assert_eq!(pool.slots()[0].state, ResourceState::CheckedOut);

    let id = held.id();
    drop(held);
    assert_eq!(factory.closed_ids(), vec![id]);
    assert_eq!(pool.slots()[0].state, ResourceState::Closed);
}

#[tokio::test]
async fn test_close_errors_are_aggregated() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, 3);

    let conns = vec![
        pool.acquire().await.unwrap(),
        pool.acquire().await.unwrap(),
        pool.acquire().await.unwrap(),
    ];
    drop(conns);

    factory.fail_closes(true);
    let err = pool.close().unwrap_err();
    match err {
        PoolError::ResourceClose(errors) => {
            assert_eq!(errors.len(), 3);
            let mut slots = errors.slots();
            slots.sort_unstable();
            assert_eq!(slots, vec![0, 1, 2]);
        }
        other => unreachable!("expected ResourceClose, got {other:?}"),
    }
    // Every resource got its close attempt despite the failures.
    assert_eq!(factory.closed(), 3);

    // The second close reports nothing.
    assert!(pool.close().is_ok());
}

#[tokio::test]
async fn test_in_flight_delivery_after_close_is_refused() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, 1);

    // Created and scheduled for delivery, but the delivery task has not run.
    let pending = pool.acquire();
    pool.close().unwrap();

    let outcome = timeout(WAIT, pending).await.unwrap();
    assert!(matches!(outcome, Err(PoolError::PoolClosed)));
    // The refused resource came back and was closed.
    assert_eq!(factory.closed(), 1);
    assert_eq!(pool.status().in_use, 0);
}

#[test]
fn test_dropping_pool_closes_idle_resources() {
    let factory = MockFactory::new();
    let pool = Pool::builder(factory.clone()).max_size(1).build().unwrap();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    drop(runtime.block_on(pool.acquire()).unwrap());

    // The delivery thread may briefly outlive the guard and hold the last
    // reference, in which case the pool is torn down over there.
    drop(pool);
    let deadline = std::time::Instant::now() + WAIT;
    while factory.closed() == 0 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(factory.closed(), 1);
}

#[test]
fn test_close_while_another_thread_dispatches() {
    init_tracing();
    let factory = MockFactory::new();
    let pool = Pool::builder(factory.clone())
        .max_size(2)
        .scheduler(ThreadScheduler::new())
        .build()
        .unwrap();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();
    let idle = runtime.block_on(pool.acquire()).unwrap();
    let idle_id = idle.id();

    // The other thread sits inside the drain loop, creating slot 1.
    factory.pause_creates();
    let dispatcher = {
        let pool = pool.clone();
        std::thread::spawn(move || pool.acquire())
    };
    while factory.held_creates() == 0 {
        std::thread::yield_now();
    }
    drop(idle);
    assert_eq!(pool.status().available, 1);

    factory.fail_closes(true);
    match pool.close().unwrap_err() {
        PoolError::ResourceClose(errors) => assert_eq!(errors.slots(), vec![0]),
        other => unreachable!("expected ResourceClose, got {other:?}"),
    }
    assert_eq!(factory.closed_ids(), vec![idle_id]);
    assert_eq!(pool.status().available, 0);

    // The in-flight creation finishes after close and is refused.
    factory.resume_creates();
    let late = dispatcher.join().unwrap();
    let outcome = runtime.block_on(async { timeout(WAIT, late).await.unwrap() });
    assert!(matches!(outcome, Err(PoolError::PoolClosed)));

    let deadline = std::time::Instant::now() + WAIT;
    while factory.closed() < 2 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(factory.closed(), 2);
}
