//! Integration tests for the recycling pool.
//!
//! ## Test Matrix
//!
//! - `test_pool_opens_per_target` - checkouts open new connections per target
//! - `test_pool_recycles_on_close` - close resets the session and makes it available
//! - `test_pool_recycles_on_drop` - dropping a checkout recycles it too
//! - `test_pool_reopen_failure_discards` - a failed reopen leaves nothing available
//! - `test_pool_close_reports_first_error` - one failing close is reported after all settle
//! - `test_pool_close_waits_for_recycle` - a handle mid-reopen is closed before the report
//! - `test_pool_close_empty` - draining an empty pool succeeds
//! - `test_pool_open_after_close` - the drained pool refuses checkouts
//! - `test_pool_detach` - detached connections leave the pool

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{MockDriver, driver, eventually};
use serial_odbc::{Error, Opts, Pool, PoolStatus};

const TARGET: &str = "DSN=mock;";

fn quick_pool(mock: &Arc<MockDriver>) -> Pool {
    let opts = Opts {
        pool_close_grace: Duration::from_millis(10),
        ..Default::default()
    };
    Pool::new(driver(mock), opts).unwrap()
}

/// Test that concurrent checkouts get their own connections
#[tokio::test]
async fn test_pool_opens_per_target() {
    let mock = MockDriver::new();
    let pool = quick_pool(&mock);

    let a = pool.open(TARGET).await.unwrap();
    let b = pool.open(TARGET).await.unwrap();
    let c = pool.open("DSN=other;").await.unwrap();

    assert!(a.is_open());
    assert!(!a.same_handle(&b));
    assert_eq!(
        pool.status(TARGET),
        PoolStatus {
            available: 0,
            in_use: 2
        }
    );
    assert_eq!(pool.status("DSN=other;").in_use, 1);
    assert_eq!(pool.totals().total(), 3);
    assert_eq!(mock.state.lock().created, 3);

    a.detach();
    b.detach();
    c.detach();
}

/// Test that a closed checkout is really closed, reopened and reused
#[tokio::test]
async fn test_pool_recycles_on_close() {
    let mock = MockDriver::new();
    let pool = quick_pool(&mock);

    let conn = pool.open(TARGET).await.unwrap();
    conn.query_collect("CREATE TEMP TABLE t", None).await.unwrap();
    conn.close().await.unwrap();

    eventually(|| pool.status(TARGET).available == 1).await;
    assert_eq!(pool.status(TARGET).in_use, 0);
    {
        // The reopen allocates a fresh raw handle behind the same `Conn`.
        let state = mock.state.lock();
        assert_eq!(state.created, 2);
        assert_eq!(state.close_attempts, 1);
        assert_eq!(state.opened, 2);
    }

    let again = pool.open(TARGET).await.unwrap();
    assert!(again.is_open());
    assert_eq!(mock.state.lock().created, 2);
    assert_eq!(mock.state.lock().opened, 2);
    assert_eq!(pool.status(TARGET).in_use, 1);
    again.detach();
}

/// Test that dropping a checkout returns it like close does
#[tokio::test]
async fn test_pool_recycles_on_drop() {
    let mock = MockDriver::new();
    let pool = quick_pool(&mock);

    drop(pool.open(TARGET).await.unwrap());

    eventually(|| pool.status(TARGET).available == 1).await;
    assert_eq!(mock.state.lock().close_attempts, 1);
}

/// Test that a connection whose reopen fails is dropped from the pool
#[tokio::test]
async fn test_pool_reopen_failure_discards() {
    let mock = MockDriver::new();
    let pool = quick_pool(&mock);

    let conn = pool.open(TARGET).await.unwrap();
    mock.state.lock().fail_open = true;
    conn.close().await.unwrap();

    eventually(|| mock.state.lock().descriptors.len() == 2).await;
    eventually(|| pool.status(TARGET).in_use == 0).await;
    assert_eq!(pool.status(TARGET).available, 0);

    mock.state.lock().fail_open = false;
    let fresh = pool.open(TARGET).await.unwrap();
    assert_eq!(mock.state.lock().created, 3);
    fresh.detach();
}

/// Test that pool close waits for every handle and reports the failure
#[tokio::test]
async fn test_pool_close_reports_first_error() {
    let mock = MockDriver::new();
    let pool = quick_pool(&mock);

    let a = pool.open(TARGET).await.unwrap();
    let b = pool.open(TARGET).await.unwrap();
    let c = pool.open("DSN=other;").await.unwrap();
    c.close().await.unwrap();
    eventually(|| pool.status("DSN=other;").available == 1).await;

    // Raw connection ids follow creation order.
    mock.state.lock().fail_close.insert(2);

    let err = pool.close().await.unwrap_err();
    assert!(matches!(err, Error::Driver(_)));
    assert!(pool.is_closed());
    assert_eq!(pool.totals(), PoolStatus::default());

    // One recycle close for `c`, then a close attempt per tracked handle.
    assert_eq!(mock.state.lock().close_attempts, 4);
    assert!(!a.is_open());
    assert!(!b.is_open());

    drop(a);
    drop(b);
}

/// Test that pool close waits for a handle whose reopen is still running
#[tokio::test]
async fn test_pool_close_waits_for_recycle() {
    let mock = MockDriver::new();
    let opts = Opts {
        pool_close_grace: Duration::from_millis(50),
        ..Default::default()
    };
    let pool = Pool::new(driver(&mock), opts).unwrap();

    let conn = pool.open(TARGET).await.unwrap();
    mock.state.lock().open_delay = Some(Duration::from_millis(300));
    conn.close().await.unwrap();
    eventually(|| mock.state.lock().close_attempts == 1).await;

    // The drain starts while the reopen is still blocked in the driver.
    pool.close().await.unwrap();
    {
        let state = mock.state.lock();
        assert_eq!(state.opened, 2);
        assert_eq!(state.close_attempts, 2);
        assert!(state.live.is_empty());
    }

    tokio::time::sleep(Duration::from_millis(400)).await;
    let state = mock.state.lock();
    assert_eq!(state.close_attempts, 2);
    assert!(state.live.is_empty());
    drop(state);
    assert_eq!(pool.totals(), PoolStatus::default());
}

/// Test that an empty pool drains successfully
#[tokio::test]
async fn test_pool_close_empty() {
    let mock = MockDriver::new();
    let pool = quick_pool(&mock);

    pool.close().await.unwrap();
    assert!(pool.is_closed());
    assert_eq!(mock.state.lock().close_attempts, 0);
}

/// Test that checkouts fail once the pool has drained
#[tokio::test]
async fn test_pool_open_after_close() {
    let mock = MockDriver::new();
    let pool = quick_pool(&mock);
    pool.close().await.unwrap();

    let err = pool.open(TARGET).await.unwrap_err();
    assert!(matches!(err, Error::PoolClosed));
    assert_eq!(mock.state.lock().created, 0);
}

/// Test that a detached connection is no longer tracked or recycled
#[tokio::test]
async fn test_pool_detach() {
    let mock = MockDriver::new();
    let pool = quick_pool(&mock);

    let conn = pool.open(TARGET).await.unwrap().detach();
    assert_eq!(pool.totals(), PoolStatus::default());

    conn.close().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(pool.totals(), PoolStatus::default());
    assert_eq!(mock.state.lock().opened, 1);
}
