//! Integration tests for the shared connection lease manager.
//!
//! Tests:
//! - Concurrent first opens share one physical connection
//! - Bursty use inside the grace period never reconnects
//! - Connection exists exactly while leases are open, across long sequences
//! - Teardown and recovery after `force_close_all`

use std::time::Duration;

use chime_db::error::DbError;
use chime_test::component::db::lease::{ConnectionState, Lease};
use chime_test::fixtures::CountingConnector;

use super::helpers::*;

/// Past the default one second grace period.
const QUIET: Duration = Duration::from_millis(1_500);

#[test_log::test(tokio::test(start_paused = true))]
async fn concurrent_first_opens_connect_once() {
    let (manager, connector) = lease_manager();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .with_connection(|connection| async move {
                        let serial = *connection.lock().await?;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok::<_, DbError>(serial)
                    })
                    .await
            })
        })
        .collect();

    for task in tasks {
        let serial = task.await.expect("task").expect("query");
        assert_eq!(serial, 0);
    }
    assert_eq!(connector.opens(), 1);
    assert_eq!(manager.lease_count(), 0);

    tokio::time::sleep(QUIET).await;
    assert_eq!(connector.closes(), 1);
    assert_eq!(manager.state(), ConnectionState::NotConnected);
}

#[tokio::test(start_paused = true)]
async fn bursty_use_inside_grace_period_reuses_connection() {
    let (manager, connector) = lease_manager();

    for _ in 0..20 {
        manager
            .run_with_connection(|_connection| async { Ok(()) })
            .await
            .expect("run");
        tokio::time::sleep(Duration::from_millis(300)).await;
    }
    assert_eq!(connector.opens(), 1);
    assert_eq!(connector.closes(), 0);

    tokio::time::sleep(QUIET).await;
    assert_eq!(connector.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn connection_tracks_open_leases() {
    let (manager, connector) = lease_manager();
    let leases: Vec<Lease<CountingConnector>> = (0..5).map(|_| manager.acquire()).collect();

    // Deterministic mix of opens and closes over the five leases.
    let mut open = [false; 5];
    let mut seed: u32 = 7;
    for _ in 0..60 {
        seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        let index = usize::try_from((seed >> 16) % 5).expect("index");
        if open[index] {
            leases[index].close().await.expect("close");
        } else {
            leases[index].open().await.expect("open");
        }
        open[index] = !open[index];

        let expected = open.iter().filter(|is_open| **is_open).count();
        assert_eq!(manager.lease_count(), expected);
        if expected > 0 {
            assert!(manager.is_connected());
        }

        if seed % 3 == 0 {
            tokio::time::sleep(QUIET).await;
            assert_eq!(manager.is_connected(), expected > 0);
        }
    }

    assert_eq!(connector.opens() - connector.closes(), usize::from(manager.is_connected()));
}

#[test_log::test(tokio::test(start_paused = true))]
async fn force_close_all_then_reuse() {
    let (manager, connector) = lease_manager();
    let held = manager.acquire();
    let stale = held.open().await.expect("open");

    manager.force_close_all().await;
    assert_eq!(manager.lease_count(), 0);
    assert!(!manager.is_connected());
    assert!(matches!(stale.lock().await, Err(DbError::ConnectionClosed)));

    // The holder's late close is tolerated and changes nothing.
    held.close().await.expect("late close");
    assert_eq!(connector.closes(), 1);

    let fresh = manager.acquire();
    let connection = fresh.open().await.expect("open after teardown");
    assert_eq!(*connection.lock().await.expect("lock"), 1);
    assert_eq!(connector.opens(), 2);
    assert!(!connection.same_as(&stale));
}

#[tokio::test(start_paused = true)]
async fn refused_connection_surfaces_and_recovers() {
    let (manager, connector) = lease_manager();
    connector.refuse(true);

    let result = manager
        .run_with_connection(|_connection| async { Ok(()) })
        .await;
    assert!(matches!(result, Err(DbError::ConnectionAcquisition(_))));
    assert_eq!(manager.state(), ConnectionState::ConnectionError);
    assert_eq!(manager.lease_count(), 0);

    connector.refuse(false);
    manager
        .run_with_connection(|_connection| async { Ok(()) })
        .await
        .expect("run after recovery");
    assert_eq!(manager.state(), ConnectionState::Connected);
}
