//! Integration tests for the in-flight request registry
//!
//! Tests single-flight admission under real multi-threaded contention

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Barrier;
use waypoint_common::sync::{InFlightRegistry, Reservation};

type Registry = InFlightRegistry<String, u32, String>;

/// Verifies that N racing callers produce exactly one execution.
///
/// # Test Steps
/// 1. Start 16 tasks that all reserve the same key behind a barrier
/// 2. The leader sleeps briefly, counts one execution and resolves
/// 3. Followers await the shared handle
/// 4. Verify one execution and identical results for every caller
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reservations_execute_once() {
    let registry = Arc::new(Registry::new());
    let executions = Arc::new(AtomicU32::new(0));
    let barrier = Arc::new(Barrier::new(16));

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let registry = Arc::clone(&registry);
        let executions = Arc::clone(&executions);
        let barrier = Arc::clone(&barrier);
        tasks.push(tokio::spawn(async move {
            barrier.wait().await;
            let reservation = registry.reserve("GET /profile".to_string());
            match reservation {
                Reservation::Leader(guard) => {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    let n = executions.fetch_add(1, Ordering::SeqCst) + 1;
                    guard.resolve(Ok(n * 100));
                    Some(Ok(n * 100))
                }
                Reservation::Follower(handle) => handle.wait().await,
            }
        }));
    }

    let mut results = Vec::new();
    for task in tasks {
        results.push(task.await.expect("task panicked"));
    }

    assert_eq!(executions.load(Ordering::SeqCst), 1);
    assert!(results.iter().all(|result| result == &Some(Ok(100))));
    assert!(registry.is_empty());
}

/// Verifies that a cancelled leader never leaves a key stuck.
///
/// # Test Steps
/// 1. Reserve a key inside a task and abort the task mid-flight
/// 2. Verify the follower observes abandonment
/// 3. Verify the key can be reserved again
#[tokio::test]
async fn test_cancelled_leader_releases_key() {
    let registry = Arc::new(Registry::new());

    let Reservation::Leader(guard) = registry.reserve("k".to_string()) else {
        panic!("first reservation must lead");
    };
    let leader = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(60)).await;
        guard.resolve(Ok(1));
    });

    let Reservation::Follower(handle) = registry.reserve("k".to_string()) else {
        panic!("second reservation must follow");
    };

    leader.abort();
    let _ = leader.await;

    assert_eq!(handle.wait().await, None);
    assert!(matches!(registry.reserve("k".to_string()), Reservation::Leader(_)));
}
