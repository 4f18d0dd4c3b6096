//! Tests for graceful shutdown coordination.

use netmon_helper::shutdown::{ShutdownCoordinator, ShutdownResult, ShutdownState};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_initial_state_is_running() {
    let coordinator = ShutdownCoordinator::new();
    assert_eq!(coordinator.state(), ShutdownState::Running);
    assert!(coordinator.is_accepting());
    assert!(!coordinator.token().is_cancelled());
}

#[tokio::test]
async fn test_multiple_guards_track_correctly() {
    let coordinator = ShutdownCoordinator::new();

    let g1 = coordinator.track();
    let g2 = coordinator.track();
    let g3 = coordinator.track();
    assert_eq!(coordinator.in_flight_count(), 3);

    drop(g1);
    assert_eq!(coordinator.in_flight_count(), 2);

    drop(g2);
    drop(g3);
    assert_eq!(coordinator.in_flight_count(), 0);
}

#[tokio::test]
async fn test_drain_waits_for_completion() {
    let coordinator = Arc::new(ShutdownCoordinator::new());

    let guard = coordinator.track().unwrap();
    let coord_clone = coordinator.clone();

    let handle =
        tokio::spawn(async move { coord_clone.initiate(Duration::from_millis(500)).await });

    // Brief delay, then the worker finishes
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(coordinator.state(), ShutdownState::Draining);
    assert!(coordinator.track().is_none());
    drop(guard);

    let result = handle.await.unwrap();
    assert_eq!(result, ShutdownResult::Complete);
    assert_eq!(coordinator.state(), ShutdownState::Stopped);
}

#[tokio::test]
async fn test_workers_observe_cancellation() {
    let coordinator = Arc::new(ShutdownCoordinator::new());

    let mut workers = Vec::new();
    for _ in 0..4 {
        let guard = coordinator.track().unwrap();
        let token = coordinator.token();
        workers.push(tokio::spawn(async move {
            let _guard = guard;
            token.cancelled().await;
        }));
    }
    assert_eq!(coordinator.in_flight_count(), 4);

    let result = coordinator.initiate(Duration::from_secs(5)).await;
    assert_eq!(result, ShutdownResult::Complete);
    for worker in workers {
        worker.await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_drain_timeout_returns_remaining() {
    let coordinator = ShutdownCoordinator::new();

    // Workers that ignore cancellation
    let _a = coordinator.track().unwrap();
    let _b = coordinator.track().unwrap();

    let result = coordinator.initiate(Duration::from_secs(10)).await;
    assert_eq!(result, ShutdownResult::Timeout { remaining: 2 });
    assert_eq!(coordinator.state(), ShutdownState::Stopped);
}
