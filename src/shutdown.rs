//! Graceful shutdown coordination for the helper.
//!
//! Connection workers register with the coordinator and observe its
//! cancellation token. `initiate` cancels the token and waits for the
//! registered workers to finish.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Shutdown state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShutdownState {
    Running = 0,
    Draining = 1,
    Stopped = 2,
}

impl ShutdownState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

/// Result of a shutdown operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownResult {
    Complete,
    Timeout { remaining: u32 },
}

/// Coordinates graceful shutdown across connection workers.
pub struct ShutdownCoordinator {
    state: AtomicU8,
    in_flight: Arc<AtomicU32>,
    notify: Arc<Notify>,
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ShutdownState::Running as u8),
            in_flight: Arc::new(AtomicU32::new(0)),
            notify: Arc::new(Notify::new()),
            token: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> ShutdownState {
        ShutdownState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_accepting(&self) -> bool {
        self.state() == ShutdownState::Running
    }

    /// Token cancelled when shutdown begins.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Register a connection worker. Returns None if shutting down.
    pub fn track(&self) -> Option<WorkerGuard> {
        if !self.is_accepting() {
            return None;
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Some(WorkerGuard {
            counter: self.in_flight.clone(),
            notify: self.notify.clone(),
        })
    }

    pub fn in_flight_count(&self) -> u32 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Stop accepting, cancel workers and wait for them to drain.
    pub async fn initiate(&self, timeout: Duration) -> ShutdownResult {
        self.state.store(ShutdownState::Draining as u8, Ordering::Release);
        self.token.cancel();
        tracing::info!(workers = self.in_flight_count(), "Draining connection workers");

        let result = self.wait_for_drain(timeout).await;
        self.state.store(ShutdownState::Stopped as u8, Ordering::Release);
        result
    }

    async fn wait_for_drain(&self, timeout: Duration) -> ShutdownResult {
        let deadline = crate::ipc::deadline_after(tokio::time::Instant::now(), timeout);

        loop {
            // Register interest before reading the count so a release in
            // between is not missed
            let notified = self.notify.notified();
            let count = self.in_flight_count();
            if count == 0 {
                return ShutdownResult::Complete;
            }

            tokio::select! {
                _ = notified => continue,
                _ = tokio::time::sleep_until(deadline) => {
                    let remaining = self.in_flight_count();
                    if remaining == 0 {
                        return ShutdownResult::Complete;
                    }
                    return ShutdownResult::Timeout { remaining };
                }
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII registration of one connection worker.
pub struct WorkerGuard {
    counter: Arc<AtomicU32>,
    notify: Arc<Notify>,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drain_without_workers() {
        let coordinator = ShutdownCoordinator::new();
        assert!(coordinator.is_accepting());
        let result = coordinator.initiate(Duration::from_secs(1)).await;
        assert_eq!(result, ShutdownResult::Complete);
        assert_eq!(coordinator.state(), ShutdownState::Stopped);
        assert!(coordinator.token().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_timeout_still_drains() {
        let coordinator = ShutdownCoordinator::new();
        let guard = coordinator.track().unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            drop(guard);
        });
        let result = coordinator.initiate(Duration::MAX).await;
        assert_eq!(result, ShutdownResult::Complete);
    }

    #[tokio::test]
    async fn test_track_refused_after_initiate() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.initiate(Duration::from_millis(10)).await;
        assert!(coordinator.track().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reports_remaining() {
        let coordinator = ShutdownCoordinator::new();
        let _guard = coordinator.track().unwrap();
        let result = coordinator.initiate(Duration::from_secs(2)).await;
        assert_eq!(result, ShutdownResult::Timeout { remaining: 1 });
    }

    #[tokio::test]
    async fn test_worker_exits_on_cancel() {
        let coordinator = Arc::new(ShutdownCoordinator::new());
        let guard = coordinator.track().unwrap();
        let token = coordinator.token();
        tokio::spawn(async move {
            token.cancelled().await;
            drop(guard);
        });

        let result = coordinator.initiate(Duration::from_secs(5)).await;
        assert_eq!(result, ShutdownResult::Complete);
        assert_eq!(coordinator.in_flight_count(), 0);
    }
}
