//! Graceful shutdown coordination.
//!
//! State machine `Running -> Draining -> Stopped`. New generations are
//! refused once draining starts; in-flight ones are waited for up to a
//! timeout. The cancellation token tells the HTTP server to stop accepting
//! connections.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownState {
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownResult {
    Complete,
    Timeout { remaining: u32 },
}

pub struct ShutdownCoordinator {
    state: RwLock<ShutdownState>,
    in_flight: Arc<AtomicU32>,
    notify: Arc<Notify>,
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ShutdownState::Running),
            in_flight: Arc::new(AtomicU32::new(0)),
            notify: Arc::new(Notify::new()),
            token: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> ShutdownState {
        *self.state.read()
    }

    pub fn is_accepting(&self) -> bool {
        self.state() == ShutdownState::Running
    }

    /// Register an in-flight generation. `None` once shutdown has begun.
    pub fn track(&self) -> Option<ShutdownGuard> {
        // Count first so a concurrent drain never misses this request.
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = ShutdownGuard {
            counter: self.in_flight.clone(),
            notify: self.notify.clone(),
        };
        if self.is_accepting() {
            Some(guard)
        } else {
            None
        }
    }

    pub fn in_flight_count(&self) -> u32 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Token cancelled when shutdown begins.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Stop accepting, then wait for in-flight generations to finish.
    pub async fn initiate(&self, timeout: Duration) -> ShutdownResult {
        *self.state.write() = ShutdownState::Draining;
        self.token.cancel();
        tracing::info!(in_flight = self.in_flight_count(), "draining in-flight generations");

        let result = self.wait_for_drain(timeout).await;

        *self.state.write() = ShutdownState::Stopped;
        match &result {
            ShutdownResult::Complete => tracing::info!("drain complete"),
            ShutdownResult::Timeout { remaining } => {
                tracing::warn!(remaining, "drain timed out")
            }
        }
        result
    }

    async fn wait_for_drain(&self, timeout: Duration) -> ShutdownResult {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notified = self.notify.notified();
            let count = self.in_flight_count();
            if count == 0 {
                return ShutdownResult::Complete;
            }
            if tokio::time::Instant::now() >= deadline {
                return ShutdownResult::Timeout { remaining: count };
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

/// RAII guard for an in-flight generation. `Send`, so it can move into a
/// blocking task.
pub struct ShutdownGuard {
    counter: Arc<AtomicU32>,
    notify: Arc<Notify>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_counts_in_flight() {
        let coordinator = ShutdownCoordinator::new();
        let guard = coordinator.track().unwrap();
        assert_eq!(coordinator.in_flight_count(), 1);
        drop(guard);
        assert_eq!(coordinator.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_refuses_after_initiate() {
        let coordinator = ShutdownCoordinator::new();
        let result = coordinator.initiate(Duration::from_millis(10)).await;
        assert_eq!(result, ShutdownResult::Complete);
        assert_eq!(coordinator.state(), ShutdownState::Stopped);
        assert!(coordinator.track().is_none());
        assert_eq!(coordinator.in_flight_count(), 0);
        assert!(coordinator.token().is_cancelled());
    }

    #[tokio::test]
    async fn test_drain_times_out_with_held_guard() {
        let coordinator = ShutdownCoordinator::new();
        let _guard = coordinator.track().unwrap();
        let result = coordinator.initiate(Duration::from_millis(20)).await;
        assert_eq!(result, ShutdownResult::Timeout { remaining: 1 });
    }
}
