//! Graceful shutdown coordination via `CancellationToken` and `TaskTracker`.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Owns the stop signal and the set of connection tasks it must drain.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl ShutdownCoordinator {
    /// Create a coordinator with no tracked tasks.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Clone of the stop signal.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Signal every task to stop. Idempotent.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Spawn `task` so that [`graceful_shutdown`](Self::graceful_shutdown)
    /// waits for it.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(task)
    }

    /// Number of tracked tasks still running.
    pub fn active_tasks(&self) -> usize {
        self.tracker.len()
    }

    /// Cancel, then wait up to `timeout` for every tracked task.
    ///
    /// Returns `false` if some tasks were still running at the deadline.
    pub async fn graceful_shutdown(&self, timeout: Duration) -> bool {
        self.shutdown();
        let _ = self.tracker.close();
        info!(
            task_count = self.tracker.len(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "waiting for connections to close"
        );
        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_err() {
            warn!(
                remaining = self.tracker.len(),
                "shutdown timed out after {timeout:?}, some connections may still be open"
            );
            return false;
        }
        true
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_not_shutting_down() {
        let coord = ShutdownCoordinator::default();
        assert!(!coord.is_shutting_down());
        assert_eq!(coord.active_tasks(), 0);
    }

    #[test]
    fn shutdown_cancels_every_token() {
        let coord = ShutdownCoordinator::new();
        let t1 = coord.token();
        let t2 = coord.token();
        coord.shutdown();
        coord.shutdown();
        assert!(coord.is_shutting_down());
        assert!(t1.is_cancelled());
        assert!(t2.is_cancelled());
    }

    #[tokio::test]
    async fn graceful_shutdown_waits_for_tracked_tasks() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let handle = coord.spawn(async move {
            token.cancelled().await;
            7
        });

        assert!(coord.graceful_shutdown(Duration::from_secs(1)).await);
        assert_eq!(handle.await.unwrap(), 7);
        assert_eq!(coord.active_tasks(), 0);
    }

    #[tokio::test]
    async fn graceful_shutdown_with_no_tasks() {
        let coord = ShutdownCoordinator::new();
        assert!(coord.graceful_shutdown(Duration::from_millis(10)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn graceful_shutdown_times_out_on_stuck_task() {
        let coord = ShutdownCoordinator::new();
        let _stuck = coord.spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        assert!(!coord.graceful_shutdown(Duration::from_millis(50)).await);
        assert_eq!(coord.active_tasks(), 1);
    }
}
