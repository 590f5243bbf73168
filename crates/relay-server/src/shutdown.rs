//! Graceful shutdown coordination via `CancellationToken`.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Default timeout for graceful shutdown before giving up on open streams.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Coordinates shutdown across the HTTP listener and every stream pump.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel the token, then wait up to `timeout` for tracked tasks.
    ///
    /// Returns `false` if tasks were still running when the timeout hit.
    pub async fn graceful_shutdown(&self, tasks: &TaskTracker, timeout: Option<Duration>) -> bool {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        self.shutdown();
        let _ = tasks.close();
        info!(
            task_count = tasks.len(),
            timeout_secs = timeout.as_secs(),
            "waiting for streams to close"
        );

        if tokio::time::timeout(timeout, tasks.wait()).await.is_err() {
            warn!("shutdown timed out after {timeout:?}, some streams may still be open");
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
