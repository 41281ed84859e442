//! Shutdown propagation for the server's background tasks.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Grace period for background tasks when none is given.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(10);

/// Root cancellation token plus the tasks it governs.
#[derive(Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// A child token; cancelled with the root, or independently.
    pub fn child(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// The root token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Signal every task to stop.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Whether [`trigger`](Self::trigger) has been called.
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Trigger, then wait up to `grace` for `tasks`. Stragglers are aborted.
    ///
    /// Returns `true` if every task finished on its own.
    pub async fn drain(&self, tasks: Vec<JoinHandle<()>>, grace: Option<Duration>) -> bool {
        let grace = grace.unwrap_or(DEFAULT_GRACE);
        self.trigger();
        info!(tasks = tasks.len(), grace_ms = grace.as_millis() as u64, "draining background tasks");

        let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout(grace, futures::future::join_all(tasks))
            .await
            .is_ok()
        {
            return true;
        }
        warn!(grace_ms = grace.as_millis() as u64, "tasks still running after grace period, aborting");
        for handle in aborts {
            handle.abort();
        }
        false
    }
}
