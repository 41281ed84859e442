//! Heartbeat ping and eviction of unresponsive connections.

use std::sync::Arc;
use std::time::Duration;

use herald_core::ServerFrame;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::registry::ConnectionRegistry;
use crate::metrics::HEARTBEAT_EVICTIONS_TOTAL;

/// Outcome of one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Connections that were sent a ping.
    pub pinged: usize,
    /// Connections evicted for exceeding the pong timeout.
    pub evicted: usize,
    /// Connections whose ping could not be enqueued.
    pub failed: usize,
}

/// Periodically pings every live connection and evicts silent ones.
pub struct HeartbeatMonitor {
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
    timeout: Duration,
}

impl HeartbeatMonitor {
    /// Create a monitor.
    pub fn new(registry: Arc<ConnectionRegistry>, interval: Duration, timeout: Duration) -> Self {
        Self {
            registry,
            interval,
            timeout,
        }
    }

    /// Evict connections past the pong timeout and ping the rest.
    pub fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let ping = match ServerFrame::ping().to_json() {
            Ok(json) => Arc::<str>::from(json),
            Err(e) => {
                warn!(error = %e, "failed to serialize ping");
                return report;
            }
        };

        for conn in self.registry.connections() {
            let silent_for = conn.last_pong_elapsed();
            if silent_for > self.timeout {
                info!(
                    connection_id = %conn.id,
                    silent_ms = silent_for.as_millis() as u64,
                    "connection unresponsive, evicting"
                );
                if self.registry.disconnect(&conn.id) {
                    metrics::counter!(HEARTBEAT_EVICTIONS_TOTAL).increment(1);
                    report.evicted += 1;
                }
                continue;
            }
            match conn.send(ping.clone()) {
                Ok(()) => report.pinged += 1,
                Err(failure) => {
                    self.registry.report_send_failure(&conn.id, failure);
                    report.failed += 1;
                }
            }
        }
        debug!(
            pinged = report.pinged,
            evicted = report.evicted,
            failed = report.failed,
            "heartbeat sweep"
        );
        report
    }

    /// Sweep every interval until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately.
        let _ = ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let _ = self.sweep();
                }
                () = cancel.cancelled() => {
                    debug!("heartbeat monitor stopped");
                    return;
                }
            }
        }
    }
}
