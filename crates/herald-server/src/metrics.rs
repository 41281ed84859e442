//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Returns the handle used to render `/metrics`. Fails if a recorder is
/// already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// A handle backed by a recorder that is not installed globally.
///
/// Metrics emitted through the facade do not reach it; it renders empty.
/// Used when the process already owns a global recorder, and in tests.
pub fn detached_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

/// WebSocket connections opened (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Registered connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Failed deliveries to a connection (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Upgrades refused at the connection limit (counter).
pub const WS_REJECTED_TOTAL: &str = "ws_rejected_total";
/// Events published to the broker by a producer (counter, labels: topic).
pub const RELAY_PUBLISHED_TOTAL: &str = "relay_published_total";
/// Events received from the broker by a front process (counter, labels: topic).
pub const RELAY_RECEIVED_TOTAL: &str = "relay_received_total";
/// Relay publish, decode and connect failures (counter, labels: kind).
pub const RELAY_ERRORS_TOTAL: &str = "relay_errors_total";
/// Relay running without a broker (gauge). 1 = degraded.
pub const RELAY_DEGRADED: &str = "relay_degraded";
/// Connections evicted for missing pongs (counter).
pub const HEARTBEAT_EVICTIONS_TOTAL: &str = "heartbeat_evictions_total";
/// Envelopes appended to the replay buffer (counter, labels: topic).
pub const ENVELOPES_APPENDED_TOTAL: &str = "envelopes_appended_total";
