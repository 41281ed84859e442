//! `/health` endpoint body.

use std::time::Instant;

use serde::Serialize;

use crate::relay::RelayMode;

/// `GET /health` body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the server is running; `"degraded"` when the relay
    /// is running without a broker.
    pub status: &'static str,
    /// Whole seconds since `listen`.
    pub uptime_secs: u64,
    /// Registered WebSocket connections.
    pub connections: usize,
    /// Subscriber count per topic.
    pub topics: Vec<TopicHealth>,
    /// Relay mode.
    pub relay: RelayMode,
}

/// One topic's subscriber count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicHealth {
    /// Topic name.
    pub topic: String,
    /// Current subscribers.
    pub subscribers: usize,
}

/// Snapshot of server liveness for `GET /health`.
pub fn health_check(
    start_time: Instant,
    connections: usize,
    topic_counts: Vec<(String, usize)>,
    relay: RelayMode,
) -> HealthResponse {
    HealthResponse {
        status: if relay == RelayMode::Degraded { "degraded" } else { "ok" },
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        topics: topic_counts
            .into_iter()
            .map(|(topic, subscribers)| TopicHealth { topic, subscribers })
            .collect(),
        relay,
    }
}
