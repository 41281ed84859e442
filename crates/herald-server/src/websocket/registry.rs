//! Live connections and topic membership.
//!
//! The registry owns `topic -> {connection id}` and the connections
//! themselves. Local fan-out snapshots a topic's members before delivering,
//! so membership changes during a broadcast do not affect it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use herald_core::{ConnectionId, Envelope};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::connection::{ClientConnection, SendFailure, Transport};
use crate::metrics::{WS_BROADCAST_DROPS_TOTAL, WS_CONNECTIONS_ACTIVE, WS_DISCONNECTIONS_TOTAL};

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnectionId, Arc<ClientConnection>>,
    topics: HashMap<String, HashSet<ConnectionId>>,
}

/// Result of one local fan-out.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Connections the envelope was enqueued for.
    pub delivered: usize,
    /// Connections that failed and were disconnected.
    pub failed: Vec<ConnectionId>,
}

/// Connection registry and topic router.
pub struct ConnectionRegistry {
    default_topics: Vec<String>,
    inner: RwLock<Inner>,
}

impl ConnectionRegistry {
    /// Create a registry. `default_topics` apply when `connect` gets none.
    pub fn new(default_topics: Vec<String>) -> Self {
        Self {
            default_topics,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Topics a connection gets when it asks for none.
    pub fn default_topics(&self) -> &[String] {
        &self.default_topics
    }

    /// Register a transport under `topics` (defaults when empty).
    pub fn connect(&self, transport: Transport, topics: &[String]) -> Arc<ClientConnection> {
        let id = ConnectionId::new();
        let conn = Arc::new(ClientConnection::new(id.clone(), transport));
        let topics = if topics.is_empty() {
            &self.default_topics
        } else {
            topics
        };

        let mut inner = self.inner.write();
        for topic in topics {
            let _ = conn.add_topic(topic);
            let _ = inner
                .topics
                .entry(topic.clone())
                .or_default()
                .insert(id.clone());
        }
        let _ = inner.connections.insert(id.clone(), conn.clone());
        let live = inner.connections.len();
        drop(inner);

        metrics::gauge!(WS_CONNECTIONS_ACTIVE).set(live as f64);
        info!(connection_id = %id, topics = ?conn.topics(), live, "connection registered");
        conn
    }

    /// Remove a connection from every topic and cancel it.
    ///
    /// Returns `false` if the id was not registered. Safe to call repeatedly.
    pub fn disconnect(&self, id: &ConnectionId) -> bool {
        let mut inner = self.inner.write();
        let Some(conn) = inner.connections.remove(id) else {
            return false;
        };
        for topic in conn.clear_topics() {
            if let Some(members) = inner.topics.get_mut(&topic) {
                let _ = members.remove(id);
                if members.is_empty() {
                    let _ = inner.topics.remove(&topic);
                }
            }
        }
        let live = inner.connections.len();
        drop(inner);

        conn.cancel();
        metrics::counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
        metrics::gauge!(WS_CONNECTIONS_ACTIVE).set(live as f64);
        info!(connection_id = %id, live, "connection removed");
        true
    }

    /// Add `topic` to a connection's subscriptions.
    pub fn subscribe(&self, id: &ConnectionId, topic: &str) -> bool {
        let mut inner = self.inner.write();
        let Some(conn) = inner.connections.get(id).cloned() else {
            return false;
        };
        let _ = conn.add_topic(topic);
        let _ = inner
            .topics
            .entry(topic.to_owned())
            .or_default()
            .insert(id.clone());
        debug!(connection_id = %id, topic, "subscribed");
        true
    }

    /// Remove `topic` from a connection's subscriptions.
    pub fn unsubscribe(&self, id: &ConnectionId, topic: &str) -> bool {
        let mut inner = self.inner.write();
        let Some(conn) = inner.connections.get(id).cloned() else {
            return false;
        };
        let _ = conn.remove_topic(topic);
        if let Some(members) = inner.topics.get_mut(topic) {
            let _ = members.remove(id);
            if members.is_empty() {
                let _ = inner.topics.remove(topic);
            }
        }
        debug!(connection_id = %id, topic, "unsubscribed");
        true
    }

    /// Deliver an envelope to every current subscriber of `topic`.
    ///
    /// Each delivery is independent. Connections that fail are disconnected
    /// once the fan-out is done.
    pub fn broadcast_local(&self, topic: &str, envelope: &Envelope) -> Delivery {
        let json: Arc<str> = match envelope.to_json() {
            Ok(j) => Arc::from(j),
            Err(e) => {
                warn!(topic, event_type = %envelope.event_type, error = %e, "failed to serialize envelope");
                return Delivery::default();
            }
        };

        let recipients: Vec<Arc<ClientConnection>> = {
            let inner = self.inner.read();
            inner
                .topics
                .get(topic)
                .map(|members| {
                    members
                        .iter()
                        .filter_map(|id| inner.connections.get(id).cloned())
                        .collect()
                })
                .unwrap_or_default()
        };

        let mut report = Delivery::default();
        for conn in &recipients {
            match conn.send(json.clone()) {
                Ok(()) => report.delivered += 1,
                Err(failure) => {
                    warn!(
                        connection_id = %conn.id,
                        topic,
                        seq = envelope.seq,
                        reason = %failure,
                        "failed to deliver envelope"
                    );
                    metrics::counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
                    report.failed.push(conn.id.clone());
                }
            }
        }
        for id in &report.failed {
            let _ = self.disconnect(id);
        }
        debug!(
            topic,
            seq = envelope.seq,
            event_type = %envelope.event_type,
            delivered = report.delivered,
            failed = report.failed.len(),
            "broadcast envelope"
        );
        report
    }

    /// Report a failure detected outside fan-out (e.g. a heartbeat ping).
    pub fn report_send_failure(&self, id: &ConnectionId, failure: SendFailure) {
        warn!(connection_id = %id, reason = %failure, "send failure, disconnecting");
        metrics::counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
        let _ = self.disconnect(id);
    }

    /// Subscribers of `topic`, or distinct connections across all topics.
    pub fn get_connection_count(&self, topic: Option<&str>) -> usize {
        let inner = self.inner.read();
        match topic {
            Some(topic) => inner.topics.get(topic).map_or(0, HashSet::len),
            None => inner
                .topics
                .values()
                .flatten()
                .collect::<HashSet<_>>()
                .len(),
        }
    }

    /// Registered connections, including those with no topics.
    pub fn live_connections(&self) -> usize {
        self.inner.read().connections.len()
    }

    /// Look up a connection.
    pub fn connection(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.inner.read().connections.get(id).cloned()
    }

    /// Snapshot of every registered connection.
    pub fn connections(&self) -> Vec<Arc<ClientConnection>> {
        self.inner.read().connections.values().cloned().collect()
    }

    /// Sorted topics of a connection, or `None` if unknown.
    pub fn topics_of(&self, id: &ConnectionId) -> Option<Vec<String>> {
        self.connection(id).map(|c| c.topics())
    }

    /// Per-topic subscriber counts, sorted by topic.
    pub fn topic_counts(&self) -> Vec<(String, usize)> {
        let inner = self.inner.read();
        let mut counts: Vec<_> = inner
            .topics
            .iter()
            .map(|(t, members)| (t.clone(), members.len()))
            .collect();
        counts.sort();
        counts
    }
}
