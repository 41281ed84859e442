//! Front-process event hub.
//!
//! Append-then-fan-out and endpoint attach (register, confirm, replay) run
//! under the same gate. Per-topic delivery order therefore equals publish
//! order, and a reconnecting client sees its replay strictly before any live
//! envelope with no duplicate or skipped sequence at the boundary.

use std::sync::Arc;

use herald_core::{BroadcastMessage, Envelope, ServerFrame};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use super::buffer::SequenceBuffer;
use super::connection::{ClientConnection, SendFailure};
use super::registry::{ConnectionRegistry, Delivery};
use crate::metrics::ENVELOPES_APPENDED_TOTAL;

/// A freshly attached endpoint.
pub struct Attached {
    /// The registered connection.
    pub connection: Arc<ClientConnection>,
    /// Outbound queue for the socket writer. Already holds the confirmation
    /// and any replayed envelopes.
    pub outbound: mpsc::Receiver<Arc<str>>,
    /// Topics the connection was registered under, in request order.
    pub topics: Vec<String>,
    /// Number of envelopes replayed.
    pub replayed: usize,
}

/// Owns the sequence buffer and registry for the front process.
pub struct EventHub {
    buffer: SequenceBuffer,
    registry: Arc<ConnectionRegistry>,
    gate: Mutex<()>,
}

impl EventHub {
    /// Build a hub around a registry, retaining `capacity` envelopes per topic.
    pub fn new(registry: Arc<ConnectionRegistry>, capacity: usize) -> Self {
        Self {
            buffer: SequenceBuffer::new(capacity),
            registry,
            gate: Mutex::new(()),
        }
    }

    /// The connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// The replay buffer.
    pub fn buffer(&self) -> &SequenceBuffer {
        &self.buffer
    }

    /// Sequence and deliver one event to local subscribers.
    pub fn publish(&self, topic: &str, message: BroadcastMessage) -> Envelope {
        self.publish_with_report(topic, message).0
    }

    /// Like [`publish`](Self::publish), also returning the fan-out report.
    pub fn publish_with_report(&self, topic: &str, message: BroadcastMessage) -> (Envelope, Delivery) {
        let _gate = self.gate.lock();
        let envelope = self.buffer.append(topic, message);
        metrics::counter!(ENVELOPES_APPENDED_TOTAL, "topic" => topic.to_owned()).increment(1);
        let report = self.registry.broadcast_local(topic, &envelope);
        (envelope, report)
    }

    /// Register a new endpoint, queue its confirmation, then its replay.
    ///
    /// Replay covers only `last_seq` pairs whose topic is in the effective
    /// subscription list. The outbound queue is sized so the confirmation
    /// and full replay always fit ahead of `queue` live slots.
    pub fn attach(
        &self,
        topics: &[String],
        last_seq: &[(String, u64)],
        queue: usize,
    ) -> Result<Attached, SendFailure> {
        let _gate = self.gate.lock();

        let effective: Vec<String> = if topics.is_empty() {
            self.registry.default_topics().to_vec()
        } else {
            topics.to_vec()
        };
        let replay: Vec<Envelope> = last_seq
            .iter()
            .filter(|(topic, _)| effective.contains(topic))
            .flat_map(|(topic, seq)| self.buffer.get_since(topic, *seq))
            .collect();

        let (tx, rx) = mpsc::channel(queue.max(1) + replay.len() + 1);
        let connection = self.registry.connect(tx, &effective);

        let established = ServerFrame::established(connection.id.clone(), effective.clone());
        if let Err(failure) = connection.send_frame(&established) {
            let _ = self.registry.disconnect(&connection.id);
            return Err(failure);
        }
        for envelope in &replay {
            let json = match envelope.to_json() {
                Ok(j) => j,
                Err(_) => {
                    let _ = self.registry.disconnect(&connection.id);
                    return Err(SendFailure::Serialize);
                }
            };
            if let Err(failure) = connection.send(Arc::from(json)) {
                let _ = self.registry.disconnect(&connection.id);
                return Err(failure);
            }
        }
        if !replay.is_empty() {
            debug!(connection_id = %connection.id, replayed = replay.len(), "replayed buffered envelopes");
        }

        Ok(Attached {
            connection,
            outbound: rx,
            topics: effective,
            replayed: replay.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn hub() -> EventHub {
        let registry = Arc::new(ConnectionRegistry::new(vec![
            "agents".into(),
            "tasks".into(),
        ]));
        EventHub::new(registry, 200)
    }

    fn s(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| (*t).to_string()).collect()
    }

    fn drain(rx: &mut mpsc::Receiver<Arc<str>>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(serde_json::from_str(&msg).unwrap());
        }
        out
    }

    #[test]
    fn confirmation_lists_requested_topics() {
        let hub = hub();
        let mut a = hub.attach(&s(&["agents", "tasks"]), &[], 8).unwrap();
        let frames = drain(&mut a.outbound);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["event_type"], "connection.established");
        assert_eq!(frames[0]["topics"], json!(["agents", "tasks"]));
        assert_eq!(frames[0]["connection_id"], a.connection.id.as_str());
    }

    #[test]
    fn empty_topics_get_defaults() {
        let hub = hub();
        let mut a = hub.attach(&[], &[], 8).unwrap();
        assert_eq!(a.topics, s(&["agents", "tasks"]));
        assert_eq!(drain(&mut a.outbound)[0]["topics"], json!(["agents", "tasks"]));
    }

    #[test]
    fn publish_reaches_only_topic_subscribers() {
        let hub = hub();
        let mut agents = hub.attach(&s(&["agents"]), &[], 8).unwrap();
        let mut tasks = hub.attach(&s(&["tasks"]), &[], 8).unwrap();
        let _ = drain(&mut agents.outbound);
        let _ = drain(&mut tasks.outbound);

        let env = hub.publish("agents", BroadcastMessage::new("agent.validated", json!({"id": 1})));
        assert_eq!(env.seq, 1);

        let got = drain(&mut agents.outbound);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0]["seq"], 1);
        assert_eq!(got[0]["event_type"], "agent.validated");
        assert!(drain(&mut tasks.outbound).is_empty());
    }

    #[test]
    fn replay_precedes_live() {
        let hub = hub();
        for i in 1..=3 {
            let _ = hub.publish("agents", BroadcastMessage::new("e", json!(i)));
        }
        let mut a = hub
            .attach(&s(&["agents"]), &[("agents".into(), 1)], 8)
            .unwrap();
        assert_eq!(a.replayed, 2);
        let _ = hub.publish("agents", BroadcastMessage::new("e", json!(4)));

        let frames = drain(&mut a.outbound);
        assert_eq!(frames[0]["event_type"], "connection.established");
        let seqs: Vec<u64> = frames[1..].iter().map(|f| f["seq"].as_u64().unwrap()).collect();
        assert_eq!(seqs, vec![2, 3, 4]);
    }

    #[test]
    fn replay_skips_topics_not_subscribed() {
        let hub = hub();
        let _ = hub.publish("tasks", BroadcastMessage::new("e", json!(null)));
        let mut a = hub
            .attach(&s(&["agents"]), &[("tasks".into(), 0)], 8)
            .unwrap();
        assert_eq!(a.replayed, 0);
        assert_eq!(drain(&mut a.outbound).len(), 1);
    }

    #[test]
    fn replay_larger_than_queue_still_fits() {
        let hub = hub();
        for i in 0..20 {
            let _ = hub.publish("agents", BroadcastMessage::new("e", json!(i)));
        }
        let mut a = hub
            .attach(&s(&["agents"]), &[("agents".into(), 0)], 2)
            .unwrap();
        assert_eq!(a.replayed, 20);
        assert_eq!(drain(&mut a.outbound).len(), 21);
    }

    #[test]
    fn publish_report_counts_deliveries() {
        let hub = hub();
        let _a = hub.attach(&s(&["agents"]), &[], 8).unwrap();
        let _b = hub.attach(&s(&["agents"]), &[], 8).unwrap();
        let (env, report) = hub.publish_with_report("agents", BroadcastMessage::new("e", json!({})));
        assert_eq!(env.seq, 1);
        assert_eq!(report.delivered, 2);
    }

    #[test]
    fn last_seq_beyond_head_replays_nothing() {
        let hub = hub();
        let _ = hub.publish("agents", BroadcastMessage::new("e", json!(1)));
        let mut a = hub
            .attach(&s(&["agents"]), &[("agents".into(), u64::MAX)], 8)
            .unwrap();
        assert_eq!(a.replayed, 0);
        assert_eq!(drain(&mut a.outbound).len(), 1);
    }
}
