//! Broadcast envelopes and their cross-process wire form.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What business logic hands to `broadcast()`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    /// Event type, e.g. `"job.progress"`.
    pub event_type: String,
    /// Arbitrary JSON payload.
    #[serde(default)]
    pub payload: Value,
}

impl BroadcastMessage {
    /// Create a message.
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }
}

/// A sequenced, immutable unit of broadcast data as delivered to clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Topic the envelope was broadcast on.
    pub topic: String,
    /// Event type.
    pub event_type: String,
    /// Event payload.
    pub payload: Value,
    /// Per-topic sequence number, starting at 1.
    pub seq: u64,
    /// RFC 3339 creation time.
    pub timestamp: String,
}

impl Envelope {
    /// Serialize to the JSON text sent over the socket.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// An unsequenced event travelling from a producer to the front process.
///
/// Sequence numbers are assigned by the front process on arrival, so the
/// relay form carries none.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelayEvent {
    /// Topic the event belongs to.
    pub topic: String,
    /// Event type.
    pub event_type: String,
    /// Event payload.
    #[serde(default)]
    pub payload: Value,
    /// Time the producer emitted the event.
    pub timestamp: String,
}

impl RelayEvent {
    /// Build a relay event stamped with the current time.
    pub fn new(topic: impl Into<String>, message: BroadcastMessage) -> Self {
        Self {
            topic: topic.into(),
            event_type: message.event_type,
            payload: message.payload,
            timestamp: crate::now_timestamp(),
        }
    }

    /// Encode for publishing.
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Decode a published message.
    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// Split back into topic and message.
    pub fn into_parts(self) -> (String, BroadcastMessage) {
        (
            self.topic,
            BroadcastMessage {
                event_type: self.event_type,
                payload: self.payload,
            },
        )
    }
}
