//! Client protocol frames.
//!
//! Inbound frames are tagged by `action`; outbound system frames are tagged by
//! `event_type` so clients can dispatch every server message on one field.

use serde::{Deserialize, Serialize};

use crate::ids::ConnectionId;

/// A control frame sent by the client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ControlFrame {
    /// Start receiving a topic.
    Subscribe {
        /// Topic name.
        topic: String,
    },
    /// Stop receiving a topic.
    Unsubscribe {
        /// Topic name.
        topic: String,
    },
    /// Heartbeat reply.
    Pong,
}

impl ControlFrame {
    /// Parse a text frame. Returns `None` for anything unrecognised.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

/// A system frame sent by the server (everything that is not an envelope).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum ServerFrame {
    /// First frame on every connection.
    #[serde(rename = "connection.established")]
    Established {
        /// Assigned connection id.
        connection_id: ConnectionId,
        /// Effective topic list.
        topics: Vec<String>,
        /// RFC 3339 time.
        timestamp: String,
    },
    /// Acknowledges a subscribe control frame.
    #[serde(rename = "subscribed")]
    Subscribed {
        /// Topic name.
        topic: String,
        /// Whether membership changed.
        success: bool,
        /// RFC 3339 time.
        timestamp: String,
    },
    /// Acknowledges an unsubscribe control frame.
    #[serde(rename = "unsubscribed")]
    Unsubscribed {
        /// Topic name.
        topic: String,
        /// Whether membership changed.
        success: bool,
        /// RFC 3339 time.
        timestamp: String,
    },
    /// Heartbeat ping; clients answer with `{"action":"pong"}`.
    #[serde(rename = "ping")]
    Ping {
        /// RFC 3339 time.
        timestamp: String,
    },
}

impl ServerFrame {
    /// Confirmation frame for a freshly accepted connection.
    pub fn established(connection_id: ConnectionId, topics: Vec<String>) -> Self {
        Self::Established {
            connection_id,
            topics,
            timestamp: crate::now_timestamp(),
        }
    }

    /// Heartbeat ping stamped now.
    pub fn ping() -> Self {
        Self::Ping {
            timestamp: crate::now_timestamp(),
        }
    }

    /// Serialize to socket text.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
