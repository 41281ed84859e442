//! Settings types.
//!
//! Every section defaults independently so a settings file may override any
//! subset of keys. Durations are stored in milliseconds and exposed as
//! [`Duration`] through accessors.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeraldSettings {
    /// HTTP/WebSocket listener.
    pub server: ServerSettings,
    /// Topics clients receive by default and the front process relays.
    pub topics: Vec<String>,
    /// Replay buffer.
    pub buffer: BufferSettings,
    /// Liveness probing.
    pub heartbeat: HeartbeatSettings,
    /// Cross-process relay.
    pub relay: RelaySettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl Default for HeraldSettings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            topics: default_topics(),
            buffer: BufferSettings::default(),
            heartbeat: HeartbeatSettings::default(),
            relay: RelaySettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

fn default_topics() -> Vec<String> {
    ["agents", "tasks", "jobs", "classifications", "providers", "extractions"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Usable inside a broker subject.
fn is_subject_token(s: &str) -> bool {
    !s.is_empty() && !s.chars().any(char::is_whitespace)
}

impl HeraldSettings {
    /// Reject values that would make the subsystem misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.buffer.capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "buffer capacity must be at least 1".into(),
            ));
        }
        if self.heartbeat.interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "heartbeat interval must be positive".into(),
            ));
        }
        if self.heartbeat.timeout_ms < self.heartbeat.interval_ms {
            return Err(SettingsError::InvalidValue(format!(
                "heartbeat timeout ({} ms) is shorter than its interval ({} ms)",
                self.heartbeat.timeout_ms, self.heartbeat.interval_ms
            )));
        }
        if self.server.outbound_queue == 0 {
            return Err(SettingsError::InvalidValue(
                "outbound queue must hold at least one message".into(),
            ));
        }
        if let Some(bad) = self.topics.iter().find(|t| !is_subject_token(t) || t.contains(',')) {
            return Err(SettingsError::InvalidValue(format!(
                "topic {bad:?} must be non-empty with no commas or whitespace"
            )));
        }
        if !is_subject_token(&self.relay.subject_prefix) {
            return Err(SettingsError::InvalidValue(
                "relay subject prefix must be non-empty with no whitespace".into(),
            ));
        }
        Ok(())
    }
}

/// HTTP/WebSocket listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// Upgrades beyond this many live connections are refused.
    pub max_connections: usize,
    /// Largest inbound WebSocket message in bytes.
    pub max_message_size: usize,
    /// Per-write socket timeout in milliseconds.
    pub send_timeout_ms: u64,
    /// Per-connection outbound queue depth.
    pub outbound_queue: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8765,
            max_connections: 1024,
            max_message_size: 64 * 1024,
            send_timeout_ms: 10_000,
            outbound_queue: 256,
        }
    }
}

impl ServerSettings {
    /// Socket write timeout.
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

/// Replay buffer settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BufferSettings {
    /// Envelopes retained per topic.
    pub capacity: usize,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self { capacity: 200 }
    }
}

/// Heartbeat settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatSettings {
    /// Ping interval in milliseconds.
    pub interval_ms: u64,
    /// Silence after which a connection is evicted, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            timeout_ms: 90_000,
        }
    }
}

impl HeartbeatSettings {
    /// Ping interval.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Eviction timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Relay settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Broker address (`nats://host:port` or `host:port`). `None` runs local-only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Subject prefix; topic `t` maps to `<prefix>.t`.
    pub subject_prefix: String,
    /// Startup connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Shutdown drain timeout in milliseconds.
    pub drain_timeout_ms: u64,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            url: None,
            subject_prefix: "events".into(),
            connect_timeout_ms: 3_000,
            drain_timeout_ms: 5_000,
        }
    }
}

impl RelaySettings {
    /// Startup connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Shutdown drain timeout.
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Subject for a topic.
    pub fn subject_for(&self, topic: &str) -> String {
        format!("{}.{topic}", self.subject_prefix)
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}
