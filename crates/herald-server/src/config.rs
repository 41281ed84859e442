//! Server configuration.

use std::time::Duration;

use herald_settings::HeraldSettings;

use crate::websocket::session::SessionOptions;

/// Configuration for the Herald front server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Upper bound on a single socket write.
    pub send_timeout: Duration,
    /// Live envelope slots per connection.
    pub outbound_queue: usize,
    /// Configured topics; the default subscription set.
    pub topics: Vec<String>,
    /// Envelopes retained per topic for replay.
    pub buffer_capacity: usize,
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// Evict connections silent for longer than this.
    pub heartbeat_timeout: Duration,
}

impl ServerConfig {
    /// Derive from loaded settings.
    pub fn from_settings(settings: &HeraldSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_connections: settings.server.max_connections,
            max_message_size: settings.server.max_message_size,
            send_timeout: settings.server.send_timeout(),
            outbound_queue: settings.server.outbound_queue,
            topics: settings.topics.clone(),
            buffer_capacity: settings.buffer.capacity,
            heartbeat_interval: settings.heartbeat.interval(),
            heartbeat_timeout: settings.heartbeat.timeout(),
        }
    }

    /// `host:port` to bind.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub(crate) fn session_options(&self) -> SessionOptions {
        SessionOptions {
            send_timeout: self.send_timeout,
            outbound_queue: self.outbound_queue,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            ..Self::from_settings(&HeraldSettings::default())
        }
    }
}
