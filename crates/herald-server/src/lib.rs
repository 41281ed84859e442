//! # herald-server
//!
//! The front process of Herald: topic-scoped WebSocket fan-out with replay.
//!
//! - Sequence buffer: per-topic bounded replay window
//! - Connection registry: live connections and topic membership, local fan-out
//! - Event hub: ordered append + fan-out, atomic attach with replay
//! - Process relay: producer/front bridge over a message broker
//! - Heartbeat monitor: ping and eviction of silent clients
//! - Axum server: `/ws`, `/health`, `/metrics`

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod relay;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use errors::ServerError;
pub use relay::{BroadcastOutcome, ProcessRelay, RelayConfig, RelayMode};
pub use server::{HeraldServer, ServerHandle};
pub use websocket::hub::EventHub;
pub use websocket::registry::ConnectionRegistry;
