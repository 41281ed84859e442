//! WebSocket connection management, fan-out and replay.

pub mod buffer;
pub mod connection;
pub mod handler;
pub mod heartbeat;
pub mod hub;
pub mod registry;
pub mod session;
