//! # herald-core
//!
//! Foundation types shared by every Herald crate.
//!
//! - [`Envelope`] and [`BroadcastMessage`]: the unit of broadcast data
//! - [`RelayEvent`]: the serialized form carried between processes
//! - [`ControlFrame`] / [`ServerFrame`]: the client protocol
//! - [`ConnectionId`] and [`ProcessRole`]
//! - [`params`]: connect-request parameter parsing
//! - [`logging`]: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod envelope;
pub mod ids;
pub mod logging;
pub mod params;
pub mod protocol;
pub mod role;

pub use envelope::{BroadcastMessage, Envelope, RelayEvent};
pub use ids::ConnectionId;
pub use protocol::{ControlFrame, ServerFrame};
pub use role::{ParseRoleError, ProcessRole};

/// Current time as an RFC 3339 UTC string with millisecond precision.
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
