//! # herald-broker
//!
//! The minimal publish/subscribe capability the relay needs from an external
//! message broker, plus three implementations:
//!
//! - [`NatsBroker`]: NATS core protocol over TCP, for real cross-process use
//! - [`InMemoryBroker`]: a shared in-process bus, for tests and single-binary setups
//! - [`NoopBroker`]: accepts everything, delivers nothing
//!
//! A [`BrokerConnector`] produces a connected [`MessageBroker`]; the relay owns
//! the result exclusively for the lifetime of one process.

#![deny(unsafe_code)]

pub mod errors;
pub mod memory;
pub mod nats;
pub mod noop;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

pub use errors::{BrokerError, Result};
pub use memory::{InMemoryBroker, MemoryClient};
pub use nats::{NatsBroker, NatsConnector};
pub use noop::{NoopBroker, NoopConnector};

/// A message received on a subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerMessage {
    /// Subject it was published to.
    pub subject: String,
    /// Raw payload.
    pub payload: Bytes,
}

/// Stream of messages for one subject. Ends when the broker drains or the
/// connection is lost.
#[derive(Debug)]
pub struct Subscription {
    subject: String,
    rx: mpsc::Receiver<BrokerMessage>,
}

impl Subscription {
    /// Wrap a receiver.
    pub fn new(subject: impl Into<String>, rx: mpsc::Receiver<BrokerMessage>) -> Self {
        Self {
            subject: subject.into(),
            rx,
        }
    }

    /// Subject this subscription listens on.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Next message, or `None` once the subscription is closed.
    pub async fn next(&mut self) -> Option<BrokerMessage> {
        self.rx.recv().await
    }
}

/// Publish/subscribe capability.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Publish `payload` on `subject`. Order is preserved per subject.
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()>;

    /// Start receiving messages published on `subject`.
    async fn subscribe(&self, subject: &str) -> Result<Subscription>;

    /// Unsubscribe everything, flush, and close. Idempotent.
    async fn drain(&self) -> Result<()>;
}

impl std::fmt::Debug for dyn MessageBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBroker").finish_non_exhaustive()
    }
}

/// Produces a connected broker.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Establish a connection.
    async fn connect(&self) -> Result<Arc<dyn MessageBroker>>;

    /// Human-readable target for logs.
    fn describe(&self) -> String;
}

/// Reject subjects the wire protocol cannot carry.
pub(crate) fn validate_subject(subject: &str) -> Result<()> {
    if subject.is_empty() || subject.chars().any(char::is_whitespace) {
        return Err(BrokerError::InvalidSubject(subject.to_owned()));
    }
    Ok(())
}
