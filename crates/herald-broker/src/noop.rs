//! Broker that accepts every operation and delivers nothing.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::errors::Result;
use crate::{BrokerConnector, BrokerMessage, MessageBroker, Subscription, validate_subject};

/// Single-process stand-in for a broker.
///
/// Subscriptions stay open (and silent) until [`drain`](MessageBroker::drain).
#[derive(Default)]
pub struct NoopBroker {
    // Held so subscription streams stay pending rather than ending.
    parked: Mutex<Vec<mpsc::Sender<BrokerMessage>>>,
}

impl NoopBroker {
    /// Create a broker.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageBroker for NoopBroker {
    async fn publish(&self, subject: &str, _payload: Bytes) -> Result<()> {
        validate_subject(subject)
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription> {
        validate_subject(subject)?;
        let (tx, rx) = mpsc::channel(1);
        self.parked.lock().push(tx);
        Ok(Subscription::new(subject, rx))
    }

    async fn drain(&self) -> Result<()> {
        self.parked.lock().clear();
        Ok(())
    }
}

/// Connector producing fresh [`NoopBroker`]s.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopConnector;

#[async_trait]
impl BrokerConnector for NoopConnector {
    async fn connect(&self) -> Result<Arc<dyn MessageBroker>> {
        Ok(Arc::new(NoopBroker::new()))
    }

    fn describe(&self) -> String {
        "noop".into()
    }
}
