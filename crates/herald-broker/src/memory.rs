//! In-process broker.
//!
//! [`InMemoryBroker`] is the shared bus; each [`connect`](BrokerConnector::connect)
//! returns a client handle that owns its own subscriptions, so draining one
//! client leaves the others untouched. Producer and front relays in the same
//! process (or test) share one bus the way separate processes share a real
//! broker.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::debug;

use crate::errors::{BrokerError, Result};
use crate::{BrokerConnector, BrokerMessage, MessageBroker, Subscription, validate_subject};

/// Queue depth of each in-memory subscription.
const SUBSCRIPTION_BUFFER: usize = 1024;

type Subscribers = HashMap<String, Vec<(u64, mpsc::Sender<BrokerMessage>)>>;

#[derive(Default)]
struct Bus {
    subjects: RwLock<Subscribers>,
    next_id: AtomicU64,
    unreachable: AtomicBool,
    published: AtomicU64,
}

/// Shared in-process bus.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    bus: Arc<Bus>,
}

impl InMemoryBroker {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// A bus whose `connect` always fails, for exercising degraded mode.
    pub fn unreachable() -> Self {
        let broker = Self::new();
        broker.set_unreachable(true);
        broker
    }

    /// Toggle whether new connections are refused.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.bus.unreachable.store(unreachable, Ordering::Relaxed);
    }

    /// Connect synchronously.
    pub fn client(&self) -> MemoryClient {
        MemoryClient {
            bus: self.bus.clone(),
            owned: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Live subscriptions on `subject` across all clients.
    pub fn subscriber_count(&self, subject: &str) -> usize {
        self.bus
            .subjects
            .read()
            .get(subject)
            .map_or(0, |subs| subs.iter().filter(|(_, tx)| !tx.is_closed()).count())
    }

    /// Total messages published on the bus.
    pub fn published_count(&self) -> u64 {
        self.bus.published.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BrokerConnector for InMemoryBroker {
    async fn connect(&self) -> Result<Arc<dyn MessageBroker>> {
        if self.bus.unreachable.load(Ordering::Relaxed) {
            return Err(BrokerError::Connect {
                addr: "memory".into(),
                source: std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "in-memory broker marked unreachable",
                ),
            });
        }
        Ok(Arc::new(self.client()))
    }

    fn describe(&self) -> String {
        "memory".into()
    }
}

/// One client's view of the bus.
pub struct MemoryClient {
    bus: Arc<Bus>,
    owned: Mutex<Vec<(String, u64)>>,
    closed: AtomicBool,
}

#[async_trait]
impl MessageBroker for MemoryClient {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(BrokerError::Closed);
        }
        validate_subject(subject)?;
        let targets: Vec<mpsc::Sender<BrokerMessage>> = self
            .bus
            .subjects
            .read()
            .get(subject)
            .map(|subs| subs.iter().map(|(_, tx)| tx.clone()).collect())
            .unwrap_or_default();
        let _ = self.bus.published.fetch_add(1, Ordering::Relaxed);

        let mut saw_closed = false;
        for tx in targets {
            let msg = BrokerMessage {
                subject: subject.to_owned(),
                payload: payload.clone(),
            };
            if tx.send(msg).await.is_err() {
                saw_closed = true;
            }
        }
        if saw_closed {
            if let Some(subs) = self.bus.subjects.write().get_mut(subject) {
                subs.retain(|(_, tx)| !tx.is_closed());
            }
        }
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(BrokerError::Closed);
        }
        validate_subject(subject)?;
        let id = self.bus.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.bus
            .subjects
            .write()
            .entry(subject.to_owned())
            .or_default()
            .push((id, tx));
        self.owned.lock().push((subject.to_owned(), id));
        debug!(subject, id, "memory subscription added");
        Ok(Subscription::new(subject, rx))
    }

    async fn drain(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::Relaxed) {
            return Ok(());
        }
        let owned = std::mem::take(&mut *self.owned.lock());
        let mut subjects = self.bus.subjects.write();
        for (subject, id) in owned {
            if let Some(subs) = subjects.get_mut(&subject) {
                subs.retain(|(sid, _)| *sid != id);
            }
        }
        subjects.retain(|_, subs| !subs.is_empty());
        Ok(())
    }
}
