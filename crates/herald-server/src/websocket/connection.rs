//! Per-client state shared between the reader, the writer and the registry.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use herald_core::{ConnectionId, ServerFrame};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Outbound transport: the queue feeding the connection's socket writer task.
pub type Transport = mpsc::Sender<Arc<str>>;

/// Endpoint lifecycle. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
    /// Transport accepted, not yet registered.
    Connecting = 0,
    /// Registered and receiving.
    Open = 1,
    /// Teardown in progress.
    Closing = 2,
    /// Terminal.
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Why an enqueue to a connection failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum SendFailure {
    /// The outbound queue is full (slow or stuck client).
    #[error("outbound queue full")]
    QueueFull,
    /// The writer task has exited.
    #[error("transport closed")]
    Closed,
    /// The frame could not be serialized.
    #[error("frame serialization failed")]
    Serialize,
}

/// One attached WebSocket client.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Outbound queue drained by the writer task.
    tx: Transport,
    /// Subscribed topics. Mutated only by the registry.
    topics: Mutex<BTreeSet<String>>,
    /// Attach time.
    pub created_at: Instant,
    /// When the last pong was received.
    last_pong: Mutex<Instant>,
    state: AtomicU8,
    /// Fires when the connection must wind down.
    cancel: CancellationToken,
    /// Count of messages dropped due to a full or closed channel.
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a new connection.
    pub fn new(id: ConnectionId, tx: Transport) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            topics: Mutex::new(BTreeSet::new()),
            created_at: now,
            last_pong: Mutex::new(now),
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            cancel: CancellationToken::new(),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Enqueue pre-serialized text for the client.
    ///
    /// Never waits: a full queue counts as a failure so one slow client
    /// cannot stall a fan-out.
    pub fn send(&self, message: Arc<str>) -> Result<(), SendFailure> {
        match self.tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                Err(match e {
                    mpsc::error::TrySendError::Full(_) => SendFailure::QueueFull,
                    mpsc::error::TrySendError::Closed(_) => SendFailure::Closed,
                })
            }
        }
    }

    /// Serialize a system frame and enqueue it.
    pub fn send_frame(&self, frame: &ServerFrame) -> Result<(), SendFailure> {
        let json = frame.to_json().map_err(|_| SendFailure::Serialize)?;
        self.send(Arc::from(json))
    }

    /// Frames discarded because the queue was full.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record a pong.
    pub fn mark_alive(&self) {
        *self.last_pong.lock() = Instant::now();
    }

    /// Time since the client last answered a ping, or since it connected.
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Sorted snapshot of subscribed topics.
    pub fn topics(&self) -> Vec<String> {
        self.topics.lock().iter().cloned().collect()
    }

    /// Whether the connection is subscribed to `topic`.
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.topics.lock().contains(topic)
    }

    pub(crate) fn add_topic(&self, topic: &str) -> bool {
        self.topics.lock().insert(topic.to_owned())
    }

    pub(crate) fn remove_topic(&self, topic: &str) -> bool {
        self.topics.lock().remove(topic)
    }

    pub(crate) fn clear_topics(&self) -> Vec<String> {
        std::mem::take(&mut *self.topics.lock()).into_iter().collect()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `next` if it is later than the current state.
    ///
    /// Returns `true` if the state changed.
    pub fn advance(&self, next: ConnectionState) -> bool {
        let prev = self.state.fetch_max(next as u8, Ordering::AcqRel);
        prev < next as u8
    }

    /// Token cancelled when the connection is evicted or torn down.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Ask the endpoint to wind down.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}
