//! NATS core protocol client.
//!
//! Speaks the text protocol directly over TCP: `INFO`/`CONNECT` handshake,
//! `PUB`, `SUB`, `UNSUB`, inbound `MSG`, and `PING`/`PONG` keepalive. Headers,
//! TLS, auth and queue groups are not used by the relay and not implemented.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::{BrokerError, Result};
use crate::{BrokerConnector, BrokerMessage, MessageBroker, Subscription, validate_subject};

/// Queue depth of each subscription before the reader applies backpressure.
const SUBSCRIPTION_BUFFER: usize = 1024;

/// Largest payload accepted from the server.
const MAX_PAYLOAD: usize = 8 * 1024 * 1024;

/// Handshake deadline once TCP is connected.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

type Senders = Arc<Mutex<HashMap<u64, (String, mpsc::Sender<BrokerMessage>)>>>;
type Writer = Arc<tokio::sync::Mutex<BufWriter<OwnedWriteHalf>>>;

/// Strip an optional `nats://` scheme.
fn host_port(url: &str) -> &str {
    url.strip_prefix("nats://").unwrap_or(url)
}

/// Connector for a NATS server.
#[derive(Clone, Debug)]
pub struct NatsConnector {
    url: String,
    name: String,
}

impl NatsConnector {
    /// Target `url` (`nats://host:port` or `host:port`); `name` is reported
    /// to the server in `CONNECT`.
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
        }
    }
}

#[async_trait]
impl BrokerConnector for NatsConnector {
    async fn connect(&self) -> Result<Arc<dyn MessageBroker>> {
        let broker = NatsBroker::connect(&self.url, &self.name).await?;
        Ok(Arc::new(broker))
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// A connected NATS client.
#[derive(Debug)]
pub struct NatsBroker {
    writer: Writer,
    senders: Senders,
    next_sid: AtomicU64,
    closed: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl NatsBroker {
    /// Connect and complete the handshake.
    pub async fn connect(url: &str, name: &str) -> Result<Self> {
        let addr = host_port(url);
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| BrokerError::Connect {
                addr: addr.to_owned(),
                source,
            })?;
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut writer = BufWriter::new(write_half);

        tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake(&mut reader, &mut writer, name))
            .await
            .map_err(|_| BrokerError::Protocol("handshake timed out".into()))??;
        info!(addr, "connected to NATS");

        let writer: Writer = Arc::new(tokio::sync::Mutex::new(writer));
        let senders: Senders = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let handle = tokio::spawn(read_loop(
            reader,
            writer.clone(),
            senders.clone(),
            closed.clone(),
        ));

        Ok(Self {
            writer,
            senders,
            next_sid: AtomicU64::new(1),
            closed,
            reader: Mutex::new(Some(handle)),
        })
    }

    /// Whether the connection has been drained or lost.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    async fn write_frame(&self, head: &[u8], payload: Option<&[u8]>) -> Result<()> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        let mut writer = self.writer.lock().await;
        writer.write_all(head).await?;
        if let Some(payload) = payload {
            writer.write_all(payload).await?;
            writer.write_all(b"\r\n").await?;
        }
        writer.flush().await?;
        Ok(())
    }
}

impl Drop for NatsBroker {
    fn drop(&mut self) {
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl MessageBroker for NatsBroker {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        validate_subject(subject)?;
        let head = format!("PUB {subject} {}\r\n", payload.len());
        self.write_frame(head.as_bytes(), Some(&payload)).await
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription> {
        validate_subject(subject)?;
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        let sid = self.next_sid.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let _ = self.senders.lock().insert(sid, (subject.to_owned(), tx));

        let head = format!("SUB {subject} {sid}\r\n");
        if let Err(e) = self.write_frame(head.as_bytes(), None).await {
            let _ = self.senders.lock().remove(&sid);
            return Err(e);
        }
        debug!(subject, sid, "subscribed");
        Ok(Subscription::new(subject, rx))
    }

    async fn drain(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::Relaxed) {
            return Ok(());
        }
        let sids: Vec<u64> = self.senders.lock().keys().copied().collect();
        let result = async {
            let mut writer = self.writer.lock().await;
            for sid in sids {
                writer.write_all(format!("UNSUB {sid}\r\n").as_bytes()).await?;
            }
            writer.flush().await?;
            writer.shutdown().await?;
            Ok::<(), BrokerError>(())
        }
        .await;

        // Dropping the senders ends every subscription stream.
        self.senders.lock().clear();
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
        info!("NATS connection drained");
        result
    }
}

async fn handshake(
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut BufWriter<OwnedWriteHalf>,
    name: &str,
) -> Result<()> {
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Err(BrokerError::Closed);
    }
    if !line.starts_with("INFO") {
        return Err(BrokerError::Protocol(format!(
            "expected INFO, got {:?}",
            line.trim_end()
        )));
    }

    let options = serde_json::json!({
        "verbose": false,
        "pedantic": false,
        "lang": "rust",
        "name": name,
        "protocol": 1,
    });
    writer
        .write_all(format!("CONNECT {options}\r\nPING\r\n").as_bytes())
        .await?;
    writer.flush().await?;

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Err(BrokerError::Closed);
        }
        let trimmed = line.trim_end();
        if trimmed == "PONG" {
            return Ok(());
        }
        if let Some(err) = trimmed.strip_prefix("-ERR") {
            return Err(BrokerError::Protocol(err.trim().to_owned()));
        }
        // +OK and repeated INFO are fine to skip
    }
}

/// Parse `MSG <subject> <sid> [reply-to] <#bytes>`.
fn parse_msg_line(args: &str) -> Option<(String, u64, usize)> {
    let parts: Vec<&str> = args.split_whitespace().collect();
    let (subject, sid, len) = match parts.as_slice() {
        [subject, sid, len] | [subject, sid, _, len] => (*subject, *sid, *len),
        _ => return None,
    };
    Some((subject.to_owned(), sid.parse().ok()?, len.parse().ok()?))
}

async fn read_loop(
    mut reader: BufReader<OwnedReadHalf>,
    writer: Writer,
    senders: Senders,
    closed: Arc<AtomicBool>,
) {
    if let Err(e) = read_frames(&mut reader, &writer, &senders).await {
        if !closed.load(Ordering::Relaxed) {
            warn!(error = %e, "NATS connection lost");
        }
    } else if !closed.load(Ordering::Relaxed) {
        warn!("NATS server closed the connection");
    }
    // Ending the subscription streams is how owners learn the link is gone.
    closed.store(true, Ordering::Relaxed);
    senders.lock().clear();
}

async fn read_frames(
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &Writer,
    senders: &Senders,
) -> Result<()> {
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let trimmed = line.trim_end();

        if let Some(args) = trimmed.strip_prefix("MSG ") {
            let (subject, sid, len) = parse_msg_line(args)
                .ok_or_else(|| BrokerError::Protocol(format!("malformed MSG: {trimmed}")))?;
            if len > MAX_PAYLOAD {
                return Err(BrokerError::Protocol(format!("payload too large: {len}")));
            }
            let mut buf = vec![0u8; len + 2];
            let _ = reader.read_exact(&mut buf).await?;
            buf.truncate(len);

            let target = senders.lock().get(&sid).map(|(_, tx)| tx.clone());
            let Some(tx) = target else {
                debug!(sid, "message for unknown subscription");
                continue;
            };
            let msg = BrokerMessage {
                subject,
                payload: Bytes::from(buf),
            };
            if tx.send(msg).await.is_err() {
                let _ = senders.lock().remove(&sid);
            }
        } else if trimmed == "PING" {
            let mut w = writer.lock().await;
            w.write_all(b"PONG\r\n").await?;
            w.flush().await?;
        } else if let Some(err) = trimmed.strip_prefix("-ERR") {
            warn!(error = err.trim(), "NATS server error");
        } else {
            // PONG, +OK, INFO updates
            debug!(line = trimmed, "ignoring NATS control line");
        }
    }
}
