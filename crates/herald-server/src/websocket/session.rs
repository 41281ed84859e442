//! WebSocket session lifecycle: one connected client from upgrade through
//! teardown.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, StreamExt};
use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::ConnectionState;
use super::handler::handle_control;
use super::hub::{Attached, EventHub};
use crate::metrics::{WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_TOTAL};

/// Parsed `/ws` query parameters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectParams {
    /// Requested topics, in order. Empty means the configured defaults.
    pub topics: Vec<String>,
    /// Last sequence seen per topic.
    pub last_seq: Vec<(String, u64)>,
}

/// Per-connection limits.
#[derive(Clone, Copy, Debug)]
pub struct SessionOptions {
    /// Upper bound on a single socket write.
    pub send_timeout: Duration,
    /// Live envelope slots in the outbound queue.
    pub outbound_queue: usize,
}

/// What an inbound WebSocket message means to the session.
#[derive(Debug, PartialEq, Eq)]
enum Inbound {
    Control(String),
    Alive,
    Close,
    Ignore,
}

fn classify(msg: Message) -> Inbound {
    match msg {
        Message::Text(t) => Inbound::Control(t.as_str().to_owned()),
        Message::Binary(data) => match std::str::from_utf8(&data) {
            Ok(s) => Inbound::Control(s.to_owned()),
            Err(_) => {
                debug!(len = data.len(), "ignoring non-UTF8 binary frame");
                Inbound::Ignore
            }
        },
        Message::Pong(_) | Message::Ping(_) => Inbound::Alive,
        Message::Close(_) => Inbound::Close,
    }
}

/// Run a WebSocket session for a connected client.
///
/// Registration, confirmation and replay happen atomically relative to live
/// fan-out (see [`EventHub::attach`]). Outbound traffic goes through a writer
/// task whose every socket write is bounded by `send_timeout`. The session
/// ends on a close frame, transport error, writer failure, or eviction by
/// the registry; in every case it deregisters exactly once.
#[instrument(skip_all, fields(connection_id = tracing::field::Empty))]
pub async fn run_ws_session(
    ws: WebSocket,
    hub: Arc<EventHub>,
    params: ConnectParams,
    options: SessionOptions,
) {
    let Attached {
        connection,
        outbound,
        topics,
        replayed,
    } = match hub.attach(&params.topics, &params.last_seq, options.outbound_queue) {
        Ok(attached) => attached,
        Err(failure) => {
            warn!(reason = %failure, "failed to attach connection");
            return;
        }
    };
    let _ = tracing::Span::current().record("connection_id", connection.id.as_str());
    let _ = connection.advance(ConnectionState::Open);
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    info!(?topics, replayed, "client connected");

    let (ws_tx, mut ws_rx) = ws.split();
    let cancel = connection.cancel_token().clone();
    let writer = tokio::spawn(write_loop(ws_tx, outbound, cancel.clone(), options.send_timeout));

    let registry = hub.registry();
    loop {
        let msg = tokio::select! {
            () = cancel.cancelled() => {
                debug!("session cancelled");
                break;
            }
            msg = ws_rx.next() => msg,
        };
        let msg = match msg {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                debug!(error = %e, "transport error");
                break;
            }
            None => break,
        };
        match classify(msg) {
            Inbound::Control(text) => {
                let Some(ack) = handle_control(&text, &connection, registry) else {
                    continue;
                };
                if let Err(failure) = connection.send_frame(&ack) {
                    warn!(reason = %failure, "failed to enqueue acknowledgement");
                    break;
                }
            }
            Inbound::Alive => connection.mark_alive(),
            Inbound::Close => {
                info!("client sent close frame");
                break;
            }
            Inbound::Ignore => {}
        }
    }

    let _ = connection.advance(ConnectionState::Closing);
    let _ = registry.disconnect(&connection.id);
    cancel.cancel();
    if let Err(e) = writer.await {
        debug!(error = %e, "writer task ended abnormally");
    }
    let _ = connection.advance(ConnectionState::Closed);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());
    info!(dropped = connection.drop_count(), "client disconnected");
}

/// Forward queued text to the socket until the queue closes, the session is
/// cancelled, or a write fails or exceeds `send_timeout`.
async fn write_loop<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<Arc<str>>,
    cancel: CancellationToken,
    send_timeout: Duration,
) where
    S: Sink<Message> + Unpin,
    <S as Sink<Message>>::Error: std::fmt::Display,
{
    loop {
        let text = tokio::select! {
            () = cancel.cancelled() => break,
            next = outbound.recv() => match next {
                Some(text) => text,
                None => break,
            },
        };
        let frame = Message::Text(String::from(&*text).into());
        match tokio::time::timeout(send_timeout, sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(error = %e, "socket write failed");
                break;
            }
            Err(_) => {
                warn!(timeout_ms = send_timeout.as_millis() as u64, "socket write timed out");
                break;
            }
        }
    }
    cancel.cancel();
    let _ = tokio::time::timeout(send_timeout, sink.close()).await;
}
