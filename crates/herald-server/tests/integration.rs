//! End-to-end tests: a real server on an ephemeral port and real WebSocket
//! clients.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use herald_broker::{BrokerConnector, InMemoryBroker};
use herald_core::BroadcastMessage;
use herald_server::metrics::detached_handle;
use herald_server::{HeraldServer, ProcessRelay, RelayConfig, ServerConfig, ServerHandle};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start(config: ServerConfig, connector: Option<Arc<dyn BrokerConnector>>) -> (HeraldServer, ServerHandle) {
    let server = HeraldServer::new(config, RelayConfig::default(), connector, detached_handle());
    let handle = server.listen().await.unwrap();
    (server, handle)
}

async fn connect(handle: &ServerHandle, query: &str) -> Client {
    let url = format!("ws://{}/ws{query}", handle.addr);
    let (ws, _resp) = connect_async(url).await.unwrap();
    ws
}

/// Next JSON text frame, skipping transport-level frames.
async fn next_json(ws: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("transport error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Asserts nothing arrives within a short window.
async fn assert_quiet(ws: &mut Client) {
    let res = tokio::time::timeout(Duration::from_millis(150), ws.next()).await;
    assert!(res.is_err(), "unexpected frame: {res:?}");
}

async fn wait_for_connections(server: &HeraldServer, expected: usize) {
    for _ in 0..100 {
        if server.hub().registry().live_connections() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "expected {expected} connections, have {}",
        server.hub().registry().live_connections()
    );
}

#[tokio::test]
async fn confirmation_lists_requested_topics() {
    let (server, handle) = start(ServerConfig::default(), None).await;
    let mut ws = connect(&handle, "?topics=agents,tasks").await;

    let established = next_json(&mut ws).await;
    assert_eq!(established["event_type"], "connection.established");
    assert_eq!(established["topics"], json!(["agents", "tasks"]));
    assert!(established["connection_id"].as_str().unwrap().starts_with("conn_"));

    server.stop(handle, Some(Duration::from_secs(2))).await;
}

#[tokio::test]
async fn no_topics_subscribes_to_all_configured() {
    let config = ServerConfig {
        topics: vec!["agents".into(), "jobs".into()],
        ..ServerConfig::default()
    };
    let (server, handle) = start(config, None).await;
    let mut ws = connect(&handle, "").await;
    assert_eq!(next_json(&mut ws).await["topics"], json!(["agents", "jobs"]));
    server.stop(handle, Some(Duration::from_secs(2))).await;
}

#[tokio::test]
async fn broadcast_reaches_only_topic_subscribers() {
    let (server, handle) = start(ServerConfig::default(), None).await;
    let mut agents = connect(&handle, "?topics=agents").await;
    let mut tasks = connect(&handle, "?topics=tasks").await;
    let _ = next_json(&mut agents).await;
    let _ = next_json(&mut tasks).await;

    let _ = server
        .broadcast("agents", BroadcastMessage::new("agent.validated", json!({"id": 42})))
        .await;

    let env = next_json(&mut agents).await;
    assert_eq!(env["topic"], "agents");
    assert_eq!(env["event_type"], "agent.validated");
    assert_eq!(env["payload"]["id"], 42);
    assert_eq!(env["seq"], 1);
    assert_quiet(&mut tasks).await;

    server.stop(handle, Some(Duration::from_secs(2))).await;
}

#[tokio::test]
async fn reconnect_replays_missed_before_live() {
    let (server, handle) = start(ServerConfig::default(), None).await;

    let mut first = connect(&handle, "?topics=agents").await;
    let _ = next_json(&mut first).await;
    for i in 1..=3 {
        let _ = server
            .broadcast("agents", BroadcastMessage::new("agent.step", json!({"i": i})))
            .await;
    }
    assert_eq!(next_json(&mut first).await["seq"], 1);
    first.close(None).await.unwrap();
    drop(first);

    let mut second = connect(&handle, "?topics=agents&lastSeq=agents:1").await;
    assert_eq!(next_json(&mut second).await["event_type"], "connection.established");
    let _ = server
        .broadcast("agents", BroadcastMessage::new("agent.step", json!({"i": 4})))
        .await;

    let seqs: Vec<u64> = [
        next_json(&mut second).await,
        next_json(&mut second).await,
        next_json(&mut second).await,
    ]
    .iter()
    .map(|e| e["seq"].as_u64().unwrap())
    .collect();
    assert_eq!(seqs, vec![2, 3, 4]);

    server.stop(handle, Some(Duration::from_secs(2))).await;
}

#[tokio::test]
async fn subscribe_and_unsubscribe_at_runtime() {
    let (server, handle) = start(ServerConfig::default(), None).await;
    let mut ws = connect(&handle, "?topics=agents").await;
    let _ = next_json(&mut ws).await;

    ws.send(Message::text(r#"{"action":"subscribe","topic":"jobs"}"#))
        .await
        .unwrap();
    let ack = next_json(&mut ws).await;
    assert_eq!(ack["event_type"], "subscribed");
    assert_eq!(ack["topic"], "jobs");
    assert_eq!(ack["success"], true);

    let _ = server
        .broadcast("jobs", BroadcastMessage::new("job.progress", json!({"pct": 10})))
        .await;
    assert_eq!(next_json(&mut ws).await["topic"], "jobs");

    ws.send(Message::text(r#"{"action":"unsubscribe","topic":"jobs"}"#))
        .await
        .unwrap();
    assert_eq!(next_json(&mut ws).await["event_type"], "unsubscribed");
    let _ = server
        .broadcast("jobs", BroadcastMessage::new("job.progress", json!({"pct": 20})))
        .await;
    assert_quiet(&mut ws).await;

    server.stop(handle, Some(Duration::from_secs(2))).await;
}

#[tokio::test]
async fn malformed_control_frames_are_ignored() {
    let (server, handle) = start(ServerConfig::default(), None).await;
    let mut ws = connect(&handle, "?topics=agents").await;
    let _ = next_json(&mut ws).await;

    ws.send(Message::text("not json")).await.unwrap();
    ws.send(Message::text(r#"{"action":"pong"}"#)).await.unwrap();
    assert_quiet(&mut ws).await;

    let _ = server
        .broadcast("agents", BroadcastMessage::new("still.alive", json!(null)))
        .await;
    assert_eq!(next_json(&mut ws).await["event_type"], "still.alive");

    server.stop(handle, Some(Duration::from_secs(2))).await;
}

#[tokio::test]
async fn closed_client_is_deregistered() {
    let (server, handle) = start(ServerConfig::default(), None).await;
    let mut ws = connect(&handle, "?topics=agents").await;
    let _ = next_json(&mut ws).await;
    assert_eq!(server.hub().registry().get_connection_count(Some("agents")), 1);

    ws.close(None).await.unwrap();
    wait_for_connections(&server, 0).await;
    assert_eq!(server.hub().registry().get_connection_count(Some("agents")), 0);

    server.stop(handle, Some(Duration::from_secs(2))).await;
}

#[tokio::test]
async fn upgrades_beyond_limit_get_503() {
    let config = ServerConfig {
        max_connections: 1,
        ..ServerConfig::default()
    };
    let (server, handle) = start(config, None).await;
    let mut first = connect(&handle, "?topics=agents").await;
    let _ = next_json(&mut first).await;

    let url = format!("ws://{}/ws?topics=agents", handle.addr);
    match connect_async(url).await {
        Err(tokio_tungstenite::tungstenite::Error::Http(resp)) => {
            assert_eq!(resp.status().as_u16(), 503);
        }
        other => panic!("expected HTTP 503, got {:?}", other.map(|_| ())),
    }

    server.stop(handle, Some(Duration::from_secs(2))).await;
}

#[tokio::test]
async fn concurrent_upgrades_never_exceed_limit() {
    let config = ServerConfig {
        max_connections: 2,
        ..ServerConfig::default()
    };
    let (server, handle) = start(config, None).await;
    let url = format!("ws://{}/ws?topics=agents", handle.addr);

    let attempts = futures::future::join_all((0..8).map(|_| connect_async(url.clone()))).await;
    let mut accepted = Vec::new();
    let mut rejected = 0;
    for attempt in attempts {
        match attempt {
            Ok((ws, _)) => accepted.push(ws),
            Err(tokio_tungstenite::tungstenite::Error::Http(resp)) => {
                assert_eq!(resp.status().as_u16(), 503);
                rejected += 1;
            }
            Err(e) => panic!("unexpected connect error: {e}"),
        }
    }
    assert_eq!(accepted.len(), 2);
    assert_eq!(rejected, 6);

    for mut ws in accepted {
        let _ = next_json(&mut ws).await;
    }
    assert_eq!(server.hub().registry().live_connections(), 2);

    server.stop(handle, Some(Duration::from_secs(2))).await;
}

#[tokio::test]
async fn producer_events_reach_front_clients() {
    let bus = InMemoryBroker::new();
    let (server, handle) = start(ServerConfig::default(), Some(Arc::new(bus.clone()))).await;
    let mut ws = connect(&handle, "?topics=extractions").await;
    let _ = next_json(&mut ws).await;

    let producer = ProcessRelay::producer(Some(Arc::new(bus.clone())), RelayConfig::default());
    producer.start().await;
    let _ = producer
        .broadcast("extractions", BroadcastMessage::new("extraction.done", json!({"doc": 9})))
        .await;

    let env = next_json(&mut ws).await;
    assert_eq!(env["topic"], "extractions");
    assert_eq!(env["event_type"], "extraction.done");
    assert_eq!(env["seq"], 1);

    producer.shutdown().await;
    server.stop(handle, Some(Duration::from_secs(2))).await;
}

#[tokio::test]
async fn health_reports_live_state() {
    let (server, handle) = start(ServerConfig::default(), None).await;
    let mut ws = connect(&handle, "?topics=agents").await;
    let _ = next_json(&mut ws).await;

    let mut stream = TcpStream::connect(handle.addr).await.unwrap();
    let request = format!(
        "GET /health HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        handle.addr
    );
    tokio::io::AsyncWriteExt::write_all(&mut stream, request.as_bytes())
        .await
        .unwrap();
    let mut raw = String::new();
    let _ = tokio::io::AsyncReadExt::read_to_string(&mut stream, &mut raw)
        .await
        .unwrap();
    let body = raw.split("\r\n\r\n").nth(1).unwrap();
    let health: Value = serde_json::from_str(body).unwrap();
    assert_eq!(health["connections"], 1);
    assert_eq!(health["relay"], "local_only");

    server.stop(handle, Some(Duration::from_secs(2))).await;
}
