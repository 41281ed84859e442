//! `HeraldServer`: Axum HTTP + WebSocket front server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use herald_broker::BrokerConnector;
use herald_core::BroadcastMessage;
use herald_core::params::{parse_last_seq, parse_topics};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::errors::{Result, ServerError};
use crate::health::{self, HealthResponse};
use crate::metrics::WS_REJECTED_TOTAL;
use crate::relay::{BroadcastOutcome, ProcessRelay, RelayConfig};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::heartbeat::HeartbeatMonitor;
use crate::websocket::hub::EventHub;
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::session::{ConnectParams, run_ws_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Sequencing and fan-out.
    pub hub: Arc<EventHub>,
    /// Cross-process relay (front role).
    pub relay: Arc<ProcessRelay>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus renderer.
    pub metrics: PrometheusHandle,
    /// One permit per allowed connection, held for the session's lifetime.
    pub slots: Arc<Semaphore>,
}

impl AppState {
    /// Reserve a connection slot, or `None` at `max_connections`.
    pub fn reserve_slot(&self) -> Option<OwnedSemaphorePermit> {
        self.slots.clone().try_acquire_owned().ok()
    }
}

/// Raw `/ws` query string.
#[derive(Debug, Default, Deserialize)]
struct WsQuery {
    topics: Option<String>,
    #[serde(rename = "lastSeq")]
    last_seq: Option<String>,
}

/// Returned by [`HeraldServer::listen`]; keeps background tasks reachable.
pub struct ServerHandle {
    /// Bound address.
    pub addr: SocketAddr,
    /// HTTP server and heartbeat monitor tasks.
    pub tasks: Vec<JoinHandle<()>>,
}

/// The front server.
pub struct HeraldServer {
    state: AppState,
    shutdown: Arc<ShutdownCoordinator>,
}

impl HeraldServer {
    /// Build the registry, hub and front relay.
    ///
    /// `connector` is `None` when no broker is configured.
    pub fn new(
        config: ServerConfig,
        relay_config: RelayConfig,
        connector: Option<Arc<dyn BrokerConnector>>,
        metrics: PrometheusHandle,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(config.topics.clone()));
        let hub = Arc::new(EventHub::new(registry, config.buffer_capacity));
        let relay = Arc::new(ProcessRelay::front(hub.clone(), connector, relay_config));
        let slots = Arc::new(Semaphore::new(config.max_connections));
        Self {
            state: AppState {
                hub,
                relay,
                config: Arc::new(config),
                start_time: Instant::now(),
                metrics,
                slots,
            },
            shutdown: Arc::new(ShutdownCoordinator::new()),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Sequencing and fan-out.
    pub fn hub(&self) -> &Arc<EventHub> {
        &self.state.hub
    }

    /// The front relay.
    pub fn relay(&self) -> &Arc<ProcessRelay> {
        &self.state.relay
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Business-logic entrypoint.
    pub async fn broadcast(&self, topic: &str, message: BroadcastMessage) -> BroadcastOutcome {
        self.state.relay.broadcast(topic, message).await
    }

    /// Start the relay, bind, and spawn the HTTP server and heartbeat monitor.
    pub async fn listen(&self) -> Result<ServerHandle> {
        self.state.relay.start().await;

        let bind = self.state.config.bind_address();
        let listener = tokio::net::TcpListener::bind(&bind)
            .await
            .map_err(|source| ServerError::Bind {
                addr: bind.clone(),
                source,
            })?;
        let addr = listener.local_addr()?;

        let router = self.router();
        let stop = self.shutdown.child();
        let server = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { stop.cancelled().await })
                .await;
            if let Err(e) = result {
                warn!(error = %e, "http server exited with error");
            }
        });

        let monitor = HeartbeatMonitor::new(
            self.state.hub.registry().clone(),
            self.state.config.heartbeat_interval,
            self.state.config.heartbeat_timeout,
        );
        let heartbeat = tokio::spawn(monitor.run(self.shutdown.child()));

        info!(%addr, topics = ?self.state.config.topics, relay = ?self.state.relay.mode(), "herald server listening");
        Ok(ServerHandle {
            addr,
            tasks: vec![server, heartbeat],
        })
    }

    /// Stop accepting, close every connection, wait for background tasks and
    /// shut the relay down.
    pub async fn stop(&self, handle: ServerHandle, grace: Option<Duration>) {
        self.shutdown.trigger();
        for conn in self.state.hub.registry().connections() {
            conn.cancel();
        }
        let _ = self.shutdown.drain(handle.tasks, grace).await;
        self.state.relay.shutdown().await;
        info!("herald server stopped");
    }
}

/// GET /ws
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let Some(slot) = state.reserve_slot() else {
        warn!(
            live = state.hub.registry().live_connections(),
            max = state.config.max_connections,
            "connection limit reached, rejecting upgrade"
        );
        metrics::counter!(WS_REJECTED_TOTAL).increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    };

    let params = ConnectParams {
        topics: parse_topics(query.topics.as_deref(), &state.config.topics),
        last_seq: parse_last_seq(query.last_seq.as_deref()),
    };
    let options = state.config.session_options();
    let hub = state.hub.clone();
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            run_ws_session(socket, hub, params, options).await;
            drop(slot);
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = state.hub.registry();
    Json(health::health_check(
        state.start_time,
        registry.live_connections(),
        registry.topic_counts(),
        state.relay.mode(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics.render()
}
