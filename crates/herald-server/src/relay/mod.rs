//! Cross-process relay.
//!
//! A [`ProcessRelay`] is built for exactly one [`ProcessRole`]. In a producer
//! process, [`broadcast`](ProcessRelay::broadcast) publishes to the broker
//! subject for the topic and never touches connection or buffer state. In
//! the front process it appends to the local [`EventHub`], and the relay's
//! subscription loops feed events arriving from producers into the same
//! path.
//!
//! Broker trouble never reaches callers: an unreachable broker at startup
//! leaves the relay in degraded mode, and publish failures are logged. A
//! connection lost after startup also moves the relay to degraded mode; the
//! broker client does not reconnect, so recovery is a relay restart.

mod forward;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use herald_broker::{BrokerConnector, BrokerError, MessageBroker};
use herald_core::{BroadcastMessage, Envelope, ProcessRole, RelayEvent};
use herald_settings::HeraldSettings;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::{RELAY_DEGRADED, RELAY_ERRORS_TOTAL, RELAY_PUBLISHED_TOTAL};
use crate::websocket::hub::EventHub;

/// Relay settings.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Topics the front process subscribes to.
    pub topics: Vec<String>,
    /// Subject prefix; topic `t` maps to `<prefix>.t`.
    pub subject_prefix: String,
    /// Bound on the startup connect.
    pub connect_timeout: Duration,
    /// Bound on waiting for subscription loops at shutdown.
    pub drain_timeout: Duration,
}

impl RelayConfig {
    /// Derive from loaded settings.
    pub fn from_settings(settings: &HeraldSettings) -> Self {
        Self {
            topics: settings.topics.clone(),
            subject_prefix: settings.relay.subject_prefix.clone(),
            connect_timeout: settings.relay.connect_timeout(),
            drain_timeout: settings.relay.drain_timeout(),
        }
    }

    /// Broker subject for `topic`.
    pub fn subject_for(&self, topic: &str) -> String {
        format!("{}.{topic}", self.subject_prefix)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::from_settings(&HeraldSettings::default())
    }
}

/// Relay connection state, as reported by `/health`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayMode {
    /// Not started, or shut down.
    Stopped,
    /// No broker configured.
    LocalOnly,
    /// Broker connected.
    Connected,
    /// A broker is configured but could not be reached, or the connection
    /// was lost.
    Degraded,
}

/// What happened to one broadcast.
#[derive(Clone, Debug, PartialEq)]
pub enum BroadcastOutcome {
    /// Sequenced and fanned out in this process.
    Local(Envelope),
    /// Handed to the broker.
    Published {
        /// Subject it was published on.
        subject: String,
    },
    /// Not delivered anywhere (producer without a broker, or publish failed).
    Dropped,
}

enum Dispatch {
    Producer,
    Front(Arc<EventHub>),
}

struct Running {
    broker: Arc<dyn MessageBroker>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

#[derive(Default)]
struct Lifecycle {
    started: bool,
    running: Option<Running>,
}

/// Role-aware bridge between business-logic broadcasts and subscribers.
pub struct ProcessRelay {
    dispatch: Dispatch,
    connector: Option<Arc<dyn BrokerConnector>>,
    config: RelayConfig,
    lifecycle: Mutex<Lifecycle>,
    broker: RwLock<Option<Arc<dyn MessageBroker>>>,
    mode: Arc<RwLock<RelayMode>>,
}

fn publish_mode(mode: RelayMode) {
    metrics::gauge!(RELAY_DEGRADED).set(if mode == RelayMode::Degraded { 1.0 } else { 0.0 });
}

/// `Connected` → `Degraded`. Any other mode is left alone so a concurrent
/// shutdown is not overwritten.
fn connection_lost(mode: &RwLock<RelayMode>, cause: &str) {
    let mut current = mode.write();
    if *current != RelayMode::Connected {
        return;
    }
    *current = RelayMode::Degraded;
    drop(current);
    publish_mode(RelayMode::Degraded);
    metrics::counter!(RELAY_ERRORS_TOTAL, "kind" => "connection_lost").increment(1);
    warn!(cause, "broker connection lost, relay degraded to local-only");
}

impl ProcessRelay {
    /// A producer relay. `connector` is `None` when no broker is configured.
    pub fn producer(connector: Option<Arc<dyn BrokerConnector>>, config: RelayConfig) -> Self {
        Self::with_dispatch(Dispatch::Producer, connector, config)
    }

    /// A front relay delivering into `hub`.
    pub fn front(
        hub: Arc<EventHub>,
        connector: Option<Arc<dyn BrokerConnector>>,
        config: RelayConfig,
    ) -> Self {
        Self::with_dispatch(Dispatch::Front(hub), connector, config)
    }

    fn with_dispatch(
        dispatch: Dispatch,
        connector: Option<Arc<dyn BrokerConnector>>,
        config: RelayConfig,
    ) -> Self {
        Self {
            dispatch,
            connector,
            config,
            lifecycle: Mutex::new(Lifecycle::default()),
            broker: RwLock::new(None),
            mode: Arc::new(RwLock::new(RelayMode::Stopped)),
        }
    }

    /// The role this relay was built for.
    pub fn role(&self) -> ProcessRole {
        match self.dispatch {
            Dispatch::Producer => ProcessRole::Producer,
            Dispatch::Front(_) => ProcessRole::Front,
        }
    }

    /// Current mode.
    pub fn mode(&self) -> RelayMode {
        *self.mode.read()
    }

    /// Whether a configured broker is unreachable or its connection was lost.
    pub fn is_degraded(&self) -> bool {
        self.mode() == RelayMode::Degraded
    }

    /// Relay settings.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    fn set_mode(&self, mode: RelayMode) {
        *self.mode.write() = mode;
        publish_mode(mode);
    }

    /// Connect to the broker and, in the front role, subscribe to every
    /// configured topic. Calling it again while started does nothing.
    pub async fn start(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.started {
            debug!("relay already started");
            return;
        }
        lifecycle.started = true;

        let Some(connector) = self.connector.as_ref() else {
            warn!(role = %self.role(), "no broker configured, relay running local-only");
            self.set_mode(RelayMode::LocalOnly);
            return;
        };

        let target = connector.describe();
        let broker = match tokio::time::timeout(self.config.connect_timeout, connector.connect()).await {
            Ok(Ok(broker)) => broker,
            Ok(Err(e)) => {
                warn!(broker = %target, error = %e, "broker unreachable, relay degraded to local-only");
                metrics::counter!(RELAY_ERRORS_TOTAL, "kind" => "connect").increment(1);
                self.set_mode(RelayMode::Degraded);
                return;
            }
            Err(_) => {
                warn!(
                    broker = %target,
                    timeout_ms = self.config.connect_timeout.as_millis() as u64,
                    "broker connect timed out, relay degraded to local-only"
                );
                metrics::counter!(RELAY_ERRORS_TOTAL, "kind" => "connect").increment(1);
                self.set_mode(RelayMode::Degraded);
                return;
            }
        };

        // Connected before forwarders exist, so an early loss is not masked.
        self.set_mode(RelayMode::Connected);
        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();
        if let Dispatch::Front(hub) = &self.dispatch {
            for topic in &self.config.topics {
                let subject = self.config.subject_for(topic);
                match broker.subscribe(&subject).await {
                    Ok(subscription) => {
                        let forwarder =
                            forward::forward(subscription, topic.clone(), hub.clone(), cancel.child_token());
                        let mode = self.mode.clone();
                        tasks.push(tokio::spawn(async move {
                            if forwarder.await == forward::ForwardExit::Closed {
                                connection_lost(&mode, &format!("subscription {subject} ended"));
                            }
                        }));
                    }
                    Err(BrokerError::Closed) => {
                        connection_lost(&self.mode, &format!("subscribe to {subject} found connection closed"));
                    }
                    Err(e) => {
                        warn!(subject, error = %e, "failed to subscribe relay subject");
                        metrics::counter!(RELAY_ERRORS_TOTAL, "kind" => "subscribe").increment(1);
                    }
                }
            }
        }

        *self.broker.write() = Some(broker.clone());
        lifecycle.running = Some(Running {
            broker,
            cancel,
            tasks,
        });
        let subscriptions = lifecycle.running.as_ref().map_or(0, |r| r.tasks.len());
        info!(role = %self.role(), broker = %target, subscriptions, mode = ?self.mode(), "relay started");
    }

    /// Deliver one event according to the relay's role. Never fails.
    pub async fn broadcast(&self, topic: &str, message: BroadcastMessage) -> BroadcastOutcome {
        match &self.dispatch {
            Dispatch::Front(hub) => BroadcastOutcome::Local(hub.publish(topic, message)),
            Dispatch::Producer => self.publish(topic, message).await,
        }
    }

    async fn publish(&self, topic: &str, message: BroadcastMessage) -> BroadcastOutcome {
        let broker = self.broker.read().clone();
        let Some(broker) = broker else {
            debug!(topic, event_type = %message.event_type, mode = ?self.mode(), "relay not connected, event dropped");
            return BroadcastOutcome::Dropped;
        };

        let subject = self.config.subject_for(topic);
        let bytes = match RelayEvent::new(topic, message).to_bytes() {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                warn!(topic, error = %e, "failed to encode relay event");
                metrics::counter!(RELAY_ERRORS_TOTAL, "kind" => "encode").increment(1);
                return BroadcastOutcome::Dropped;
            }
        };
        match broker.publish(&subject, bytes).await {
            Ok(()) => {
                metrics::counter!(RELAY_PUBLISHED_TOTAL, "topic" => topic.to_owned()).increment(1);
                debug!(subject, "relay event published");
                BroadcastOutcome::Published { subject }
            }
            Err(e) => {
                warn!(subject, error = %e, "relay publish failed");
                metrics::counter!(RELAY_ERRORS_TOTAL, "kind" => "publish").increment(1);
                if matches!(e, BrokerError::Closed | BrokerError::Io(_)) {
                    let _ = self.broker.write().take();
                    connection_lost(&self.mode, &e.to_string());
                }
                BroadcastOutcome::Dropped
            }
        }
    }

    /// Stop subscription loops, drain and drop the broker, and allow a later
    /// [`start`](Self::start).
    pub async fn shutdown(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let _ = self.broker.write().take();
        if let Some(Running {
            broker,
            cancel,
            tasks,
        }) = lifecycle.running.take()
        {
            cancel.cancel();
            let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
            let joined = tokio::time::timeout(
                self.config.drain_timeout,
                futures::future::join_all(tasks),
            )
            .await;
            if joined.is_err() {
                warn!(
                    timeout_ms = self.config.drain_timeout.as_millis() as u64,
                    "relay subscription loops did not stop in time, aborting"
                );
                for handle in aborts {
                    handle.abort();
                }
            }
            match tokio::time::timeout(self.config.drain_timeout, broker.drain()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "broker drain failed"),
                Err(_) => warn!("broker drain timed out"),
            }
        }
        lifecycle.started = false;
        self.set_mode(RelayMode::Stopped);
        info!(role = %self.role(), "relay stopped");
    }
}
