//! Broker subscription → local append and fan-out.

use std::sync::Arc;

use herald_broker::{BrokerMessage, Subscription};
use herald_core::RelayEvent;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::metrics::{RELAY_ERRORS_TOTAL, RELAY_RECEIVED_TOTAL};
use crate::websocket::hub::EventHub;

/// Why a forwarder returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ForwardExit {
    /// The relay asked it to stop.
    Cancelled,
    /// The broker ended the subscription on its own.
    Closed,
}

/// Feed every message on `subscription` into the hub as `topic` until
/// cancelled or the subscription ends.
pub(crate) async fn forward(
    mut subscription: Subscription,
    topic: String,
    hub: Arc<EventHub>,
    cancel: CancellationToken,
) -> ForwardExit {
    let subject = subscription.subject().to_owned();
    debug!(subject, topic, "relay forwarder started");
    let exit = loop {
        let message = tokio::select! {
            biased;
            () = cancel.cancelled() => break ForwardExit::Cancelled,
            next = subscription.next() => match next {
                Some(message) => message,
                None => break ForwardExit::Closed,
            },
        };
        let _ = deliver(&message, &topic, &hub);
    };
    debug!(subject, ?exit, "relay forwarder stopped");
    exit
}

/// Decode one broker message and publish it locally under `topic`.
///
/// Returns the assigned sequence number, or `None` if the message was
/// malformed or names a different topic than its subject maps to.
pub(crate) fn deliver(message: &BrokerMessage, topic: &str, hub: &EventHub) -> Option<u64> {
    let event = match RelayEvent::from_slice(&message.payload) {
        Ok(event) => event,
        Err(e) => {
            warn!(subject = %message.subject, error = %e, "malformed relay message, skipping");
            metrics::counter!(RELAY_ERRORS_TOTAL, "kind" => "decode").increment(1);
            return None;
        }
    };
    let (claimed, payload) = event.into_parts();
    if claimed != topic {
        warn!(
            subject = %message.subject,
            topic,
            %claimed,
            "relay message topic does not match its subject, skipping"
        );
        metrics::counter!(RELAY_ERRORS_TOTAL, "kind" => "topic_mismatch").increment(1);
        return None;
    }
    metrics::counter!(RELAY_RECEIVED_TOTAL, "topic" => topic.to_owned()).increment(1);
    Some(hub.publish(topic, payload).seq)
}
