//! Inbound control frame dispatch.

use herald_core::{ControlFrame, ServerFrame, now_timestamp};
use tracing::debug;

use super::connection::ClientConnection;
use super::registry::ConnectionRegistry;

/// Apply one inbound text frame.
///
/// Returns the acknowledgement to send back, if any. Unparseable frames are
/// ignored.
pub fn handle_control(
    text: &str,
    connection: &ClientConnection,
    registry: &ConnectionRegistry,
) -> Option<ServerFrame> {
    let Some(frame) = ControlFrame::parse(text) else {
        debug!(connection_id = %connection.id, len = text.len(), "ignoring unrecognized frame");
        return None;
    };

    match frame {
        ControlFrame::Subscribe { topic } => {
            let success = registry.subscribe(&connection.id, &topic);
            Some(ServerFrame::Subscribed {
                topic,
                success,
                timestamp: now_timestamp(),
            })
        }
        ControlFrame::Unsubscribe { topic } => {
            let success = registry.unsubscribe(&connection.id, &topic);
            Some(ServerFrame::Unsubscribed {
                topic,
                success,
                timestamp: now_timestamp(),
            })
        }
        ControlFrame::Pong => {
            connection.mark_alive();
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use assert_matches::assert_matches;
    use tokio::sync::mpsc;

    fn setup() -> (ConnectionRegistry, Arc<ClientConnection>, mpsc::Receiver<Arc<str>>) {
        let reg = ConnectionRegistry::new(vec!["agents".into()]);
        let (tx, rx) = mpsc::channel(8);
        let conn = reg.connect(tx, &["agents".to_string()]);
        (reg, conn, rx)
    }

    #[test]
    fn subscribe_adds_topic_and_acks() {
        let (reg, conn, _rx) = setup();
        let ack = handle_control(r#"{"action":"subscribe","topic":"tasks"}"#, &conn, &reg);
        assert_matches!(ack, Some(ServerFrame::Subscribed { ref topic, success: true, .. }) if topic == "tasks");
        assert!(conn.is_subscribed("tasks"));
        assert_eq!(reg.get_connection_count(Some("tasks")), 1);
    }

    #[test]
    fn unsubscribe_removes_topic_and_acks() {
        let (reg, conn, _rx) = setup();
        let ack = handle_control(r#"{"action":"unsubscribe","topic":"agents"}"#, &conn, &reg);
        assert_matches!(ack, Some(ServerFrame::Unsubscribed { success: true, .. }));
        assert_eq!(reg.get_connection_count(Some("agents")), 0);
    }

    #[test]
    fn subscribe_after_disconnect_fails() {
        let (reg, conn, _rx) = setup();
        assert!(reg.disconnect(&conn.id));
        let ack = handle_control(r#"{"action":"subscribe","topic":"tasks"}"#, &conn, &reg);
        assert_matches!(ack, Some(ServerFrame::Subscribed { success: false, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn pong_marks_alive_without_reply() {
        let (reg, conn, _rx) = setup();
        tokio::time::advance(Duration::from_secs(40)).await;
        assert!(handle_control(r#"{"action":"pong"}"#, &conn, &reg).is_none());
        assert!(conn.last_pong_elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn malformed_frames_ignored() {
        let (reg, conn, _rx) = setup();
        for text in ["", "{", r#"{"action":"shout"}"#, r#"{"topic":"x"}"#, "42"] {
            assert!(handle_control(text, &conn, &reg).is_none(), "{text}");
        }
        assert_eq!(conn.topics(), vec!["agents".to_string()]);
    }
}
