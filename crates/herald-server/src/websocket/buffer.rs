//! Per-topic bounded replay window.
//!
//! Every appended event gets the next sequence number for its topic, starting
//! at 1. Only the most recent `capacity` envelopes per topic are retained.

use std::collections::{HashMap, VecDeque};

use herald_core::{BroadcastMessage, Envelope};
use parking_lot::Mutex;
use tracing::debug;

#[derive(Default)]
struct TopicLog {
    last_seq: u64,
    entries: VecDeque<Envelope>,
}

/// Sequence-numbered, bounded per-topic store.
pub struct SequenceBuffer {
    capacity: usize,
    topics: Mutex<HashMap<String, TopicLog>>,
}

impl SequenceBuffer {
    /// Create a buffer retaining at most `capacity` envelopes per topic.
    ///
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: Mutex::new(HashMap::new()),
        }
    }

    /// Per-topic retention.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Assign the next sequence number and store the envelope, evicting the
    /// oldest entry when the topic is full.
    pub fn append(&self, topic: &str, message: BroadcastMessage) -> Envelope {
        let mut topics = self.topics.lock();
        let log = topics.entry(topic.to_owned()).or_default();
        log.last_seq += 1;
        let envelope = Envelope {
            topic: topic.to_owned(),
            event_type: message.event_type,
            payload: message.payload,
            seq: log.last_seq,
            timestamp: herald_core::now_timestamp(),
        };
        if log.entries.len() == self.capacity {
            let _ = log.entries.pop_front();
        }
        log.entries.push_back(envelope.clone());
        envelope
    }

    /// Buffered envelopes with `seq > last_seq`, ascending.
    ///
    /// When `last_seq` predates the window the remaining entries are returned
    /// and the gap is logged.
    pub fn get_since(&self, topic: &str, last_seq: u64) -> Vec<Envelope> {
        let topics = self.topics.lock();
        let Some(log) = topics.get(topic) else {
            return Vec::new();
        };
        if let Some(oldest) = log.entries.front() {
            if last_seq.saturating_add(1) < oldest.seq {
                debug!(
                    topic,
                    last_seq,
                    oldest_retained = oldest.seq,
                    missed = oldest.seq - last_seq - 1,
                    "replay gap, returning partial window"
                );
            }
        }
        log.entries
            .iter()
            .filter(|e| e.seq > last_seq)
            .cloned()
            .collect()
    }

    /// Highest sequence number assigned on `topic` (0 if none).
    pub fn last_seq(&self, topic: &str) -> u64 {
        self.topics.lock().get(topic).map_or(0, |log| log.last_seq)
    }

    /// `(oldest, newest)` retained sequence numbers for `topic`.
    pub fn window(&self, topic: &str) -> Option<(u64, u64)> {
        let topics = self.topics.lock();
        let log = topics.get(topic)?;
        Some((log.entries.front()?.seq, log.entries.back()?.seq))
    }

    /// Number of envelopes currently retained for `topic`.
    pub fn len(&self, topic: &str) -> usize {
        self.topics.lock().get(topic).map_or(0, |log| log.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn msg(event_type: &str) -> BroadcastMessage {
        BroadcastMessage::new(event_type, json!({}))
    }

    fn seqs(envelopes: &[Envelope]) -> Vec<u64> {
        envelopes.iter().map(|e| e.seq).collect()
    }

    #[test]
    fn sequences_start_at_one_and_are_consecutive() {
        let buf = SequenceBuffer::new(10);
        let got: Vec<u64> = (0..5).map(|_| buf.append("agents", msg("e")).seq).collect();
        assert_eq!(got, vec![1, 2, 3, 4, 5]);
        assert_eq!(buf.last_seq("agents"), 5);
    }

    #[test]
    fn topics_are_independent() {
        let buf = SequenceBuffer::new(10);
        assert_eq!(buf.append("agents", msg("a")).seq, 1);
        assert_eq!(buf.append("tasks", msg("t")).seq, 1);
        assert_eq!(buf.append("agents", msg("a")).seq, 2);
        assert_eq!(buf.last_seq("tasks"), 1);
        assert_eq!(buf.last_seq("jobs"), 0);
    }

    #[test]
    fn append_keeps_message_fields() {
        let buf = SequenceBuffer::new(10);
        let env = buf.append("jobs", BroadcastMessage::new("job.progress", json!({"pct": 40})));
        assert_eq!(env.topic, "jobs");
        assert_eq!(env.event_type, "job.progress");
        assert_eq!(env.payload["pct"], 40);
        assert!(env.timestamp.ends_with('Z'));
    }

    #[test]
    fn get_since_returns_newer_ascending() {
        let buf = SequenceBuffer::new(10);
        for _ in 0..4 {
            let _ = buf.append("agents", msg("e"));
        }
        assert_eq!(seqs(&buf.get_since("agents", 1)), vec![2, 3, 4]);
        assert_eq!(seqs(&buf.get_since("agents", 0)), vec![1, 2, 3, 4]);
        assert!(buf.get_since("agents", 4).is_empty());
        assert!(buf.get_since("agents", 99).is_empty());
        assert!(buf.get_since("unknown", 0).is_empty());
    }

    #[test]
    fn oldest_evicted_at_capacity() {
        let buf = SequenceBuffer::new(3);
        for _ in 0..5 {
            let _ = buf.append("tasks", msg("e"));
        }
        assert_eq!(buf.len("tasks"), 3);
        assert_eq!(buf.window("tasks"), Some((3, 5)));
        // last_seq 1 predates the window: partial replay, no error.
        assert_eq!(seqs(&buf.get_since("tasks", 1)), vec![3, 4, 5]);
        assert_eq!(seqs(&buf.get_since("tasks", 3)), vec![4, 5]);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let buf = SequenceBuffer::new(0);
        assert_eq!(buf.capacity(), 1);
        let _ = buf.append("a", msg("x"));
        let _ = buf.append("a", msg("y"));
        assert_eq!(buf.window("a"), Some((2, 2)));
    }

    #[test]
    fn window_of_unknown_topic_is_none() {
        let buf = SequenceBuffer::new(5);
        assert_eq!(buf.window("nothing"), None);
        assert_eq!(buf.len("nothing"), 0);
    }

    #[test]
    fn last_seq_at_u64_max_returns_nothing() {
        let buf = SequenceBuffer::new(4);
        let _ = buf.append("agents", msg("e"));
        assert!(buf.get_since("agents", u64::MAX).is_empty());
    }
}
