//! Connect-request parameter parsing.
//!
//! `topics=agents,tasks` selects topics; `lastSeq=agents:4,tasks:9` asks for
//! replay. Both are lenient: blank entries and malformed pairs are dropped.

use tracing::debug;

/// Resolve the effective topic list.
///
/// Entries are trimmed, blanks dropped, duplicates removed (first occurrence
/// wins). An absent or empty list yields `defaults`.
pub fn parse_topics(raw: Option<&str>, defaults: &[String]) -> Vec<String> {
    let mut topics: Vec<String> = Vec::new();
    for part in raw.unwrap_or_default().split(',') {
        let topic = part.trim();
        if topic.is_empty() || topics.iter().any(|t| t == topic) {
            continue;
        }
        topics.push(topic.to_owned());
    }
    if topics.is_empty() {
        defaults.to_vec()
    } else {
        topics
    }
}

/// Parse `topic:seq` pairs.
///
/// A repeated topic keeps its last value. The sequence is split on the last
/// `:` so topic names may themselves contain colons.
pub fn parse_last_seq(raw: Option<&str>) -> Vec<(String, u64)> {
    let mut pairs: Vec<(String, u64)> = Vec::new();
    let Some(raw) = raw else {
        return pairs;
    };
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let Some((topic, seq)) = part.rsplit_once(':') else {
            debug!(pair = part, "ignoring lastSeq entry without ':'");
            continue;
        };
        let topic = topic.trim();
        let Ok(seq) = seq.trim().parse::<u64>() else {
            debug!(pair = part, "ignoring lastSeq entry with invalid sequence");
            continue;
        };
        if topic.is_empty() {
            continue;
        }
        if let Some(existing) = pairs.iter_mut().find(|(t, _)| t == topic) {
            existing.1 = seq;
        } else {
            pairs.push((topic.to_owned(), seq));
        }
    }
    pairs
}
