//! Producer role: publish events to the broker.

use anyhow::{Context, Result};
use herald_core::BroadcastMessage;
use herald_server::{BroadcastOutcome, ProcessRelay};
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, warn};

/// One event to publish.
#[derive(Debug, Deserialize, PartialEq)]
pub struct EmitLine {
    /// Destination topic.
    pub topic: String,
    /// Event body.
    #[serde(flatten)]
    pub message: BroadcastMessage,
}

/// Parse one event. Blank input yields `None`.
pub fn parse_event(raw: &str) -> Result<Option<EmitLine>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    let line: EmitLine = serde_json::from_str(raw).context("invalid event JSON")?;
    if line.topic.trim().is_empty() {
        anyhow::bail!("event topic must not be empty");
    }
    Ok(Some(line))
}

/// Totals for one producer run.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct EmitSummary {
    /// Handed to the broker.
    pub published: usize,
    /// Not delivered (no broker, or publish failed).
    pub dropped: usize,
    /// Lines that could not be parsed.
    pub rejected: usize,
}

impl EmitSummary {
    fn record(&mut self, outcome: &BroadcastOutcome) {
        match outcome {
            BroadcastOutcome::Published { .. } | BroadcastOutcome::Local(_) => self.published += 1,
            BroadcastOutcome::Dropped => self.dropped += 1,
        }
    }
}

async fn emit_one(relay: &ProcessRelay, raw: &str, summary: &mut EmitSummary) {
    match parse_event(raw) {
        Ok(Some(line)) => {
            let outcome = relay.broadcast(&line.topic, line.message).await;
            summary.record(&outcome);
        }
        Ok(None) => {}
        Err(e) => {
            warn!(error = %e, "skipping event");
            summary.rejected += 1;
        }
    }
}

/// Publish every argument event.
pub async fn emit_args(relay: &ProcessRelay, events: &[String]) -> EmitSummary {
    let mut summary = EmitSummary::default();
    for raw in events {
        emit_one(relay, raw, &mut summary).await;
    }
    summary
}

/// Publish every NDJSON line from `reader` until EOF.
pub async fn emit_lines<R>(relay: &ProcessRelay, reader: R) -> Result<EmitSummary>
where
    R: AsyncBufRead + Unpin,
{
    let mut summary = EmitSummary::default();
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await.context("failed to read event input")? {
        emit_one(relay, &line, &mut summary).await;
    }
    Ok(summary)
}

/// Log the outcome of a run.
pub fn report(summary: &EmitSummary) {
    info!(
        published = summary.published,
        dropped = summary.dropped,
        rejected = summary.rejected,
        "producer finished"
    );
}
