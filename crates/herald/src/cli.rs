//! Command-line interface.

use std::path::PathBuf;

use clap::Parser;
use herald_core::ProcessRole;
use herald_settings::HeraldSettings;
use herald_settings::loader::parse_topic_list;

/// Herald real-time event distribution.
///
/// `--role front` serves WebSocket clients and receives producer events from
/// the broker. `--role producer` publishes events (given as JSON arguments
/// or NDJSON on stdin) to the broker and exits.
#[derive(Parser, Debug)]
#[command(name = "herald", version, about = "Herald event distribution")]
pub struct Cli {
    /// Process role.
    #[arg(long, env = "HERALD_ROLE", default_value = "front")]
    pub role: ProcessRole,

    /// Settings file (defaults to `~/.herald/settings.json`).
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Host to bind (front).
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind (front).
    #[arg(long)]
    pub port: Option<u16>,

    /// Broker URL, e.g. `nats://127.0.0.1:4222`.
    #[arg(long)]
    pub relay_url: Option<String>,

    /// Comma-separated topic list.
    #[arg(long)]
    pub topics: Option<String>,

    /// Log level when `RUST_LOG` is unset.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,

    /// Events to publish (producer), each `{"topic":…,"event_type":…,"payload":…}`.
    /// Read from stdin when none are given.
    pub events: Vec<String>,
}

impl Cli {
    /// Apply flag overrides on top of loaded settings.
    pub fn apply(&self, settings: &mut HeraldSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(url) = &self.relay_url {
            settings.relay.url = Some(url.clone());
        }
        if let Some(topics) = &self.topics {
            let topics = parse_topic_list(topics);
            if !topics.is_empty() {
                settings.topics = topics;
            }
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.log_json {
            settings.logging.json = true;
        }
    }
}
