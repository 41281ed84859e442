//! # herald
//!
//! Herald binary: wires settings, logging, metrics, the broker connector and
//! the role-specific relay together.

#![deny(unsafe_code)]

mod cli;
mod producer;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use herald_broker::{BrokerConnector, NatsConnector};
use herald_core::ProcessRole;
use herald_core::logging::{init_json_subscriber, init_subscriber};
use herald_server::{HeraldServer, ProcessRelay, RelayConfig, ServerConfig};
use herald_settings::HeraldSettings;
use tokio::io::BufReader;

use crate::cli::Cli;

/// Grace period for background tasks after ctrl-c.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

fn load_settings(cli: &Cli) -> Result<HeraldSettings> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(herald_settings::settings_path);
    let mut settings = herald_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);
    settings.validate().context("Invalid settings after CLI overrides")?;
    Ok(settings)
}

fn connector(settings: &HeraldSettings, role: ProcessRole) -> Option<Arc<dyn BrokerConnector>> {
    settings.relay.url.as_ref().map(|url| {
        let name = format!("herald-{role}");
        Arc::new(NatsConnector::new(url.clone(), name)) as Arc<dyn BrokerConnector>
    })
}

async fn run_front(settings: &HeraldSettings) -> Result<()> {
    let metrics = herald_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;
    let server = HeraldServer::new(
        ServerConfig::from_settings(settings),
        RelayConfig::from_settings(settings),
        connector(settings, ProcessRole::Front),
        metrics,
    );
    let handle = server.listen().await.context("Failed to start server")?;
    tracing::info!("Herald listening on ws://{}/ws", handle.addr);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server.stop(handle, Some(SHUTDOWN_GRACE)).await;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn run_producer(settings: &HeraldSettings, events: &[String]) -> Result<()> {
    let relay = ProcessRelay::producer(
        connector(settings, ProcessRole::Producer),
        RelayConfig::from_settings(settings),
    );
    relay.start().await;

    let summary = if events.is_empty() {
        producer::emit_lines(&relay, BufReader::new(tokio::io::stdin())).await
    } else {
        Ok(producer::emit_args(&relay, events).await)
    };

    relay.shutdown().await;
    let summary = summary?;
    producer::report(&summary);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;

    if settings.logging.json {
        init_json_subscriber(&settings.logging.level);
    } else {
        init_subscriber(&settings.logging.level);
    }
    tracing::info!(role = %cli.role, topics = ?settings.topics, "starting herald");

    match cli.role {
        ProcessRole::Front => run_front(&settings).await,
        ProcessRole::Producer => run_producer(&settings, &cli.events).await,
    }
}
