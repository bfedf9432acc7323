//! RoboLink acquisition gateway.
//!
//! Polls the machine controllers over Modbus TCP into the telemetry store and
//! relays the cell camera to WebSocket viewers. Both run as independent tasks
//! under one service runner.

mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use robolink_common::{MemorySink, TelemetrySink};
use robolink_framework::{ServiceArgs, ServiceConfig, ServiceRunner};
use robolink_modbus::TelemetryPoller;
use robolink_relay::{
    EndpointResolver, FfmpegOpener, OnvifResolver, Relay, RelayServer, SessionSettings,
};
use robolink_store::{DatabaseConfig, PgTelemetryStore};
use tracing::{error, info, warn};

use crate::config::GatewayConfig;

/// Modbus telemetry poller and WebSocket camera relay.
#[derive(Parser, Debug)]
#[command(name = "robolink-gateway")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    service: ServiceArgs,

    /// Resolve the camera stream once, log it and exit.
    #[arg(long)]
    probe_camera: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = GatewayConfig::load(&cli.service.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.service.config))?;

    let mut runner = ServiceRunner::new_with_args("robolink-gateway", config, Some(&cli.service))?;
    info!(config = ?cli.service.config, "Loaded configuration");

    let resolver = OnvifResolver::new(&runner.config().camera)
        .context("Failed to create ONVIF client")?;

    if cli.probe_camera {
        return probe_camera(&resolver).await;
    }

    let sink = build_sink(runner.config().database.as_ref()).await;

    let poller = TelemetryPoller::from_config(&runner.config().controller, sink);
    info!(
        host = %runner.config().controller.host,
        port = runner.config().controller.port,
        slaves = runner.config().controller.slave_count,
        interval_secs = runner.config().controller.poll_interval_secs,
        "Telemetry poller configured"
    );
    let shutdown = runner.shutdown_signal();
    runner.spawn("poller", poller.run(shutdown));

    let relay_config = runner.config().relay.clone();
    let relay = Relay::new(
        Arc::new(resolver),
        Arc::new(FfmpegOpener::new(relay_config.ffmpeg.clone())),
        SessionSettings::from(&relay_config),
        runner.shutdown_signal(),
    );
    let server = RelayServer::new(Arc::new(relay), relay_config.listen, relay_config.path);
    let shutdown = runner.shutdown_signal();
    runner.spawn_with_error("relay", server.run(shutdown));

    runner.run().await?;
    Ok(())
}

/// One sink for the whole process; the poller writes every batch through it.
async fn build_sink(database: Option<&DatabaseConfig>) -> Arc<dyn TelemetrySink> {
    match database {
        Some(database) => {
            let store = PgTelemetryStore::new(database);
            match store.ping().await {
                Ok(()) => info!(
                    host = %database.host,
                    database = %database.database,
                    "Connected to telemetry store"
                ),
                Err(e) => warn!(
                    host = %database.host,
                    error = %e,
                    "Telemetry store not reachable yet, batches will be retried each cycle"
                ),
            }
            Arc::new(store)
        }
        None => {
            warn!("No database configured, telemetry is kept in memory only");
            Arc::new(MemorySink::new())
        }
    }
}

async fn probe_camera(resolver: &OnvifResolver) -> Result<()> {
    match resolver.resolve().await {
        Ok(endpoint) => {
            info!(uri = %endpoint, "Camera stream resolved");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Camera stream resolution failed");
            Err(e.into())
        }
    }
}
