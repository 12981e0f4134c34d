//! CDL Gateway
//!
//! Accepts analysis requests over HTTP and publishes them to quorum queues on
//! a RabbitMQ cluster, failing over between nodes.
//!
//! Configuration comes from an optional TOML file (`--config` or
//! `CDL_GATEWAY_CONFIG`) overridden by environment variables; a `.env` file in
//! the working directory is loaded first.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use cg_api::{create_router, RouteTable};
use cg_broker::{LapinConnector, Publisher, SharedPublisher};
use cg_config::GatewayConfig;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "cg-gateway")]
#[command(about = "CDL Gateway - HTTP to RabbitMQ cluster publisher")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, env = "CDL_GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let config = GatewayConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    cg_common::init_logging(&config.logging.level, config.logging.json || args.log_json);

    info!("Starting CDL Gateway");
    log_startup_summary(&config);

    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;

    let mut publisher = Publisher::from_config(&config, Arc::new(LapinConnector::new()));
    match publisher.connect().await {
        Ok(index) => info!(node_index = index, "Connected to broker cluster"),
        // Not fatal: every send reconnects on demand
        Err(e) => warn!(error = %e, "Broker cluster unreachable at startup"),
    }
    let publisher = Arc::new(SharedPublisher::new(publisher));

    let routes = RouteTable::new(config.routing.clone(), config.priorities);
    let app = create_router(publisher.clone(), routes, Some(metrics));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(addr = %addr, "Starting HTTP API server");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown signal received, closing broker connection");
    publisher.close().await;

    info!("CDL Gateway shutdown complete");
    Ok(())
}

fn log_startup_summary(config: &GatewayConfig) {
    info!("==========================================");
    info!("CDL Gateway configuration");
    for (index, node) in config.broker.nodes.iter().enumerate() {
        info!(index, node = %node.key(), "Broker node");
    }
    info!(
        sender_id = %config.broker.sender_id,
        retry_attempts = config.broker.retry_attempts,
        max_publish_retries = config.broker.max_publish_retries,
        breaker_cooldown_secs = config.broker.breaker_cooldown_secs,
        publisher_confirms = config.broker.publisher_confirms,
        "Broker settings"
    );
    info!(default_queue = %config.routing.default_queue, "Routing");
    info!("==========================================");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
