//! rosgwd - router gateway daemon
//!
//! Serves the HTTP/WebSocket API in front of the managed routers.
//!
//! Usage:
//!   rosgwd [--config <file.toml>] [--bind <addr>] [--log-json]
//!
//! Without a config file the daemon starts with one simulated router so the
//! API can be explored right away.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use rosgw_api::{create_router, AppState};
use rosgw_conn::{ConnectionManager, TelemetryMultiplexer};
use rosgw_core::{DeviceRegistry, InMemoryRegistry};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;

use config::DaemonConfig;

#[derive(Parser, Debug)]
#[command(name = "rosgwd")]
#[command(about = "Router gateway daemon")]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides `[server] bind`
    #[arg(short, long)]
    bind: Option<String>,

    /// Log as JSON lines instead of human-readable text
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "rosgwd=info,rosgw_api=info,rosgw_conn=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    info!("Starting rosgwd (router gateway daemon)");

    let mut config = match &args.config {
        Some(path) => {
            info!(path = %path.display(), "Loading config");
            DaemonConfig::load(path)?
        }
        None => {
            info!("No config file provided, using a simulated demo router");
            DaemonConfig::demo()
        }
    };
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    let registry = InMemoryRegistry::with_devices(config.devices.clone())
        .context("Invalid device in config")?;
    info!(devices = config.devices.len(), "Inventory loaded");

    let dialer = Arc::new(config.simulator.build_dialer());
    let manager = ConnectionManager::new(
        Arc::new(registry) as Arc<dyn DeviceRegistry>,
        dialer,
        config.connection.clone(),
    );
    manager.start();

    if config.connection.auto_connect {
        let connected = manager.connect_active().await;
        info!(connected, "Startup auto-connect finished");
    }

    let multiplexer = TelemetryMultiplexer::new(Arc::clone(&manager));
    let shutdown = CancellationToken::new();
    let state = AppState::new(multiplexer)
        .with_connect_timeout(config.server.connect_timeout())
        .with_shutdown(shutdown.clone());
    let app = create_router(state);

    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.server.bind))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    manager.shutdown().await;
    info!("rosgwd stopped");
    Ok(())
}

/// Resolve on Ctrl-C and end every streaming session
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
    shutdown.cancel();
}
