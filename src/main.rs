//! Home-automation hub web server.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────┐
//!                        │                 HUB WEB SERVER               │
//!                        │                                              │
//!   Browser / app        │  ┌──────────┐   ┌──────────┐   ┌───────────┐ │
//!   ─────────────────────┼─▶│   net    │──▶│   net    │──▶│    hub    │ │
//!   HTTP/1.1, TLS        │  │ listener │   │connection│   │  handler  │ │
//!                        │  └──────────┘   └────┬─────┘   └───────────┘ │
//!                        │                      │ 101                   │
//!   ◀────────────────────┼──────────────────────▼                       │
//!   WebSocket events     │               ┌─────────────┐                │
//!                        │               │  websocket  │◀── broadcast ──┤
//!                        │               │    codec    │    (manager)   │
//!                        │               └─────────────┘                │
//!                        │  config · observability · lifecycle          │
//!                        └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use hub_webserver::config::{load_config, ConfigWatcher, HubConfig};
use hub_webserver::observability::{logging, metrics};
use hub_webserver::{lifecycle, ConnectionManager, HubHandler, HubServer, Shutdown};

#[derive(Parser)]
#[command(name = "hub-webserver")]
#[command(about = "HTTP and WebSocket front end for the home-automation hub", long_about = None)]
struct Cli {
    /// TOML configuration file; built-in defaults when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reload connection settings when the configuration file changes.
    #[arg(short, long, requires = "config")]
    watch: bool,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => HubConfig::default(),
    };

    if cli.check {
        println!("configuration OK ({} listener(s))", config.listeners.len());
        return Ok(());
    }

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "hub-webserver starting");

    tracing::info!(
        listeners = config.listeners.len(),
        idle_timeout_secs = config.connection.idle_timeout_secs,
        close_grace_ms = config.connection.close_grace_ms,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        // Validation guarantees the address parses.
        let addr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    // The watcher must stay alive for updates to flow.
    let (_watcher, updates) = match (&cli.config, cli.watch) {
        (Some(path), true) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            (Some(watcher.run()?), Some(updates))
        }
        _ => (None, None),
    };

    let manager = ConnectionManager::new();
    let handler = Arc::new(HubHandler::new(manager.clone()));
    let server = HubServer::new(config, handler, manager);
    let listeners = server.bind().await?;

    let shutdown = Shutdown::new();
    let shutdown_rx = shutdown.subscribe();
    tokio::spawn(async move {
        lifecycle::wait_for_signal().await;
        shutdown.trigger();
    });

    server.run(listeners, shutdown_rx, updates).await;

    tracing::info!("Shutdown complete");
    Ok(())
}
