//! Admission gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                   ┌───────────────────────────────────────────────────────┐
//!                   │                  ADMISSION GATEWAY                    │
//!                   │                                                       │
//!  Client Request   │  ┌──────────┐   ┌───────────┐   ┌──────────────────┐  │
//!  ─────────────────┼─▶│   net    │──▶│  hyper    │──▶│ request id/trace │  │
//!                   │  │ listener │   │ hdr limit │   │ backstop timeout │  │
//!                   │  └──────────┘   └───────────┘   └────────┬─────────┘  │
//!                   │                                          ▼            │
//!                   │  ┌─────────────────── shield ──────────────────────┐  │
//!                   │  │ resources → timeout → slow client → concurrency │  │
//!                   │  │                → payload guard → sanitizer      │  │
//!                   │  └───────────────────────┬─────────────────────────┘  │
//!                   │                          ▼                            │
//!  Client Response  │                  ┌──────────────┐                     │
//!  ◀────────────────┼──────────────────│   upstream   │◀────────────────────┼── Application
//!                   │                  │   or echo    │                     │
//!                   │                  └──────────────┘                     │
//!                   │                                                       │
//!                   │  config (TOML, hot reload) · observability · lifecycle │
//!                   └───────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use admission_gateway::config::watcher::ConfigWatcher;
use admission_gateway::lifecycle::{resolve_config, spawn_signal_handler, Overrides, Shutdown};
use admission_gateway::net::Listener;
use admission_gateway::observability::{logging, metrics};
use admission_gateway::GatewayServer;

#[derive(Parser, Debug)]
#[command(name = "admission-gateway", version)]
#[command(about = "Admission control and abuse mitigation in front of an HTTP application", long_about = None)]
struct Cli {
    /// TOML config file; watched for changes to the [shield] section.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding listener.bind_address.
    #[arg(short, long)]
    bind: Option<String>,

    /// Upstream application url, overriding upstream.url.
    #[arg(short, long)]
    upstream: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let overrides = Overrides {
        bind: cli.bind,
        upstream: cli.upstream,
    };
    let config = resolve_config(cli.config.as_deref(), &overrides)?;

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "admission-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        request_timeout_ms = config.shield.request_timeout_ms,
        max_concurrent_per_key = config.shield.max_concurrent_per_key,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let server = GatewayServer::new(&config)?;

    // The watcher must outlive the server loop.
    let _watcher = match &cli.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            server.watch_config(updates);
            Some(watcher.run()?)
        }
        None => None,
    };

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    let listener = Listener::bind(&config.listener).await?;
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
