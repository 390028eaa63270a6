//! streamserve
//!
//! Serves the static resource mounts named in a TOML config file over HTTP
//! and/or HTTPS.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ net (listener, TLS snapshot) ──▶ http (hyper connection, limits)
//!                                                     │
//!                                                     ▼
//!                                         dispatch (lane, handler chain)
//!                                                     │
//!                                  ┌──────────────────┼──────────────────┐
//!                                  ▼                  ▼                  ▼
//!                              resource            sse            application
//!                              handler          publishers          handlers
//!                                  │                  │                  │
//!     Client ◀──────────────── http::response (single-writer stream) ◀──┘
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use streamserve::config::{load_config, ServerConfig};
use streamserve::lifecycle::signals::shutdown_signal;
use streamserve::observability::{logging, metrics};
use streamserve::{ResourceHandler, ServerBuilder};

#[derive(Parser, Debug)]
#[command(name = "streamserve", version, about = "Embeddable HTTP(S) server core")]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the HTTP bind address.
    #[arg(long)]
    http: Option<String>,

    /// Serve this directory at `/` in addition to configured mounts.
    #[arg(long)]
    serve: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(address) = cli.http {
        config.listener.http_address = Some(address);
    }

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "streamserve starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let mut builder = ServerBuilder::from_config(config.clone());
    for mount in &config.resources {
        tracing::info!(mount = %mount.mount, directory = %mount.directory, "Serving resources");
        builder = builder.add_handler(
            ResourceHandler::file_handler(&mount.directory)
                .with_mount(&mount.mount)
                .with_default_file(mount.default_file.as_deref()),
        );
    }
    if let Some(directory) = cli.serve {
        tracing::info!(directory = %directory.display(), "Serving resources at /");
        builder = builder.add_handler(ResourceHandler::file_handler(directory));
    }

    let server = builder.start().await?;
    if let Some(uri) = server.http_uri() {
        tracing::info!(uri = %uri, "Listening");
    }
    if let Some(uri) = server.https_uri() {
        tracing::info!(uri = %uri, "Listening");
    }

    shutdown_signal().await;
    let drain = Duration::from_secs(config.listener.drain_timeout_secs);
    tracing::info!(drain_timeout = ?drain, "Shutting down");
    server.stop().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
