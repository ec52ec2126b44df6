//! HTTP pipeline server.
//!
//! ```text
//!     Client Request
//!     ─────────▶ recover ─▶ request id ─▶ logging ─▶ metrics ─▶ router ─▶ handler
//!                                                              (/ping, /metrics)
//! ```
//!
//! Startup order: configuration, logging, build banner, metrics recorder,
//! listener. Shutdown: SIGINT/SIGTERM/SIGQUIT stop accepting connections and
//! in-flight requests drain.

use std::path::PathBuf;

use clap::Parser;

use http_pipeline::config::resolve_config;
use http_pipeline::http::server::bind;
use http_pipeline::lifecycle::shutdown_on_signal;
use http_pipeline::observability::{self, log_startup_banner, BuildInfo};
use http_pipeline::{HttpServer, Shutdown};

/// Command-line flags. Environment variables override them.
#[derive(Debug, Parser)]
#[command(name = "http-pipeline", version, about = "HTTP server with an observability pipeline")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address (host:port).
    #[arg(short = 'a', long)]
    address: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = resolve_config(cli.config.as_deref(), cli.address, |key| {
        std::env::var(key).ok()
    })?;

    observability::logging::init(
        &config.observability.log_level,
        config.observability.log_format,
    )?;
    log_startup_banner(&BuildInfo::current());

    tracing::info!(
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        log_format = %config.observability.log_format,
        metrics_enabled = config.observability.metrics_enabled,
        "Configuration loaded"
    );

    let mut server = HttpServer::new(config.clone());
    if config.observability.metrics_enabled {
        match observability::metrics::install_recorder() {
            Ok(handle) => server = server.with_metrics_handle(handle),
            Err(err) => tracing::error!(error = %err, "Failed to install metrics recorder"),
        }
    }

    let listener = bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    tokio::spawn(shutdown_on_signal(shutdown.clone()));
    server.run(listener, shutdown.signalled()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
