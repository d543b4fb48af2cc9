//! Gateway Daemon - Streaming Chat Completion Server
//!
//! Loads the gateway configuration, registers the configured backends and
//! serves completion requests on a Unix domain socket (or TCP endpoint).
//! Chat clients connect with `gateway-chat`.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults
//! gateway-daemon
//!
//! # Custom endpoint
//! gateway-daemon --endpoint unix:/tmp/my-gateway.sock
//! gateway-daemon --endpoint tcp://127.0.0.1:7411
//!
//! # With config file, answering with the scripted demo backend by default
//! gateway-daemon --config ~/.config/chat-gateway/gateway.toml --backend demo
//!
//! # Verbose logging
//! RUST_LOG=debug gateway-daemon
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown (in-flight requests are cancelled)

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use gateway_core::{
    load_config, load_config_from_path, ConfigOverrides, Endpoint, GatewayConfig, GatewayServer,
};

/// Gateway Daemon - streaming chat completion router
#[derive(Parser, Debug)]
#[command(name = "gateway-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Endpoint to listen on (unix:<path> or tcp://host:port)
    #[arg(short = 'e', long, value_name = "ENDPOINT")]
    endpoint: Option<Endpoint>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "GATEWAY_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Backend used when a request names none
    #[arg(short = 'b', long, value_name = "ID")]
    backend: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "GATEWAY_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            backend: self.backend.clone(),
            endpoint: self.endpoint.clone(),
            connect_timeout_ms: None,
        }
    }
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("gateway_daemon={level},gateway_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

/// Resolve the configuration: file, then environment, then command line
fn resolve_config(args: &Args) -> Result<GatewayConfig> {
    let mut config = match args.config {
        Some(ref path) => {
            anyhow::ensure!(path.exists(), "Config file not found: {}", path.display());
            load_config_from_path(Some(path.clone()))
        }
        None => load_config(),
    }
    .context("Failed to load configuration")?;

    args.overrides()
        .apply(&mut config)
        .context("Invalid command-line override")?;
    Ok(config)
}

/// Build the backends and bind the listening socket
async fn start_server(config: &GatewayConfig) -> Result<GatewayServer> {
    let service = config
        .build_service()
        .context("Failed to build backends")?;

    for (id, healthy) in service.registry().health_report().await {
        if healthy {
            info!(backend = %id, "Backend reachable");
        } else {
            warn!(backend = %id, "Backend not reachable, requests to it will fail");
        }
    }
    info!(default_backend = %service.default_backend(), "Backends registered");

    let mut server = GatewayServer::new(config.transport.endpoint.clone(), Arc::new(service));
    server
        .bind()
        .await
        .with_context(|| format!("Failed to bind {}", config.transport.endpoint))?;
    Ok(server)
}

/// Cancel the server's shutdown token on SIGTERM or SIGINT
#[cfg(unix)]
fn spawn_signal_handler(server: &GatewayServer) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let shutdown = server.shutdown_token();

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, initiating shutdown"),
            _ = sigint.recv() => info!("Received SIGINT, initiating shutdown"),
        }
        shutdown.cancel();
    });
    Ok(())
}

#[cfg(not(unix))]
fn spawn_signal_handler(server: &GatewayServer) -> Result<()> {
    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, initiating shutdown");
        }
        shutdown.cancel();
    });
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging first
    init_logging(&args.log_level);

    info!("Gateway daemon starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("PID: {}", std::process::id());

    let config = resolve_config(&args)?;
    info!(
        source = %config.source(),
        config_file = ?config.config_file_path,
        endpoint = %config.transport.endpoint,
        "Configuration loaded"
    );

    let server = start_server(&config).await?;
    spawn_signal_handler(&server)?;

    let result = server.run().await;

    match result {
        Ok(()) => {
            info!("Gateway daemon stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Daemon stopped with error");
            Err(e.into())
        }
    }
}
