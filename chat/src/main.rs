//! Gateway Chat - command-line chat client
//!
//! # Usage
//!
//! ```bash
//! # Chat through a running gateway-daemon
//! gateway-chat
//!
//! # Ask the scripted demo backend a single question
//! gateway-chat --backend demo --prompt "2+2?"
//!
//! # No daemon: run the completion service in this process
//! gateway-chat --embedded
//! ```
//!
//! An empty line (or end of input) ends the chat.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;

use gateway_chat::{run_prompt, ChatApp, Outcome};
use gateway_core::{
    load_config, load_config_from_path, ChatTransport, ConfigOverrides, Endpoint, GatewayClient,
    GatewayConfig, InProcessTransport,
};

/// Gateway Chat - talk to a completion backend through the chat gateway
#[derive(Parser, Debug)]
#[command(name = "gateway-chat")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Gateway endpoint (unix:<path> or tcp://host:port)
    #[arg(short = 'e', long, value_name = "ENDPOINT")]
    endpoint: Option<Endpoint>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "GATEWAY_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Backend to ask (defaults to the gateway's default backend)
    #[arg(short = 'b', long, value_name = "ID")]
    backend: Option<String>,

    /// Send one prompt, print the reply and exit
    #[arg(short = 'p', long, value_name = "TEXT")]
    prompt: Option<String>,

    /// Run the completion service in-process instead of connecting
    #[arg(long)]
    embedded: bool,

    /// Log level for stderr (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "GATEWAY_CHAT_LOG_LEVEL", default_value = "warn")]
    log_level: String,
}

/// Log to stderr so replies on stdout stay clean
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("gateway_chat={level},gateway_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn resolve_config(args: &Args) -> Result<GatewayConfig> {
    let mut config = match args.config {
        Some(ref path) => {
            anyhow::ensure!(path.exists(), "Config file not found: {}", path.display());
            load_config_from_path(Some(path.clone()))
        }
        None => load_config(),
    }
    .context("Failed to load configuration")?;

    // The backend flag travels with each request; only the daemon checks it
    let overrides = ConfigOverrides {
        endpoint: args.endpoint.clone(),
        ..ConfigOverrides::default()
    };
    overrides
        .apply(&mut config)
        .context("Invalid command-line override")?;
    Ok(config)
}

async fn open_transport(args: &Args, config: &GatewayConfig) -> Result<Box<dyn ChatTransport>> {
    if args.embedded {
        let service = config
            .build_service()
            .context("Failed to build backends")?;
        tracing::info!(default_backend = %service.default_backend(), "Running embedded");
        return Ok(Box::new(
            InProcessTransport::new(Arc::new(service)).with_backend(args.backend.clone()),
        ));
    }

    let client = GatewayClient::connect_with(&config.transport)
        .await
        .with_context(|| {
            format!(
                "Could not reach the gateway at {} (is gateway-daemon running? try --embedded)",
                config.transport.endpoint
            )
        })?;
    Ok(Box::new(client.with_backend(args.backend.clone())))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config = resolve_config(&args)?;
    let transport = open_transport(&args, &config).await?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let mut stdout = tokio::io::stdout();
    let outcome = match args.prompt {
        Some(ref prompt) => run_prompt(transport.as_ref(), prompt, &mut stdout, cancel).await?,
        None => {
            let stdin = BufReader::new(tokio::io::stdin());
            ChatApp::new(stdin, stdout)
                .run(transport.as_ref(), cancel)
                .await?
        }
    };

    Ok(match outcome {
        Outcome::Finished => ExitCode::SUCCESS,
        Outcome::Failed(_) => ExitCode::FAILURE,
    })
}
