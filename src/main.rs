//! mcpgate - Authenticating gateway in front of a loopback MCP server.
//!
//! Exposes `/mcp` (bearer auth, rate limit, streaming relay) and `/health`
//! (live Slack `auth.test` probe) on one public port.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use clap::Parser;
use mcpgate::config::GatewayConfig;
use mcpgate::gateway::Gateway;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Arc::new(GatewayConfig::parse());
    info!(
        config = ?config,
        credential_configured = config.required_credential().is_some(),
        "Configuration loaded"
    );

    if config.health_credential().is_none() {
        warn!("No health check token configured; /health will report ng");
    }

    let gateway = Gateway::from_config(config.clone())?;

    if !config.upstream_ready_timeout.is_zero() {
        gateway
            .proxy()
            .wait_until_ready(config.upstream_ready_timeout)
            .await;
    }

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!(
        addr = %addr,
        upstream = %config.upstream_authority(),
        health_check_url = %config.health_check_url,
        "mcpgate listening"
    );

    let shutdown = CancellationToken::new();
    spawn_signal_handlers(shutdown.clone());

    gateway.serve(listener, shutdown).await?;
    info!("mcpgate stopped");
    Ok(())
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
fn spawn_signal_handlers(shutdown: CancellationToken) {
    let on_sigint = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                on_sigint.cancel();
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGINT");
            }
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM, initiating graceful shutdown");
                shutdown.cancel();
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
            }
        }
    });
}
