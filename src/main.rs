use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

use tollgate::config::TollgateConfig;
use tollgate::http::HttpServer;
use tollgate::ratelimit::{self, RateLimiter};
use tollgate::telemetry;

/// Per-client request quota enforcement for HTTP services.
#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "TOLLGATE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; the environment may already be set.
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = TollgateConfig::load(args.config.as_deref())?;
    telemetry::init(&config.logging)?;

    info!("Starting Tollgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        http_addr = %config.server.http_addr,
        rate_limit_per_ip = config.limits.rate_limit_per_ip,
        rate_limit_per_token = config.limits.rate_limit_per_token,
        failure_mode = ?config.limits.failure_mode,
        "Configuration loaded"
    );

    let store = ratelimit::connect(&config.store).await.map_err(|e| {
        error!(error = %e, "Failed to initialize counter store");
        e
    })?;

    let rate_limiter = Arc::new(RateLimiter::new(store, config.limits.clone()));
    info!("Rate limiter initialized");

    let server = HttpServer::new(
        config.server.http_addr,
        rate_limiter,
        config.server.trust_forwarded_for,
    );

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Tollgate stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
