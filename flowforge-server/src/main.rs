//! FlowForge orchestrator binary.
//!
//! ## Usage
//!
//! ```bash
//! flowforge-server
//! flowforge-server --config my-config.toml
//! flowforge-server --log-level debug
//! ```
//!
//! ## Environment Variables
//!
//! `FLOWFORGE_HOST`, `FLOWFORGE_PORT`, `FLOWFORGE_STORE_HOST`,
//! `FLOWFORGE_STORE_PORT`, `FLOWFORGE_STORE_USER`, `FLOWFORGE_STORE_PASSWORD`,
//! `FLOWFORGE_STORE_DATABASE`, `FLOWFORGE_DAEMON_ENDPOINT`,
//! `FLOWFORGE_GATEWAY_ADMIN_URL`, `FLOWFORGE_DEFAULT_REGISTRY_PATH`,
//! `FLOWFORGE_LOG_LEVEL` override their matching config fields (§11).

use clap::Parser;
use std::net::SocketAddr;

use flowforge_server::{config::Config, server::create_server};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Logging level, overriding `logging.level` in the config file.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(&args.log_level)
        .init();

    let config = Config::load(&args.config)?;

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    let app = create_server(config).await?;

    tracing::info!("starting FlowForge orchestrator on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Waits for Ctrl+C (or SIGTERM on unix) so in-flight requests drain before
/// the process exits (§12).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("shutdown signal received, draining in-flight requests");
}
