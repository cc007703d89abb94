//! duet-relay binary entry point.
//!
//! Usage:
//! ```bash
//! duet-relay --config duet.toml
//! duet-relay --bind 127.0.0.1:8080
//! duet-relay --help
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use duet_relay::cleanup::spawn_cleanup_task;
use duet_relay::http::build_router;
use duet_relay::{Config, DuetServer};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Rendezvous and relay server for duet.
#[derive(Parser, Debug)]
#[command(name = "duet-relay")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = "duet.toml")]
    config: PathBuf,

    /// Override the bind address from the configuration file
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = load_config(&cli.config).context("Failed to load configuration")?;
    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }

    let server = Arc::new(DuetServer::new(config.clone()));
    let (stop_cleanup, shutdown) = watch::channel(false);
    let cleanup = spawn_cleanup_task(server.clone(), config.cleanup.clone(), shutdown);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_address))?;
    tracing::info!("listening at {}", config.server.bind_address);

    // Blocked long-polls must be woken before graceful shutdown can finish.
    let signal = {
        let server = server.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
            }
            tracing::info!("Shutting down");
            let _ = stop_cleanup.send(true);
            server.shutdown();
        }
    };

    axum::serve(listener, build_router(server))
        .with_graceful_shutdown(signal)
        .await
        .context("Server error")?;

    if let Err(e) = cleanup.await {
        tracing::error!("Cleanup task failed: {}", e);
    }
    Ok(())
}

/// Load the configuration file, falling back to defaults when it is absent.
fn load_config(path: &std::path::Path) -> duet_relay::error::Result<Config> {
    if !path.exists() {
        tracing::warn!("Configuration file {:?} not found, using defaults", path);
        return Ok(Config::default());
    }
    Ok(Config::from_file(path)?)
}
