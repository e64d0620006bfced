//! simplekv: runs a record store until Ctrl+C.
//!
//! Usage: `simplekv [config.toml]`. Without a path, `simplekv.toml` is read
//! if present. `SIMPLEKV_*` environment variables override file settings.

use anyhow::Context;
use simplekv::{KvConfig, KvServer};
use std::path::Path;

const DEFAULT_CONFIG_PATH: &str = "simplekv.toml";

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

fn load_config() -> anyhow::Result<KvConfig> {
    let config = match std::env::args().nth(1) {
        Some(path) => KvConfig::from_file(&path)
            .with_context(|| format!("loading config from {}", path))?,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            KvConfig::from_file(DEFAULT_CONFIG_PATH)?
        }
        None => {
            tracing::info!("no config file, using defaults");
            KvConfig::default()
        }
    };
    Ok(config.apply_env_overrides())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = load_config()?;
    tracing::info!(
        driver = %config.driver,
        location = ?config.resolved_location(),
        sync_interval_secs = config.sync_interval.as_secs(),
        "configuration resolved"
    );

    let server = KvServer::new(config).context("opening persistence backend")?;
    server.start().await.context("starting server")?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl+C")?;
    tracing::info!("received Ctrl+C, shutting down");

    let report = server.stop().await.context("final sync")?;
    tracing::info!(written = report.written, deleted = report.deleted, "shutdown complete");
    Ok(())
}
