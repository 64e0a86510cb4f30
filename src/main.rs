// src/main.rs

use dicom_indexer::{Config, HostEvent, IndexerPlugin, LogSink};
use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("indexer.toml"));

    let config = Config::load_from(&config_path)
        .with_context(|| format!("Cannot load {}", config_path.display()))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("DICOM indexer starting, config: {}", config_path.display());

    let mut plugin = match IndexerPlugin::initialize(&config, Arc::new(LogSink))? {
        Some(plugin) => plugin,
        None => return Ok(()),
    };

    let status = plugin.on_change(HostEvent::Started);
    if status != dicom_indexer::ErrorCode::Success {
        anyhow::bail!("Monitor failed to start (code {})", status.code());
    }

    tokio::signal::ctrl_c().await.context("Cannot listen for Ctrl-C")?;
    tracing::info!("Shutting down...");

    plugin.on_change(HostEvent::Stopped);
    plugin.finalize();
    Ok(())
}
