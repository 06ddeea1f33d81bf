//! Blobedge server
//!
//! Main entry point for the blobedge media proxy. Loads configuration,
//! sets up logging, and runs the HTTP server.

use anyhow::Context;
use blobedge::{EdgeConfig, EdgeServer};
use std::env;
use tracing::info;

/// # Usage
/// ```bash
/// # Start with default config (blobedge.yaml)
/// cargo run
///
/// # Start with custom config
/// cargo run -- /path/to/config.yaml
/// ```
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .init();

    info!("Starting blobedge");

    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "blobedge.yaml".to_string());
    info!("Loading configuration from: {}", config_path);

    let config = EdgeConfig::from_file(&config_path)
        .with_context(|| format!("failed to load {}", config_path))?;

    info!("Configuration loaded successfully");
    info!("  - Listen address: {}", config.listen_address);
    info!("  - Cache TTL: {} seconds", config.cache_ttl_secs);
    info!("  - Cache capacity: {} entries", config.cache_capacity);
    info!("  - Max concurrent fetches: {}", config.max_concurrent_fetches);
    info!("  - Queue timeout: {} seconds", config.queue_timeout_secs);
    info!("  - Storage key prefix: {}", config.storage_key_prefix);

    let server = EdgeServer::build(config).context("failed to build server")?;
    server.run().await.context("server terminated")?;
    Ok(())
}
