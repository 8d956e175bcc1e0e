//! # btrpa-server
//!
//! Host process for the btrpa BLE scanner.
//!
//! This binary:
//! - Loads configuration from `BTRPA_CONFIG` or the platform default path
//! - Starts the scan engine with BlueZ adapters (or a replay file), gpsd and sinks
//! - Serves a read-only status API
//! - Stops cleanly on timeout, `POST /api/scan/stop` or Ctrl-C
//!
//! ## Running
//!
//! ```bash
//! # Development, replaying recorded detections
//! BTRPA__SCAN__MODE=all BTRPA__SCAN__REPLAY_FILE=capture.jsonl cargo run --package btrpa-server
//!
//! # Production
//! BTRPA_PRODUCTION=1 BTRPA_IRK=<key> ./btrpa-server
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use anyhow::Context;
use btrpa_core::{default_config_path, ScanConfig, ScanEngine};
use btrpa_server::host::{self, Outputs};
use btrpa_server::logging;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init(logging::is_production())?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting btrpa-server");

    let config_path = default_config_path();
    let config = ScanConfig::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    let settings = config.engine_settings()?;

    // Everything that can fail on open happens before the engine exists.
    let outputs = Outputs::open(&config).await?;

    let engine = ScanEngine::new(settings);
    let server = host::launch(&engine, &config, outputs).await?;

    {
        let engine = engine.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, stopping scan");
                engine.stop().await;
            }
        });
    }

    let summary = engine.run().await;

    if let Some(server) = server {
        server.abort();
    }

    info!(
        total_detections = summary.total_detections,
        unique_addresses = summary.unique_addresses,
        resolved_count = summary.resolved_count,
        "btrpa-server exiting"
    );
    Ok(())
}
