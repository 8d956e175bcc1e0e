//! Wiring between configuration, the scan engine and the HTTP server.
//!
//! Startup is split in two so that the engine only exists once everything
//! that can fail on the filesystem or network has already been opened:
//!
//! 1. [`Outputs::open`] creates the JSON Lines file and binds the listener.
//! 2. [`launch`] attaches sinks, gpsd and sources to a running engine and
//!    starts serving. Any failure here stops the engine before returning,
//!    so the final summary is still produced.

use std::time::Duration;

use anyhow::Context;
use btrpa_core::gps::GPS_STARTUP_DELAY;
use btrpa_core::{GpsdClient, JsonLinesSink, LogSink, ReplaySource, ScanConfig, ScanEngine};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::api;
use crate::state::AppState;

/// Files and sockets opened before the engine starts.
#[derive(Debug)]
pub struct Outputs {
    jsonl: Option<JsonLinesSink>,
    listener: Option<TcpListener>,
}

impl Outputs {
    /// Open the JSON Lines file and bind the API listener, as configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or the address
    /// cannot be bound.
    pub async fn open(config: &ScanConfig) -> anyhow::Result<Self> {
        let jsonl = match &config.output.jsonl_file {
            Some(path) => Some(
                JsonLinesSink::create(path)
                    .with_context(|| format!("Failed to open {}", path.display()))?,
            ),
            None => None,
        };

        let listener = if config.server.enabled {
            let listener = TcpListener::bind(&config.server.bind)
                .await
                .with_context(|| format!("Failed to bind {}", config.server.bind))?;
            Some(listener)
        } else {
            None
        };

        Ok(Self { jsonl, listener })
    }

    /// Local address of the API listener, if the server is enabled.
    #[must_use]
    pub fn api_addr(&self) -> Option<std::net::SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }
}

/// Attach outputs, gpsd and advertisement sources to `engine` and start the
/// API server. Returns the server task, if one was started.
///
/// # Errors
///
/// Returns the first wiring failure. The engine has been stopped by then.
pub async fn launch(
    engine: &ScanEngine,
    config: &ScanConfig,
    outputs: Outputs,
) -> anyhow::Result<Option<JoinHandle<()>>> {
    match wire(engine, config, outputs).await {
        Ok(server) => Ok(server),
        Err(e) => {
            error!(error = %e, "Startup failed, stopping scan");
            engine.stop().await;
            Err(e)
        }
    }
}

async fn wire(
    engine: &ScanEngine,
    config: &ScanConfig,
    outputs: Outputs,
) -> anyhow::Result<Option<JoinHandle<()>>> {
    if config.output.console {
        engine.add_sink(LogSink);
    }
    if let Some(sink) = outputs.jsonl {
        engine.add_sink(sink);
    }

    if config.gps.enabled {
        engine
            .spawn_gpsd(GpsdClient::new(config.gps.host.clone(), config.gps.port))
            .await;
        tokio::time::sleep(GPS_STARTUP_DELAY).await;
    }

    add_sources(engine, config)?;

    Ok(outputs.listener.map(|listener| {
        if let Ok(addr) = listener.local_addr() {
            info!("Listening on {addr}");
        }
        let app = api::create_router(AppState::shared(engine.clone()));
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "HTTP server failed");
            }
        })
    }))
}

fn add_sources(engine: &ScanEngine, config: &ScanConfig) -> anyhow::Result<()> {
    if let Some(path) = &config.scan.replay_file {
        let source = ReplaySource::from_jsonl("replay", path)
            .with_context(|| format!("Failed to read {}", path.display()))?
            .with_delay(Duration::from_millis(config.scan.replay_delay_ms));
        engine.add_source(Box::new(source));
        return Ok(());
    }
    add_radio_sources(engine, config)
}

#[cfg(feature = "bluetooth")]
fn add_radio_sources(engine: &ScanEngine, config: &ScanConfig) -> anyhow::Result<()> {
    use btrpa_core::BluezSource;

    if config.scan.adapters.is_empty() {
        engine.add_source(Box::new(BluezSource::default_adapter()));
    } else {
        for adapter in &config.scan.adapters {
            engine.add_source(Box::new(BluezSource::new(adapter.trim())));
        }
    }
    Ok(())
}

#[cfg(not(feature = "bluetooth"))]
fn add_radio_sources(_engine: &ScanEngine, _config: &ScanConfig) -> anyhow::Result<()> {
    anyhow::bail!(
        "btrpa-server was built without the `bluetooth` feature; \
         set scan.replay_file to replay recorded detections"
    )
}
