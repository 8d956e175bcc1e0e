//! GPS position correlation.
//!
//! The engine only ever pulls the latest fix, so a GPS source is anything
//! that can hand out a cheap copy of "the most recent fix, if any". The
//! bundled [`GpsdClient`] keeps that value fresh from a gpsd daemon in a
//! background task and reconnects forever until shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::error::{BtrpaError, Result};

/// Default gpsd port.
pub const GPSD_DEFAULT_PORT: u16 = 2947;

/// Delay before reconnecting to gpsd.
pub const GPS_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Timeout for connecting to and reading from gpsd.
pub const GPS_SOCKET_TIMEOUT: Duration = Duration::from_secs(5);

/// Grace period given to gpsd before scanning starts.
pub const GPS_STARTUP_DELAY: Duration = Duration::from_millis(500);

const WATCH_COMMAND: &[u8] = b"?WATCH={\"enable\":true,\"json\":true}\n";

/// A position fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GpsFix {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
    /// Altitude in metres, when the receiver reports one.
    pub alt: Option<f64>,
}

/// The fix recorded when a device was heard at its strongest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BestFix {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
    /// RSSI of the detection that produced this fix.
    pub rssi: i16,
}

/// A pull-based source of the latest GPS fix.
pub trait GpsSource: Send + Sync {
    /// Latest fix, or `None` if there has not been one yet.
    fn fix(&self) -> Option<GpsFix>;

    /// Whether the source currently has a live connection.
    fn connected(&self) -> bool;
}

/// Thread-safe holder for the latest fix.
#[derive(Debug, Default)]
pub struct FixCell {
    fix: RwLock<Option<GpsFix>>,
    connected: AtomicBool,
}

impl FixCell {
    /// Create an empty cell.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the latest fix.
    pub fn set(&self, fix: GpsFix) {
        if let Ok(mut slot) = self.fix.write() {
            *slot = Some(fix);
        }
    }

    /// Update the connection flag.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }
}

impl GpsSource for FixCell {
    fn fix(&self) -> Option<GpsFix> {
        self.fix.read().ok().and_then(|slot| *slot)
    }

    fn connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

#[derive(Debug, Deserialize)]
struct GpsdReport {
    class: String,
    lat: Option<f64>,
    lon: Option<f64>,
    alt: Option<f64>,
    #[serde(rename = "altMSL")]
    alt_msl: Option<f64>,
}

/// Parse one gpsd JSON line, returning a fix for TPV reports with a position.
#[must_use]
pub fn parse_tpv(line: &str) -> Option<GpsFix> {
    let report: GpsdReport = serde_json::from_str(line.trim()).ok()?;
    if report.class != "TPV" {
        return None;
    }
    Some(GpsFix {
        lat: report.lat?,
        lon: report.lon?,
        alt: report.alt.or(report.alt_msl),
    })
}

/// gpsd client that keeps a [`FixCell`] up to date.
#[derive(Debug, Clone)]
pub struct GpsdClient {
    host: String,
    port: u16,
    cell: Arc<FixCell>,
    reconnect_delay: Duration,
    socket_timeout: Duration,
}

impl GpsdClient {
    /// Create a client for `host:port`. Nothing happens until [`spawn`](Self::spawn).
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            cell: Arc::new(FixCell::new()),
            reconnect_delay: GPS_RECONNECT_DELAY,
            socket_timeout: GPS_SOCKET_TIMEOUT,
        }
    }

    /// Override reconnect and socket timing.
    #[must_use]
    pub const fn with_timing(mut self, reconnect_delay: Duration, socket_timeout: Duration) -> Self {
        self.reconnect_delay = reconnect_delay;
        self.socket_timeout = socket_timeout;
        self
    }

    /// `host:port` of the daemon.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Shared handle to the latest fix.
    #[must_use]
    pub fn cell(&self) -> Arc<FixCell> {
        Arc::clone(&self.cell)
    }

    /// Start the background reader. It exits once `shutdown` flips to `true`
    /// or its sender is dropped.
    #[must_use]
    pub fn spawn(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move { client.run(shutdown).await })
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(endpoint = %self.endpoint(), "Starting gpsd reader");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let outcome = self.connect_and_read(&mut shutdown).await;
            self.cell.set_connected(false);
            match outcome {
                Ok(()) => break,
                Err(e) if e.is_recoverable() => debug!(error = %e, "gpsd connection lost, retrying"),
                Err(e) => warn!(error = %e, "gpsd reader failed, retrying"),
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                () = sleep(self.reconnect_delay) => {}
            }
        }
        info!(endpoint = %self.endpoint(), "gpsd reader stopped");
    }

    /// Returns `Ok` only when shutdown was requested.
    async fn connect_and_read(&self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        let endpoint = self.endpoint();
        let unavailable = |message: String| BtrpaError::GpsUnavailable {
            endpoint: endpoint.clone(),
            message,
        };

        let stream = timeout(self.socket_timeout, TcpStream::connect(&endpoint))
            .await
            .map_err(|_| unavailable("connect timed out".into()))?
            .map_err(|e| unavailable(e.to_string()))?;
        let (reader, mut writer) = stream.into_split();
        writer.write_all(WATCH_COMMAND).await?;
        self.cell.set_connected(true);
        debug!(endpoint = %endpoint, "Connected to gpsd");

        let mut lines = BufReader::new(reader).lines();
        loop {
            tokio::select! {
                _ = shutdown.changed() => return Ok(()),
                line = timeout(self.socket_timeout, lines.next_line()) => match line {
                    // Quiet receivers are normal; keep waiting.
                    Err(_) => continue,
                    Ok(Ok(Some(line))) => {
                        if let Some(fix) = parse_tpv(&line) {
                            self.cell.set(fix);
                        }
                    }
                    Ok(Ok(None)) => return Err(unavailable("connection closed".into())),
                    Ok(Err(e)) => return Err(e.into()),
                },
            }
        }
    }
}

impl GpsSource for GpsdClient {
    fn fix(&self) -> Option<GpsFix> {
        self.cell.fix()
    }

    fn connected(&self) -> bool {
        self.cell.connected()
    }
}
