//! Record sinks.
//!
//! Sinks subscribe to the engine's broadcast channel and run on blocking
//! worker threads, so a slow disk never holds up detection processing. A
//! sink that falls behind loses events (logged) instead of applying
//! backpressure.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{BtrpaError, Result};
use crate::types::{DetectionRecord, ScanEvent, Summary};

/// Consumer of engine output.
pub trait RecordSink: Send + 'static {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Handle one event.
    ///
    /// # Errors
    ///
    /// Errors are logged by the caller; the sink keeps receiving.
    fn handle(&mut self, event: &ScanEvent) -> Result<()>;

    /// Release resources. Called once, after the final event.
    ///
    /// # Errors
    ///
    /// Returns an error if buffered output cannot be written.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Drive `sink` from `rx` until the completion event or channel close.
pub fn spawn_sink<S: RecordSink>(mut rx: broadcast::Receiver<ScanEvent>, mut sink: S) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        loop {
            match rx.blocking_recv() {
                Ok(event) => {
                    let done = matches!(event, ScanEvent::Complete(_));
                    if let Err(e) = sink.handle(&event) {
                        warn!(sink = sink.name(), error = %e, "Sink failed to handle event");
                    }
                    if done {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(sink = sink.name(), skipped, "Sink lagging, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
        if let Err(e) = sink.close() {
            warn!(sink = sink.name(), error = %e, "Sink failed to close");
        }
        debug!(sink = sink.name(), "Sink stopped");
    })
}

/// Writes records and the summary through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl LogSink {
    fn record(record: &DetectionRecord) {
        info!(
            address = %record.address,
            name = record.name.as_deref().unwrap_or("Unknown"),
            rssi = record.rssi,
            avg_rssi = record.avg_rssi,
            samples = record.rssi_samples,
            tx_power = ?record.tx_power,
            distance_m = ?record.est_distance,
            lat = ?record.latitude,
            lon = ?record.longitude,
            manufacturer_data = ?record.manufacturer_data,
            service_uuids = ?record.service_uuids,
            times_seen = record.times_seen,
            adapter = ?record.adapter,
            "{}",
            record.kind
        );
        if record.proximity_alert {
            warn!(
                address = %record.address,
                distance_m = ?record.est_distance,
                "PROXIMITY ALERT"
            );
        }
    }

    fn summary(summary: &Summary) {
        info!(
            session = %summary.session_id,
            elapsed_secs = summary.elapsed_secs,
            total_detections = summary.total_detections,
            unique_addresses = summary.unique_addresses,
            resolved_count = summary.resolved_count,
            unresolvable = summary.unresolvable_identifiers,
            "Scan complete"
        );
        for entry in &summary.resolved_addresses {
            info!(
                address = %entry.address,
                count = entry.count,
                best_lat = ?entry.best_gps.map(|g| g.lat),
                best_lon = ?entry.best_gps.map(|g| g.lon),
                "Resolved address"
            );
        }
    }
}

impl RecordSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    fn handle(&mut self, event: &ScanEvent) -> Result<()> {
        match event {
            ScanEvent::Record(record) => Self::record(record),
            // The aggregator already warned on first sighting.
            ScanEvent::Unresolvable(_) => {}
            ScanEvent::Status(status) => debug!(
                elapsed_secs = status.elapsed_secs,
                total = status.total_detections,
                unique = status.unique_count,
                gps_connected = status.gps_connected,
                "Status"
            ),
            ScanEvent::Complete(summary) => Self::summary(summary),
        }
        Ok(())
    }
}

/// Appends one JSON object per record to a file, flushing after each.
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonLinesSink {
    /// Open (or create) `path` for appending.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        info!(path = %path.display(), "Writing records as JSON Lines");
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    fn failed(&self, err: impl std::fmt::Display) -> BtrpaError {
        BtrpaError::SinkFailed {
            sink: self.path.display().to_string(),
            message: err.to_string(),
        }
    }
}

impl RecordSink for JsonLinesSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn handle(&mut self, event: &ScanEvent) -> Result<()> {
        let ScanEvent::Record(record) = event else {
            return Ok(());
        };
        serde_json::to_writer(&mut self.writer, record.as_ref())?;
        self.writer.write_all(b"\n").map_err(|e| self.failed(e))?;
        self.writer.flush().map_err(|e| self.failed(e))
    }

    fn close(&mut self) -> Result<()> {
        self.writer.flush().map_err(|e| self.failed(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use crate::aggregator::{Aggregator, AggregatorSettings, Outcome, ScanMode};
    use crate::resolver::Resolver;
    use crate::types::{DetectionEvent, RecordKind, StatusSnapshot};

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn record(address: &str) -> DetectionRecord {
        let event = DetectionEvent::new(address, -60);
        DetectionRecord {
            timestamp: event.timestamp,
            address: event.address,
            name: None,
            rssi: -60,
            avg_rssi: -60,
            rssi_samples: 1,
            tx_power: None,
            est_distance: None,
            latitude: None,
            longitude: None,
            gps_altitude: None,
            manufacturer_data: None,
            service_uuids: None,
            resolved: None,
            kind: RecordKind::Device { ordinal: 1 },
            times_seen: 1,
            proximity_alert: false,
            adapter: None,
        }
    }

    fn status() -> StatusSnapshot {
        StatusSnapshot {
            elapsed_secs: 0.0,
            total_detections: 0,
            unique_count: 0,
            scanning: true,
            gps: None,
            gps_connected: false,
        }
    }

    #[test]
    fn test_jsonl_sink_writes_records_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.jsonl");
        let mut sink = JsonLinesSink::create(&path).unwrap();

        sink.handle(&ScanEvent::Record(Arc::new(record("AA:BB:CC:DD:EE:01"))))
            .unwrap();
        sink.handle(&ScanEvent::Status(status())).unwrap();
        sink.handle(&ScanEvent::Record(Arc::new(record("AA:BB:CC:DD:EE:02"))))
            .unwrap();

        // Flushed per record, so readable before close.
        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: DetectionRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed.address, "AA:BB:CC:DD:EE:02");
        sink.close().unwrap();
    }

    #[test]
    fn test_jsonl_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.jsonl");
        for _ in 0..2 {
            let mut sink = JsonLinesSink::create(&path).unwrap();
            sink.handle(&ScanEvent::Record(Arc::new(record("AA:BB:CC:DD:EE:01"))))
                .unwrap();
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);
    }

    #[test]
    fn test_log_sink_accepts_everything() {
        let mut sink = LogSink;
        assert!(sink
            .handle(&ScanEvent::Record(Arc::new(record("AA:BB:CC:DD:EE:01"))))
            .is_ok());
        assert!(sink
            .handle(&ScanEvent::Unresolvable("0123".into()))
            .is_ok());
        assert!(sink.handle(&ScanEvent::Status(status())).is_ok());
    }

    #[test]
    fn test_platform_identifier_logged_once() {
        const IDENTIFIER: &str = "12345678-9ABC-DEF0-1234-56789ABCDEF0";
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let mut agg = Aggregator::new(AggregatorSettings::new(ScanMode::Irk(Resolver::new(
                Vec::new(),
            ))));
            let mut sink = LogSink;
            let outcome = agg.process(&DetectionEvent::new(IDENTIFIER, -50));
            let Outcome::Unresolvable { identifier, .. } = outcome else {
                panic!("expected an unresolvable outcome, got {outcome:?}");
            };
            sink.handle(&ScanEvent::Unresolvable(identifier)).unwrap();
        });

        assert_eq!(logs.text().matches(IDENTIFIER).count(), 1);
    }

    #[tokio::test]
    async fn test_spawned_sink_stops_after_close_of_channel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.jsonl");
        let (tx, rx) = broadcast::channel(16);
        let handle = spawn_sink(rx, JsonLinesSink::create(&path).unwrap());

        tx.send(ScanEvent::Record(Arc::new(record("AA:BB:CC:DD:EE:01"))))
            .unwrap();
        drop(tx);
        handle.await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 1);
    }
}
