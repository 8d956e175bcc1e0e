//! Advertisement sources.
//!
//! A source runs as its own task and pushes [`DetectionEvent`]s through a
//! [`DetectionSender`]. Several sources (one per adapter) may run at once;
//! the engine serialises what they send.

use std::path::Path;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::error::{BtrpaError, Result};
use crate::types::DetectionEvent;

/// Cloneable handle for feeding events into a running engine.
#[derive(Debug, Clone)]
pub struct DetectionSender {
    tx: mpsc::Sender<DetectionEvent>,
}

impl DetectionSender {
    pub(crate) const fn new(tx: mpsc::Sender<DetectionEvent>) -> Self {
        Self { tx }
    }

    /// Queue an event, waiting if the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`BtrpaError::EngineStopped`] once the engine has stopped.
    pub async fn send(&self, event: DetectionEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| BtrpaError::EngineStopped)
    }
}

/// Something that produces advertisements until told to stop.
pub trait AdvertisementSource: Send + 'static {
    /// Name used in logs; usually the adapter name.
    fn name(&self) -> String;

    /// Produce events until `shutdown` becomes `true` or the source runs dry.
    fn run(
        self: Box<Self>,
        sender: DetectionSender,
        shutdown: watch::Receiver<bool>,
    ) -> BoxFuture<'static, Result<()>>;
}

/// Plays back pre-recorded detections.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    name: String,
    events: Vec<DetectionEvent>,
    delay: Duration,
}

impl ReplaySource {
    /// Replay `events` as fast as the engine accepts them.
    #[must_use]
    pub fn new(name: impl Into<String>, events: Vec<DetectionEvent>) -> Self {
        Self {
            name: name.into(),
            events,
            delay: Duration::ZERO,
        }
    }

    /// Pause between events.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Load events from a JSON Lines file, one [`DetectionEvent`] per line.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a line is not a valid
    /// event.
    pub fn from_jsonl(name: impl Into<String>, path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let events = contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str::<DetectionEvent>)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        info!(path = %path.display(), count = events.len(), "Loaded replay file");
        Ok(Self::new(name, events))
    }

    /// Number of queued events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// `true` when there is nothing to replay.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl AdvertisementSource for ReplaySource {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn run(
        self: Box<Self>,
        sender: DetectionSender,
        mut shutdown: watch::Receiver<bool>,
    ) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            let Self {
                name,
                events,
                delay,
            } = *self;
            let mut sent = 0usize;
            for mut event in events {
                if *shutdown.borrow() {
                    break;
                }
                if event.adapter.is_none() {
                    event.adapter = Some(name.clone());
                }
                sender.send(event).await?;
                sent += 1;
                if !delay.is_zero() {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
            debug!(source = %name, sent, "Replay finished");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_replay_sends_all_and_tags_adapter() {
        let (tx, mut rx) = mpsc::channel(8);
        let (_stop_tx, stop_rx) = watch::channel(false);
        let source = ReplaySource::new(
            "replay0",
            vec![
                DetectionEvent::new("00:00:00:00:00:01", -40),
                DetectionEvent::new("00:00:00:00:00:02", -50).with_adapter("hci1"),
            ],
        );
        Box::new(source)
            .run(DetectionSender::new(tx), stop_rx)
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.adapter.as_deref(), Some("replay0"));
        assert_eq!(second.adapter.as_deref(), Some("hci1"));
    }

    #[tokio::test]
    async fn test_replay_stops_on_shutdown() {
        let (tx, mut rx) = mpsc::channel(8);
        let (stop_tx, stop_rx) = watch::channel(false);
        let events = (0..5)
            .map(|i| DetectionEvent::new(format!("00:00:00:00:00:0{i}"), -40))
            .collect();
        let source = ReplaySource::new("slow", events).with_delay(Duration::from_secs(60));
        let task = tokio::spawn(Box::new(source).run(DetectionSender::new(tx), stop_rx));

        assert!(rx.recv().await.is_some());
        stop_tx.send(true).unwrap();
        task.await.unwrap().unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_after_close_reports_stopped() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let err = DetectionSender::new(tx)
            .send(DetectionEvent::new("00:00:00:00:00:01", -40))
            .await
            .unwrap_err();
        assert!(matches!(err, BtrpaError::EngineStopped));
    }

    #[test]
    fn test_from_jsonl() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"address":"AA:BB:CC:DD:EE:FF","rssi":-70}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(
            file,
            r#"{{"address":"11:22:33:44:55:66","rssi":-60,"tx_power":4,"name":"tag"}}"#
        )
        .unwrap();
        let source = ReplaySource::from_jsonl("file", file.path()).unwrap();
        assert_eq!(source.len(), 2);
    }

    #[test]
    fn test_from_jsonl_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not json").unwrap();
        assert!(matches!(
            ReplaySource::from_jsonl("file", file.path()),
            Err(BtrpaError::JsonError(_))
        ));
    }
}
