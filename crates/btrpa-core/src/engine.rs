//! The scan engine.
//!
//! Sources push [`DetectionEvent`]s into a bounded queue. A single consumer
//! task drains it into the [`Aggregator`], so events from any number of
//! adapters are processed one at a time. Accepted records fan out to sinks
//! over a broadcast channel, which never blocks the consumer.
//!
//! [`ScanEngine::run`] paces status snapshots and ends the scan on timeout
//! or on an external [`stop`](ScanEngine::stop). Stopping is idempotent:
//! teardown runs once and every caller gets the same final [`Summary`].

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::aggregator::{Aggregator, AggregatorSettings, DeviceState, Outcome, ScanMode};
use crate::error::{BtrpaError, Result};
use crate::gps::{GpsFix, GpsSource, GpsdClient};
use crate::sink::{spawn_sink, RecordSink};
use crate::source::{AdvertisementSource, DetectionSender};
use crate::types::{DetectionEvent, ScanEvent, StatusSnapshot, Summary};

/// Poll interval when scanning without a timeout.
pub const CONTINUOUS_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Poll interval when scanning with a timeout.
pub const TIMED_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Poll interval when fast refresh is requested.
pub const FAST_POLL_INTERVAL: Duration = Duration::from_millis(300);

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Aggregator configuration, including the scan mode.
    pub aggregator: AggregatorSettings,
    /// Scan duration; `None` runs until stopped.
    pub timeout: Option<Duration>,
    /// Use [`FAST_POLL_INTERVAL`].
    pub fast_refresh: bool,
    /// Pending detections before sources wait.
    pub queue_capacity: usize,
    /// Buffered events per sink.
    pub event_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            aggregator: AggregatorSettings::new(ScanMode::DiscoverAll),
            timeout: None,
            fast_refresh: false,
            queue_capacity: 1024,
            event_capacity: 1024,
        }
    }
}

/// Status cadence for a configuration.
#[must_use]
pub const fn poll_interval(timeout: Option<Duration>, fast_refresh: bool) -> Duration {
    if fast_refresh {
        FAST_POLL_INTERVAL
    } else if timeout.is_none() {
        CONTINUOUS_POLL_INTERVAL
    } else {
        TIMED_POLL_INTERVAL
    }
}

struct EngineInner {
    session_id: Uuid,
    started_at: Instant,
    timeout: Option<Duration>,
    fast_refresh: bool,
    aggregator: tokio::sync::Mutex<Aggregator>,
    queue: DetectionSender,
    events: broadcast::Sender<ScanEvent>,
    shutdown: watch::Sender<bool>,
    stopping: AtomicBool,
    finished: OnceCell<Summary>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    sources: Mutex<Vec<JoinHandle<()>>>,
    sinks: Mutex<Vec<JoinHandle<()>>>,
    gps_task: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a running scan. Cheap to clone.
#[derive(Clone)]
pub struct ScanEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for ScanEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanEngine")
            .field("session_id", &self.inner.session_id)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

fn take<T: Default>(slot: &Mutex<T>) -> T {
    std::mem::take(&mut *slot.lock().unwrap_or_else(PoisonError::into_inner))
}

impl ScanEngine {
    /// Create an engine and start its consumer task.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(settings: EngineSettings) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(settings.queue_capacity.max(1));
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        let (shutdown, _) = watch::channel(false);
        let session_id = Uuid::new_v4();

        info!(
            session = %session_id,
            mode = settings.aggregator.mode.name(),
            timeout_secs = ?settings.timeout.map(|t| t.as_secs_f64()),
            rssi_window = settings.aggregator.rssi_window,
            environment = %settings.aggregator.environment,
            "Scan engine created"
        );

        let inner = Arc::new(EngineInner {
            session_id,
            started_at: Instant::now(),
            timeout: settings.timeout,
            fast_refresh: settings.fast_refresh,
            aggregator: tokio::sync::Mutex::new(Aggregator::new(settings.aggregator)),
            queue: DetectionSender::new(queue_tx),
            events,
            shutdown,
            stopping: AtomicBool::new(false),
            finished: OnceCell::new(),
            consumer: Mutex::new(None),
            sources: Mutex::new(Vec::new()),
            sinks: Mutex::new(Vec::new()),
            gps_task: Mutex::new(None),
        });

        let consumer = tokio::spawn(consume(
            Arc::clone(&inner),
            queue_rx,
            inner.shutdown.subscribe(),
        ));
        *inner
            .consumer
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(consumer);

        Self { inner }
    }

    /// Scan session identifier.
    #[must_use]
    pub fn session_id(&self) -> Uuid {
        self.inner.session_id
    }

    /// Seconds since the engine was created.
    #[must_use]
    pub fn elapsed_secs(&self) -> f64 {
        self.inner.started_at.elapsed().as_secs_f64()
    }

    /// `false` once [`stop`](Self::stop) has been requested.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.inner.stopping.load(Ordering::Acquire)
    }

    /// A sender for feeding events from outside a managed source.
    #[must_use]
    pub fn sender(&self) -> DetectionSender {
        self.inner.queue.clone()
    }

    /// Queue one detection.
    ///
    /// # Errors
    ///
    /// Returns [`BtrpaError::EngineStopped`] after [`stop`](Self::stop).
    pub async fn submit(&self, event: DetectionEvent) -> Result<()> {
        if !self.is_running() {
            return Err(BtrpaError::EngineStopped);
        }
        self.inner.queue.send(event).await
    }

    /// Start a source on its own task. A failing source is logged and does
    /// not affect the others.
    pub fn add_source(&self, source: Box<dyn AdvertisementSource>) {
        let name = source.name();
        let sender = self.sender();
        let shutdown = self.inner.shutdown.subscribe();
        info!(source = %name, "Starting advertisement source");
        let handle = tokio::spawn(async move {
            match source.run(sender, shutdown).await {
                Ok(()) => debug!(source = %name, "Advertisement source finished"),
                Err(BtrpaError::EngineStopped) => {}
                Err(e) if e.is_bluetooth_error() => {
                    error!(source = %name, error = %e, "Radio unavailable, source stopped");
                }
                Err(e) => error!(source = %name, error = %e, "Advertisement source failed"),
            }
        });
        self.inner
            .sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Attach a sink. It receives every event published after this call.
    pub fn add_sink<S: RecordSink>(&self, sink: S) {
        debug!(sink = sink.name(), "Attaching sink");
        let handle = spawn_sink(self.subscribe(), sink);
        self.inner
            .sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Raw event stream, for consumers that are not [`RecordSink`]s.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.inner.events.subscribe()
    }

    /// Use `source` to stamp detections with a position.
    pub async fn attach_gps(&self, source: Arc<dyn GpsSource>) {
        self.inner.aggregator.lock().await.attach_gps(source);
    }

    /// Attach a gpsd client and start it; it is stopped with the engine.
    pub async fn spawn_gpsd(&self, client: GpsdClient) {
        self.attach_gps(client.cell()).await;
        let handle = client.spawn(self.inner.shutdown.subscribe());
        let previous = self
            .inner
            .gps_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Latest GPS fix, if a source is attached and has one.
    pub async fn current_gps_fix(&self) -> Option<GpsFix> {
        self.inner.aggregator.lock().await.current_gps_fix()
    }

    /// Current status snapshot.
    pub async fn status(&self) -> StatusSnapshot {
        let elapsed = self.elapsed_secs();
        let scanning = self.is_running();
        self.inner.aggregator.lock().await.status(elapsed, scanning)
    }

    /// Totals so far; final once [`stop`](Self::stop) has completed.
    pub async fn summary(&self) -> Summary {
        if let Some(summary) = self.inner.finished.get() {
            return summary.clone();
        }
        let elapsed = self.elapsed_secs();
        self.inner
            .aggregator
            .lock()
            .await
            .summary(self.inner.session_id, elapsed)
    }

    /// State for one address.
    pub async fn device(&self, address: &str) -> Option<DeviceState> {
        self.inner.aggregator.lock().await.device(address).cloned()
    }

    /// Publish status until the timeout elapses or the engine is stopped,
    /// then stop and return the final summary.
    pub async fn run(&self) -> Summary {
        let interval = poll_interval(self.inner.timeout, self.inner.fast_refresh);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let deadline = self.inner.timeout.and_then(|t| self.inner.started_at.checked_add(t));
        let expired = wait_until(deadline);
        tokio::pin!(expired);

        let mut shutdown = self.inner.shutdown.subscribe();
        debug!(interval_ms = interval.as_millis(), "Poll loop started");

        while self.is_running() {
            tokio::select! {
                _ = ticker.tick() => {
                    let status = self.status().await;
                    self.publish(ScanEvent::Status(status));
                }
                () = &mut expired => {
                    info!("Scan timeout reached");
                    break;
                }
                _ = shutdown.changed() => break,
            }
        }

        self.stop().await
    }

    /// Stop scanning and return the final summary.
    ///
    /// Safe to call any number of times from any task; teardown runs once.
    pub async fn stop(&self) -> Summary {
        self.inner.stopping.store(true, Ordering::Release);
        self.inner
            .finished
            .get_or_init(|| self.teardown())
            .await
            .clone()
    }

    async fn teardown(&self) -> Summary {
        info!(session = %self.inner.session_id, "Stopping scan engine");
        self.inner.shutdown.send_replace(true);

        for handle in take(&self.inner.sources) {
            if let Err(e) = handle.await {
                warn!(error = %e, "Advertisement source task panicked");
            }
        }
        // The consumer drains whatever is still queued before exiting.
        if let Some(handle) = take(&self.inner.consumer) {
            if let Err(e) = handle.await {
                error!(error = %e, "Detection consumer panicked");
            }
        }
        if let Some(handle) = take(&self.inner.gps_task) {
            if let Err(e) = handle.await {
                warn!(error = %e, "GPS task panicked");
            }
        }

        let elapsed = self.elapsed_secs();
        let (status, summary) = {
            let aggregator = self.inner.aggregator.lock().await;
            (
                aggregator.status(elapsed, false),
                aggregator.summary(self.inner.session_id, elapsed),
            )
        };
        self.publish(ScanEvent::Status(status));
        self.publish(ScanEvent::Complete(summary.clone()));

        for handle in take(&self.inner.sinks) {
            if let Err(e) = handle.await {
                warn!(error = %e, "Sink task panicked");
            }
        }

        info!(
            session = %summary.session_id,
            total_detections = summary.total_detections,
            unique_addresses = summary.unique_addresses,
            resolved_count = summary.resolved_count,
            "Scan engine stopped"
        );
        summary
    }

    fn publish(&self, event: ScanEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }
}

fn wait_until(deadline: Option<Instant>) -> impl Future<Output = ()> {
    async move {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}

async fn consume(
    inner: Arc<EngineInner>,
    mut queue: mpsc::Receiver<DetectionEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            event = queue.recv() => match event {
                Some(event) => process(&inner, &event).await,
                None => break,
            },
            _ = shutdown.changed() => {
                while let Ok(event) = queue.try_recv() {
                    process(&inner, &event).await;
                }
                break;
            }
        }
    }
    debug!("Detection consumer stopped");
}

async fn process(inner: &EngineInner, event: &DetectionEvent) {
    let outcome = inner.aggregator.lock().await.process(event);
    let published = match outcome {
        Outcome::Recorded(record) => Some(ScanEvent::Record(Arc::new(record))),
        Outcome::Unresolvable {
            identifier,
            first_sighting: true,
        } => Some(ScanEvent::Unresolvable(identifier)),
        Outcome::Rejected(reason) => {
            trace!(address = %event.address, ?reason, "Detection rejected");
            None
        }
        Outcome::Counted | Outcome::Unresolvable { .. } => None,
    };
    if let Some(published) = published {
        let _ = inner.events.send(published);
    }
}
