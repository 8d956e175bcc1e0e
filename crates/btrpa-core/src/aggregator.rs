//! Detection aggregation.
//!
//! The [`Aggregator`] owns every piece of per-address state. Each
//! [`DetectionEvent`] goes through: smoothing preview, RSSI/name filters,
//! mode-specific admission (IRK resolution, target match, or discover-all),
//! record construction, and finally a single state commit.
//!
//! Nothing here performs I/O and nothing here fails: malformed addresses,
//! missing TX power and unknown environments degrade to `None`/`false`.
//! The aggregator is not synchronised; the [`engine`](crate::engine) wraps it
//! in the one lock the system has.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::address::{normalize_key, AddressKind};
use crate::distance::{DistanceEstimator, Environment};
use crate::gps::{BestFix, GpsFix, GpsSource};
use crate::resolver::Resolver;
use crate::smoother::RssiSmoother;
use crate::types::{
    format_manufacturer_data, format_service_uuids, round2, AddressCount, DetectionEvent,
    DetectionRecord, RecordKind, StatusSnapshot, Summary,
};

/// What the scan is looking for.
#[derive(Debug, Clone)]
pub enum ScanMode {
    /// Resolve RPAs against one or more IRKs.
    Irk(Resolver),
    /// Report only addresses containing this (uppercased) substring.
    Targeted(String),
    /// Report everything.
    DiscoverAll,
}

impl ScanMode {
    /// Targeted mode with the pattern normalised for matching.
    #[must_use]
    pub fn targeted(pattern: &str) -> Self {
        Self::Targeted(normalize_key(pattern))
    }

    /// Short name for logs and status output.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Irk(_) => "irk",
            Self::Targeted(_) => "target",
            Self::DiscoverAll => "all",
        }
    }
}

/// Aggregator tuning.
#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    /// Scan mode.
    pub mode: ScanMode,
    /// Drop detections whose effective RSSI is below this.
    pub min_rssi: Option<i16>,
    /// Case-insensitive substring the advertised name must contain.
    pub name_filter: Option<String>,
    /// RSSI averaging window; 1 disables averaging.
    pub rssi_window: usize,
    /// Path-loss environment.
    pub environment: Environment,
    /// Calibrated RSSI at one metre.
    pub ref_rssi: Option<i16>,
    /// Proximity alert radius in metres.
    pub alert_within: Option<f64>,
    /// Emit records for IRK no-match detections too.
    pub verbose: bool,
}

impl AggregatorSettings {
    /// Settings with no filters, no averaging and free-space propagation.
    #[must_use]
    pub const fn new(mode: ScanMode) -> Self {
        Self {
            mode,
            min_rssi: None,
            name_filter: None,
            rssi_window: 1,
            environment: Environment::FreeSpace,
            ref_rssi: None,
            alert_within: None,
            verbose: false,
        }
    }
}

/// State tracked for one address.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct DeviceState {
    /// Normalised address.
    pub address: String,
    /// 1-based order of first sighting. Discover-all records label the
    /// device with this, so a device keeps its number on every sighting
    /// instead of taking the unique count at the time of the record.
    pub ordinal: usize,
    /// Accepted detections.
    pub times_seen: u64,
    /// Detections that resolved against an IRK.
    pub resolved_match_count: u64,
    /// Strongest-signal position.
    pub best_gps: Option<BestFix>,
    /// Most recent raw RSSI.
    pub last_rssi: i16,
    /// Most recent windowed RSSI.
    pub last_avg_rssi: i16,
    /// Most recent estimated distance.
    pub last_distance: Option<f64>,
    /// Most recent advertised name.
    pub name: Option<String>,
    /// Time of the most recent accepted detection.
    pub last_seen: DateTime<Utc>,
}

/// Why an event was dropped before touching state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Effective RSSI below the configured minimum.
    WeakSignal {
        /// Smoothed (or raw) RSSI that was tested.
        effective_rssi: i16,
        /// Configured minimum.
        min_rssi: i16,
    },
    /// Name does not contain the configured filter.
    NameMismatch,
    /// Address does not contain the configured target.
    NotTarget,
}

/// Result of processing one event.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Accepted; hand this record to sinks.
    Recorded(DetectionRecord),
    /// Accepted and counted, but no record (IRK no-match without verbose).
    Counted,
    /// Platform-opaque identifier in IRK mode; never tracked.
    Unresolvable {
        /// The identifier.
        identifier: String,
        /// `true` only the first time this identifier is seen.
        first_sighting: bool,
    },
    /// Dropped by a filter; no state changed.
    Rejected(RejectReason),
}

enum Admission {
    Irk {
        kind: AddressKind,
        matched: Option<usize>,
    },
    Target,
    Device,
}

/// Owner of all per-address detection state.
pub struct Aggregator {
    settings: AggregatorSettings,
    name_filter: Option<String>,
    smoother: RssiSmoother,
    estimator: DistanceEstimator,
    devices: HashMap<String, DeviceState>,
    unresolvable: HashSet<String>,
    total_detections: u64,
    resolved_count: u64,
    gps: Option<Arc<dyn GpsSource>>,
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("mode", &self.settings.mode.name())
            .field("devices", &self.devices.len())
            .field("total_detections", &self.total_detections)
            .field("gps_attached", &self.gps.is_some())
            .finish_non_exhaustive()
    }
}

impl Aggregator {
    /// Create an aggregator.
    #[must_use]
    pub fn new(settings: AggregatorSettings) -> Self {
        let name_filter = settings.name_filter.as_ref().map(|f| f.to_lowercase());
        let smoother = RssiSmoother::new(settings.rssi_window);
        let estimator = DistanceEstimator::new(settings.environment, settings.ref_rssi);
        Self {
            settings,
            name_filter,
            smoother,
            estimator,
            devices: HashMap::new(),
            unresolvable: HashSet::new(),
            total_detections: 0,
            resolved_count: 0,
            gps: None,
        }
    }

    /// Settings in use.
    #[must_use]
    pub const fn settings(&self) -> &AggregatorSettings {
        &self.settings
    }

    /// Attach (or replace) the GPS source used to stamp records.
    pub fn attach_gps(&mut self, source: Arc<dyn GpsSource>) {
        self.gps = Some(source);
    }

    /// Latest fix from the attached source.
    #[must_use]
    pub fn current_gps_fix(&self) -> Option<GpsFix> {
        self.gps.as_ref().and_then(|gps| gps.fix())
    }

    /// Whether the attached GPS source is connected.
    #[must_use]
    pub fn gps_connected(&self) -> bool {
        self.gps.as_ref().is_some_and(|gps| gps.connected())
    }

    /// Accepted detections so far.
    #[must_use]
    pub const fn total_detections(&self) -> u64 {
        self.total_detections
    }

    /// Distinct tracked addresses.
    #[must_use]
    pub fn unique_addresses(&self) -> usize {
        self.devices.len()
    }

    /// State for one address.
    #[must_use]
    pub fn device(&self, address: &str) -> Option<&DeviceState> {
        self.devices.get(&normalize_key(address))
    }

    /// Process one advertisement.
    pub fn process(&mut self, event: &DetectionEvent) -> Outcome {
        let key = normalize_key(&event.address);

        // Filters see the smoothed value, but the window only changes once
        // the event is accepted.
        let effective_rssi = self.smoother.preview(&key, event.rssi);
        if let Some(min_rssi) = self.settings.min_rssi {
            if effective_rssi < min_rssi {
                return Outcome::Rejected(RejectReason::WeakSignal {
                    effective_rssi,
                    min_rssi,
                });
            }
        }
        if let Some(filter) = &self.name_filter {
            let name = event.name.as_deref().unwrap_or_default().to_lowercase();
            if !name.contains(filter.as_str()) {
                return Outcome::Rejected(RejectReason::NameMismatch);
            }
        }

        let kind = AddressKind::classify(&key);
        if kind == AddressKind::PlatformOpaque && matches!(self.settings.mode, ScanMode::Irk(_)) {
            return self.note_unresolvable(key);
        }

        let admission = match &self.settings.mode {
            ScanMode::Irk(resolver) => Admission::Irk {
                kind,
                matched: resolver.resolve(&key),
            },
            ScanMode::Targeted(target) => {
                if !key.contains(target.as_str()) {
                    return Outcome::Rejected(RejectReason::NotTarget);
                }
                Admission::Target
            }
            ScanMode::DiscoverAll => Admission::Device,
        };

        // Everything below is computed before any state is touched.
        let previous = self.devices.get(&key);
        let ordinal = previous.map_or(self.devices.len() + 1, |d| d.ordinal);
        let times_seen = previous.map_or(0, |d| d.times_seen) + 1;
        let prior_matches = previous.map_or(0, |d| d.resolved_match_count);
        let prior_best = previous.and_then(|d| d.best_gps);
        let rssi_samples = (self.smoother.samples(&key) + 1).min(self.smoother.window_size());
        let distance = self.estimator.estimate(effective_rssi, event.tx_power);
        let fix = self.current_gps_fix();

        let (kind, resolved, resolved_match_count, emit) = match admission {
            Admission::Irk {
                matched: Some(irk_index),
                ..
            } => {
                let match_number = prior_matches + 1;
                (
                    RecordKind::IrkResolved {
                        match_number,
                        irk_index,
                    },
                    Some(true),
                    match_number,
                    true,
                )
            }
            Admission::Irk {
                kind: address_kind,
                matched: None,
            } => (
                RecordKind::IrkNoMatch { address_kind },
                Some(false),
                prior_matches,
                self.settings.verbose,
            ),
            Admission::Target => (
                RecordKind::TargetFound {
                    detection_number: self.total_detections + 1,
                },
                None,
                prior_matches,
                true,
            ),
            Admission::Device => (RecordKind::Device { ordinal }, None, prior_matches, true),
        };

        // Only reported detections move the best known position.
        let best_gps = match (fix, prior_best) {
            (Some(fix), best) if emit && !best.is_some_and(|b| event.rssi <= b.rssi) => {
                Some(BestFix {
                    lat: fix.lat,
                    lon: fix.lon,
                    rssi: event.rssi,
                })
            }
            (_, best) => best,
        };

        let record = DetectionRecord {
            timestamp: event.timestamp,
            address: event.address.clone(),
            name: event.name.clone(),
            rssi: event.rssi,
            avg_rssi: effective_rssi,
            rssi_samples,
            tx_power: event.tx_power,
            est_distance: distance.map(round2),
            latitude: fix.map(|f| f.lat),
            longitude: fix.map(|f| f.lon),
            gps_altitude: fix.and_then(|f| f.alt),
            manufacturer_data: format_manufacturer_data(&event.manufacturer_data),
            service_uuids: format_service_uuids(&event.service_uuids),
            resolved,
            kind,
            times_seen,
            proximity_alert: self.proximity_alert(distance),
            adapter: event.adapter.clone(),
        };

        // Commit.
        self.smoother.push(&key, event.rssi);
        self.total_detections += 1;
        if resolved == Some(true) {
            self.resolved_count += 1;
        }
        self.devices.insert(
            key.clone(),
            DeviceState {
                address: key,
                ordinal,
                times_seen,
                resolved_match_count,
                best_gps,
                last_rssi: event.rssi,
                last_avg_rssi: effective_rssi,
                last_distance: record.est_distance,
                name: event.name.clone(),
                last_seen: event.timestamp,
            },
        );

        if emit {
            Outcome::Recorded(record)
        } else {
            Outcome::Counted
        }
    }

    /// `true` when `distance` is known and within the alert radius.
    #[must_use]
    pub fn proximity_alert(&self, distance: Option<f64>) -> bool {
        match (distance, self.settings.alert_within) {
            (Some(distance), Some(radius)) => distance <= radius,
            _ => false,
        }
    }

    fn note_unresolvable(&mut self, identifier: String) -> Outcome {
        let first_sighting = self.unresolvable.insert(identifier.clone());
        if first_sighting {
            warn!(
                address = %identifier,
                "Platform identifier cannot be resolved (need a real MAC)"
            );
        } else {
            debug!(address = %identifier, "Skipping platform identifier");
        }
        Outcome::Unresolvable {
            identifier,
            first_sighting,
        }
    }

    /// Status snapshot for the poll loop.
    #[must_use]
    pub fn status(&self, elapsed_secs: f64, scanning: bool) -> StatusSnapshot {
        StatusSnapshot {
            elapsed_secs,
            total_detections: self.total_detections,
            unique_count: self.devices.len(),
            scanning,
            gps: self.current_gps_fix(),
            gps_connected: self.gps_connected(),
        }
    }

    /// Totals so far.
    #[must_use]
    pub fn summary(&self, session_id: Uuid, elapsed_secs: f64) -> Summary {
        let per_address_counts: BTreeMap<String, u64> = self
            .devices
            .iter()
            .map(|(addr, state)| (addr.clone(), state.times_seen))
            .collect();
        let best_known_positions: BTreeMap<String, BestFix> = self
            .devices
            .iter()
            .filter_map(|(addr, state)| state.best_gps.map(|fix| (addr.clone(), fix)))
            .collect();

        let mut resolved_addresses: Vec<AddressCount> = self
            .devices
            .values()
            .filter(|state| state.resolved_match_count > 0)
            .map(|state| AddressCount {
                address: state.address.clone(),
                count: state.resolved_match_count,
                best_gps: state.best_gps,
            })
            .collect();
        resolved_addresses
            .sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.address.cmp(&b.address)));

        Summary {
            session_id,
            elapsed_secs,
            total_detections: self.total_detections,
            unique_addresses: self.devices.len(),
            resolved_count: self.resolved_count,
            resolved_addresses,
            per_address_counts,
            best_known_positions,
            unresolvable_identifiers: self.unresolvable.len(),
        }
    }
}
