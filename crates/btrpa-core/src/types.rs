//! Shared types and OpenAPI schemas.
//!
//! [`DetectionEvent`] is what advertisement sources feed in;
//! [`DetectionRecord`] is what sinks get out. Absent values are `None`, never
//! empty strings.

use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::address::AddressKind;
use crate::gps::{BestFix, GpsFix};

/// One raw advertisement as reported by a radio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionEvent {
    /// Address as reported by the platform (MAC or opaque identifier).
    pub address: String,

    /// Received signal strength in dBm; `0` means "no reading".
    pub rssi: i16,

    /// Advertised TX power in dBm.
    #[serde(default)]
    pub tx_power: Option<i16>,

    /// Advertised local name.
    #[serde(default)]
    pub name: Option<String>,

    /// Manufacturer-specific data keyed by company identifier.
    #[serde(default)]
    pub manufacturer_data: BTreeMap<u16, Vec<u8>>,

    /// Advertised service UUIDs.
    #[serde(default)]
    pub service_uuids: Vec<String>,

    /// When the advertisement was received.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Adapter that heard it, when known.
    #[serde(default)]
    pub adapter: Option<String>,
}

impl DetectionEvent {
    /// Minimal event stamped now.
    #[must_use]
    pub fn new(address: impl Into<String>, rssi: i16) -> Self {
        Self {
            address: address.into(),
            rssi,
            tx_power: None,
            name: None,
            manufacturer_data: BTreeMap::new(),
            service_uuids: Vec::new(),
            timestamp: Utc::now(),
            adapter: None,
        }
    }

    /// Set the advertised TX power.
    #[must_use]
    pub const fn with_tx_power(mut self, tx_power: i16) -> Self {
        self.tx_power = Some(tx_power);
        self
    }

    /// Set the advertised name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the adapter name.
    #[must_use]
    pub fn with_adapter(mut self, adapter: impl Into<String>) -> Self {
        self.adapter = Some(adapter.into());
        self
    }
}

/// Why a record was produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordKind {
    /// An RPA resolved against a loaded IRK.
    IrkResolved {
        /// How many times this address has resolved, including this one.
        match_number: u64,
        /// Index of the matching key in load order.
        irk_index: usize,
    },
    /// An address did not resolve (verbose reporting only).
    IrkNoMatch {
        /// Classification of the address.
        address_kind: AddressKind,
    },
    /// The configured target was heard.
    TargetFound {
        /// Running count of target detections.
        detection_number: u64,
    },
    /// Discover-all sighting.
    Device {
        /// 1-based order in which this address was first seen.
        ordinal: usize,
    },
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IrkResolved { match_number, .. } => {
                write!(f, "IRK RESOLVED - match #{match_number}")
            }
            Self::IrkNoMatch { .. } => f.write_str("IRK NO MATCH"),
            Self::TargetFound { detection_number } => {
                write!(f, "TARGET FOUND - detection #{detection_number}")
            }
            Self::Device { ordinal } => write!(f, "DEVICE #{ordinal}"),
        }
    }
}

/// One accepted detection, ready for sinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DetectionRecord {
    /// When the advertisement was received.
    pub timestamp: DateTime<Utc>,

    /// Address as reported.
    #[schema(example = "5A:1B:2C:3D:4E:5F")]
    pub address: String,

    /// Advertised name.
    pub name: Option<String>,

    /// Raw RSSI in dBm.
    #[schema(example = -62)]
    pub rssi: i16,

    /// Windowed average RSSI in dBm.
    #[schema(example = -64)]
    pub avg_rssi: i16,

    /// Readings in the averaging window.
    pub rssi_samples: usize,

    /// Advertised TX power in dBm.
    pub tx_power: Option<i16>,

    /// Estimated range in metres, two decimals.
    pub est_distance: Option<f64>,

    /// GPS latitude at detection time.
    pub latitude: Option<f64>,

    /// GPS longitude at detection time.
    pub longitude: Option<f64>,

    /// GPS altitude at detection time.
    pub gps_altitude: Option<f64>,

    /// Manufacturer data as `0xXXXX:<hex>` entries joined by `; `.
    pub manufacturer_data: Option<String>,

    /// Service UUIDs joined by `, `.
    pub service_uuids: Option<String>,

    /// Resolution verdict; `None` outside IRK mode.
    pub resolved: Option<bool>,

    /// Why this record exists.
    pub kind: RecordKind,

    /// Accepted detections for this address so far.
    pub times_seen: u64,

    /// Estimated distance is within the configured alert radius.
    pub proximity_alert: bool,

    /// Adapter that heard it.
    pub adapter: Option<String>,
}

/// Format manufacturer data as `0x004C:0215...; 0x0006:01`.
#[must_use]
pub fn format_manufacturer_data(data: &BTreeMap<u16, Vec<u8>>) -> Option<String> {
    if data.is_empty() {
        return None;
    }
    let mut out = String::new();
    for (idx, (company, payload)) in data.iter().enumerate() {
        if idx > 0 {
            out.push_str("; ");
        }
        let _ = write!(out, "0x{company:04X}:{}", hex::encode(payload));
    }
    Some(out)
}

/// Join service UUIDs with `, `.
#[must_use]
pub fn format_service_uuids(uuids: &[String]) -> Option<String> {
    if uuids.is_empty() {
        None
    } else {
        Some(uuids.join(", "))
    }
}

/// Round to two decimals.
#[must_use]
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}

/// Per-address totals for the summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AddressCount {
    /// Device address.
    pub address: String,
    /// Number of times counted.
    pub count: u64,
    /// Strongest-signal position, if any.
    pub best_gps: Option<BestFix>,
}

/// Scan totals. Authoritative once the engine has stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Summary {
    /// Scan session identifier.
    pub session_id: Uuid,

    /// Seconds since the engine started.
    pub elapsed_secs: f64,

    /// Accepted detections.
    pub total_detections: u64,

    /// Distinct tracked addresses.
    pub unique_addresses: usize,

    /// Detections that resolved against an IRK.
    pub resolved_count: u64,

    /// Addresses that resolved, most matches first.
    pub resolved_addresses: Vec<AddressCount>,

    /// `times_seen` per address.
    pub per_address_counts: BTreeMap<String, u64>,

    /// Strongest-signal position per address.
    pub best_known_positions: BTreeMap<String, BestFix>,

    /// Platform-opaque identifiers that were skipped.
    pub unresolvable_identifiers: usize,
}

/// Periodic status emitted by the poll loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StatusSnapshot {
    /// Seconds since the engine started.
    pub elapsed_secs: f64,
    /// Accepted detections.
    pub total_detections: u64,
    /// Distinct tracked addresses.
    pub unique_count: usize,
    /// Whether the scan is still running.
    pub scanning: bool,
    /// Latest GPS fix.
    pub gps: Option<GpsFix>,
    /// Whether the GPS source is connected.
    pub gps_connected: bool,
}

/// Everything the engine publishes to sinks.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    /// An accepted detection.
    Record(std::sync::Arc<DetectionRecord>),
    /// First sighting of an identifier that can never be resolved.
    Unresolvable(String),
    /// Poll-loop status tick.
    Status(StatusSnapshot),
    /// Final summary; published exactly once.
    Complete(Summary),
}
