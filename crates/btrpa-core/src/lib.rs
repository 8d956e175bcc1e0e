//! # btrpa-core
//!
//! Detection and resolution engine for Bluetooth Low Energy Resolvable
//! Private Addresses.
//!
//! This crate provides:
//! - RPA resolution against Identity Resolving Keys (Bluetooth `ah()`)
//! - RSSI smoothing and log-distance range estimation
//! - Per-address detection aggregation in IRK, targeted and discover-all modes
//! - GPS correlation via gpsd
//! - A scan engine that serialises events from any number of adapters
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`address`] - MAC parsing and address classification
//! - [`irk`] - IRK parsing, masking and IRK files
//! - [`resolver`] - The `ah()` function and multi-key resolution
//! - [`distance`] - Path-loss distance estimation
//! - [`smoother`] - Per-address RSSI windows
//! - [`aggregator`] - Filters, mode logic and per-address state
//! - [`gps`] - GPS sources and the gpsd client
//! - [`source`] - Advertisement sources (replay; BlueZ with `bluetooth`)
//! - [`sink`] - Record sinks (tracing, JSON Lines)
//! - [`engine`] - The scan engine
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared types and OpenAPI schemas

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod address;
pub mod aggregator;
#[cfg(feature = "bluetooth")]
pub mod bluetooth;
pub mod config;
pub mod distance;
pub mod engine;
pub mod error;
pub mod gps;
pub mod irk;
pub mod resolver;
pub mod sink;
pub mod smoother;
pub mod source;
pub mod types;

// Re-export primary types for convenience
pub use address::{is_valid_mac_address, Address, AddressKind};
pub use aggregator::{Aggregator, AggregatorSettings, DeviceState, Outcome, ScanMode};
#[cfg(feature = "bluetooth")]
pub use bluetooth::BluezSource;
pub use config::{default_config_path, ConfigError, ConfigResult, ScanConfig};
pub use distance::{estimate_distance, DistanceEstimator, Environment};
pub use engine::{EngineSettings, ScanEngine};
pub use error::{BtrpaError, Result};
pub use gps::{BestFix, FixCell, GpsFix, GpsSource, GpsdClient};
pub use irk::{mask_irk, Irk, IrkError};
pub use resolver::{ah, generate_rpa, resolve, Resolver};
pub use sink::{JsonLinesSink, LogSink, RecordSink};
pub use smoother::RssiSmoother;
pub use source::{AdvertisementSource, DetectionSender, ReplaySource};
pub use types::{DetectionEvent, DetectionRecord, RecordKind, ScanEvent, StatusSnapshot, Summary};
