//! Unified error types for the btrpa core library.
//!
//! [`BtrpaError`] covers the failures of running components: radios, gpsd,
//! sinks and the engine itself. Configuration problems are reported before
//! a scan starts through [`ConfigError`](crate::config::ConfigError) and
//! never reach this type. Per-event problems degrade to `None`/`false`
//! instead of surfacing here.

use thiserror::Error;

/// The unified error type for all btrpa operations.
#[derive(Debug, Error)]
pub enum BtrpaError {
    // =========================================================================
    // BLUETOOTH ERRORS
    // =========================================================================
    /// No Bluetooth adapter was found on this system.
    #[error(
        "No Bluetooth adapter found. Ensure Bluetooth hardware is present and drivers are loaded."
    )]
    BluetoothAdapterNotFound,

    /// The Bluetooth adapter exists but is powered off.
    #[error("Bluetooth adapter is powered off. Run 'bluetoothctl power on' to enable.")]
    BluetoothAdapterPoweredOff,

    /// An advertisement session failed to start or died while running.
    #[error("Bluetooth scan failed on {adapter}: {message}")]
    BluetoothScanFailed {
        /// Adapter (or source) name.
        adapter: String,
        /// Underlying failure.
        message: String,
    },

    // =========================================================================
    // RUNTIME ERRORS
    // =========================================================================
    /// The GPS daemon could not be reached.
    #[error("GPS unavailable at {endpoint}: {message}")]
    GpsUnavailable {
        /// `host:port` of the gpsd instance.
        endpoint: String,
        /// Underlying failure.
        message: String,
    },

    /// A record sink failed to accept a record.
    #[error("Sink '{sink}' failed: {message}")]
    SinkFailed {
        /// Sink name.
        sink: String,
        /// Underlying failure.
        message: String,
    },

    /// The scan engine has already been stopped.
    #[error("Scan engine is stopped")]
    EngineStopped,

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// A JSON payload could not be encoded or decoded.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// A specialized [`Result`] type for btrpa operations.
pub type Result<T> = std::result::Result<T, BtrpaError>;

impl BtrpaError {
    /// Returns `true` if this error is related to Bluetooth operations.
    #[inline]
    #[must_use]
    pub const fn is_bluetooth_error(&self) -> bool {
        matches!(
            self,
            Self::BluetoothAdapterNotFound
                | Self::BluetoothAdapterPoweredOff
                | Self::BluetoothScanFailed { .. }
        )
    }

    /// Returns `true` for failures expected while hardware comes and goes.
    /// The component that raised it keeps running.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::GpsUnavailable { .. } | Self::SinkFailed { .. })
    }
}

// =============================================================================
// TESTS
// =============================================================================
