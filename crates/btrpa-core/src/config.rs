//! Scan configuration.
//!
//! Configuration is read from an optional TOML file and layered with
//! `BTRPA__SECTION__KEY` environment overrides:
//!
//! ```toml
//! [scan]
//! irk_file = "/etc/btrpa/irks.txt"
//! adapters = ["hci0", "hci1"]
//!
//! [signal]
//! rssi_window = 5
//! environment = "indoor"
//! alert_within = 2.0
//!
//! [gps]
//! host = "localhost"
//! port = 2947
//! ```
//!
//! All validation happens here, before scanning starts. Nothing downstream
//! re-checks these values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::address::is_valid_mac_address;
use crate::aggregator::{AggregatorSettings, ScanMode};
use crate::distance::Environment;
use crate::engine::EngineSettings;
use crate::gps::GPSD_DEFAULT_PORT;
use crate::irk::{parse_irk_list, Irk, IrkError};
use crate::resolver::Resolver;

/// Environment variable holding a single IRK.
pub const IRK_ENV_VAR: &str = "BTRPA_IRK";

/// Environment variable overriding the config file path.
pub const CONFIG_PATH_ENV_VAR: &str = "BTRPA_CONFIG";

/// Timeout used outside IRK mode when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration-specific errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file could not be read.
    #[error("Failed to read {}: {source}", .path.display())]
    ReadError {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// An IRK could not be parsed.
    #[error(transparent)]
    Irk(#[from] IrkError),

    /// The IRK file contained no keys.
    #[error("IRK file {} contains no valid keys", .0.display())]
    EmptyIrkFile(PathBuf),

    /// A single field is invalid.
    #[error("Invalid {field}: {message}")]
    ValidationError {
        /// Dotted field path, e.g. `signal.rssi_window`.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields are invalid.
    #[error("Multiple validation errors: {}", format_errors(.0))]
    MultipleValidationErrors(Vec<ConfigError>),
}

fn format_errors(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_string(),
        message: message.into(),
    }
}

/// Explicit scan mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeName {
    /// Resolve against IRKs.
    Irk,
    /// Watch for one address.
    Target,
    /// Report everything.
    All,
}

/// Complete configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// What to scan for and how long.
    pub scan: ScanSection,
    /// Detection filters.
    pub filter: FilterSection,
    /// Signal processing.
    pub signal: SignalSection,
    /// GPS daemon connection.
    pub gps: GpsSection,
    /// Record sinks.
    pub output: OutputSection,
    /// HTTP status API.
    pub server: ServerSection,
}

/// `[scan]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSection {
    /// Explicit mode; inferred from the other fields when unset.
    pub mode: Option<ModeName>,
    /// Inline IRKs.
    pub irks: Vec<String>,
    /// File with one IRK per line.
    pub irk_file: Option<PathBuf>,
    /// Target MAC address.
    pub target: Option<String>,
    /// Scan duration in seconds; unset means the mode default.
    pub timeout_secs: Option<f64>,
    /// Adapters to scan on; empty means the default adapter.
    pub adapters: Vec<String>,
    /// Emit records for IRK no-match detections.
    pub verbose: bool,
    /// Use the faster status refresh interval.
    pub fast_refresh: bool,
    /// Replay detections from a JSON Lines file instead of the radio.
    pub replay_file: Option<PathBuf>,
    /// Delay between replayed detections, in milliseconds.
    pub replay_delay_ms: u64,
}

/// `[filter]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSection {
    /// Minimum effective RSSI in dBm.
    pub min_rssi: Option<i16>,
    /// Case-insensitive name substring.
    pub name: Option<String>,
}

/// `[signal]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalSection {
    /// RSSI averaging window.
    pub rssi_window: usize,
    /// Path-loss environment.
    pub environment: Environment,
    /// Calibrated RSSI at one metre.
    pub ref_rssi: Option<i16>,
    /// Proximity alert radius in metres.
    pub alert_within: Option<f64>,
}

impl Default for SignalSection {
    fn default() -> Self {
        Self {
            rssi_window: 1,
            environment: Environment::FreeSpace,
            ref_rssi: None,
            alert_within: None,
        }
    }
}

/// `[gps]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpsSection {
    /// Connect to gpsd.
    pub enabled: bool,
    /// gpsd host.
    pub host: String,
    /// gpsd port.
    pub port: u16,
}

impl Default for GpsSection {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "localhost".to_string(),
            port: GPSD_DEFAULT_PORT,
        }
    }
}

/// `[output]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    /// Log each record through `tracing`.
    pub console: bool,
    /// Append records as JSON Lines to this file.
    pub jsonl_file: Option<PathBuf>,
    /// Buffered events per sink before it starts dropping.
    pub sink_capacity: usize,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            console: true,
            jsonl_file: None,
            sink_capacity: 1024,
        }
    }
}

/// `[server]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Serve the HTTP status API.
    pub enabled: bool,
    /// Listen address.
    pub bind: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "127.0.0.1:3000".to_string(),
        }
    }
}

/// Config file path: `BTRPA_CONFIG` if set, else the platform default.
#[must_use]
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV_VAR) {
        return PathBuf::from(path);
    }
    // On Linux deployments: /etc/btrpa/config.toml
    // Elsewhere: the platform config directory
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/etc/btrpa/config.toml")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "btrpa").map_or_else(
            || PathBuf::from("btrpa.toml"),
            |dirs| dirs.config_dir().join("config.toml"),
        )
    }
}

impl ScanConfig {
    /// Load from `path` (missing file is fine) plus environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ParseError`] if the file or an override cannot
    /// be parsed.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        debug!(path = %path.display(), "Loading configuration");
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("BTRPA")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("scan.irks")
                    .with_list_parse_key("scan.adapters"),
            )
            .build()
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        settings
            .try_deserialize()
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Parse a TOML document; no environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ParseError`] on malformed TOML.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Validate against the current `BTRPA_IRK` value.
    ///
    /// # Errors
    ///
    /// Returns every problem found, collected into one error.
    pub fn validate(&self) -> ConfigResult<()> {
        self.validate_with_env(env_irk().as_deref())
    }

    /// Validate, treating `env_irk` as the `BTRPA_IRK` value.
    ///
    /// # Errors
    ///
    /// Returns every problem found, collected into one error.
    pub fn validate_with_env(&self, env_irk: Option<&str>) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if self.signal.rssi_window < 1 {
            errors.push(invalid("signal.rssi_window", "must be at least 1"));
        }
        if let Some(radius) = self.signal.alert_within {
            if !(radius.is_finite() && radius > 0.0) {
                errors.push(invalid("signal.alert_within", "must be a positive distance"));
            }
        }
        if let Some(secs) = self.scan.timeout_secs {
            if let Err(e) = scan_timeout(secs) {
                errors.push(e);
            }
        }
        if let Some(target) = &self.scan.target {
            if !is_valid_mac_address(target) {
                errors.push(invalid(
                    "scan.target",
                    format!("'{target}' is not in XX:XX:XX:XX:XX:XX format"),
                ));
            }
        }
        if self.scan.adapters.iter().any(|a| a.trim().is_empty()) {
            errors.push(invalid("scan.adapters", "adapter names must not be blank"));
        }
        if self.gps.enabled && self.gps.port == 0 {
            errors.push(invalid("gps.port", "must be non-zero"));
        }
        if self.output.sink_capacity == 0 {
            errors.push(invalid("output.sink_capacity", "must be at least 1"));
        }

        let inline = !self.scan.irks.is_empty();
        let file = self.scan.irk_file.is_some();
        let env = env_irk.is_some_and(|v| !v.trim().is_empty());
        if inline && file {
            errors.push(invalid(
                "scan.irks",
                "scan.irks and scan.irk_file are mutually exclusive",
            ));
        }
        let has_irk = inline || file || env;
        let has_target = self.scan.target.is_some();
        if has_irk && has_target {
            errors.push(invalid(
                "scan.target",
                "IRK mode and target mode are mutually exclusive",
            ));
        }
        match self.scan.mode {
            Some(ModeName::Irk) if !has_irk => errors.push(invalid(
                "scan.mode",
                "irk mode needs scan.irks, scan.irk_file or BTRPA_IRK",
            )),
            Some(ModeName::Target) if !has_target => {
                errors.push(invalid("scan.mode", "target mode needs scan.target"));
            }
            Some(ModeName::All) if has_irk || has_target => errors.push(invalid(
                "scan.mode",
                "all mode cannot be combined with IRKs or a target",
            )),
            None if !has_irk && !has_target => errors.push(invalid(
                "scan.mode",
                "nothing to scan for: set IRKs, a target, or mode = \"all\"",
            )),
            _ => {}
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }

    /// Load IRKs from whichever source is configured, in order: inline list,
    /// file, then `env_irk`.
    ///
    /// # Errors
    ///
    /// Returns the first parse failure, a read failure, or
    /// [`ConfigError::EmptyIrkFile`].
    pub fn load_irks(&self, env_irk: Option<&str>) -> ConfigResult<Vec<Irk>> {
        if !self.scan.irks.is_empty() {
            return self
                .scan
                .irks
                .iter()
                .map(|raw| raw.parse::<Irk>().map_err(ConfigError::from))
                .collect();
        }
        if let Some(path) = &self.scan.irk_file {
            let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
                path: path.clone(),
                source,
            })?;
            let irks = parse_irk_list(&contents)?;
            if irks.is_empty() {
                return Err(ConfigError::EmptyIrkFile(path.clone()));
            }
            info!(count = irks.len(), path = %path.display(), "Loaded IRKs from file");
            return Ok(irks);
        }
        match env_irk.map(str::trim).filter(|v| !v.is_empty()) {
            Some(raw) => Ok(vec![raw.parse::<Irk>()?]),
            None => Ok(Vec::new()),
        }
    }

    /// Validate and build engine settings, reading `BTRPA_IRK`.
    ///
    /// # Errors
    ///
    /// Returns any validation or IRK loading error.
    pub fn engine_settings(&self) -> ConfigResult<EngineSettings> {
        self.engine_settings_with_env(env_irk().as_deref())
    }

    /// Validate and build engine settings with an explicit `BTRPA_IRK`.
    ///
    /// # Errors
    ///
    /// Returns any validation or IRK loading error.
    pub fn engine_settings_with_env(&self, env_irk: Option<&str>) -> ConfigResult<EngineSettings> {
        self.validate_with_env(env_irk)?;

        let irks = self.load_irks(env_irk)?;
        let mode = if !irks.is_empty() {
            for (idx, irk) in irks.iter().enumerate() {
                info!(index = idx, irk = %irk.masked(), "IRK loaded");
            }
            ScanMode::Irk(Resolver::new(irks))
        } else if let Some(target) = &self.scan.target {
            ScanMode::targeted(target)
        } else {
            ScanMode::DiscoverAll
        };

        let timeout = match (self.scan.timeout_secs, &mode) {
            (Some(secs), _) => Some(scan_timeout(secs)?),
            (None, ScanMode::Irk(_)) => None,
            (None, _) => Some(DEFAULT_TIMEOUT),
        };

        let aggregator = AggregatorSettings {
            mode,
            min_rssi: self.filter.min_rssi,
            name_filter: self.filter.name.clone(),
            rssi_window: self.signal.rssi_window,
            environment: self.signal.environment,
            ref_rssi: self.signal.ref_rssi,
            alert_within: self.signal.alert_within,
            verbose: self.scan.verbose,
        };

        Ok(EngineSettings {
            aggregator,
            timeout,
            fast_refresh: self.scan.fast_refresh,
            event_capacity: self.output.sink_capacity,
            ..EngineSettings::default()
        })
    }
}

fn scan_timeout(secs: f64) -> ConfigResult<Duration> {
    if !(secs.is_finite() && secs > 0.0) {
        return Err(invalid("scan.timeout_secs", "must be a positive number of seconds"));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|_| invalid("scan.timeout_secs", format!("{secs} seconds is too long")))
}

fn env_irk() -> Option<String> {
    std::env::var(IRK_ENV_VAR).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const IRK: &str = "0123456789abcdef0123456789abcdef";

    fn discover_all() -> ScanConfig {
        let mut config = ScanConfig::default();
        config.scan.mode = Some(ModeName::All);
        config
    }

    fn field_errors(err: ConfigError) -> Vec<String> {
        match err {
            ConfigError::ValidationError { field, .. } => vec![field],
            ConfigError::MultipleValidationErrors(errors) => {
                errors.into_iter().flat_map(field_errors).collect()
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_defaults() {
        let config = ScanConfig::default();
        assert_eq!(config.signal.rssi_window, 1);
        assert_eq!(config.gps.port, 2947);
        assert!(config.gps.enabled);
        assert!(config.output.console);
    }

    #[test]
    fn test_from_toml_str() {
        let config = ScanConfig::from_toml_str(
            r#"
            [scan]
            target = "AA:BB:CC:DD:EE:FF"
            timeout_secs = 10

            [signal]
            rssi_window = 5
            environment = "indoor"

            [filter]
            min_rssi = -80
            "#,
        )
        .unwrap();
        assert_eq!(config.scan.target.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(config.signal.rssi_window, 5);
        assert_eq!(config.signal.environment, Environment::Indoor);
        assert_eq!(config.filter.min_rssi, Some(-80));
        assert_eq!(config.gps.host, "localhost");
    }

    #[test]
    fn test_malformed_toml() {
        assert!(matches!(
            ScanConfig::from_toml_str("[scan\n"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ScanConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.signal.rssi_window, 1);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[scan]\nmode = \"all\"\n[signal]\nrssi_window = 4\n").unwrap();
        let config = ScanConfig::load(&path).unwrap();
        assert_eq!(config.scan.mode, Some(ModeName::All));
        assert_eq!(config.signal.rssi_window, 4);
    }

    #[test]
    fn test_rssi_window_zero_rejected() {
        let mut config = discover_all();
        config.signal.rssi_window = 0;
        let fields = field_errors(config.validate_with_env(None).unwrap_err());
        assert_eq!(fields, vec!["signal.rssi_window"]);
    }

    #[test]
    fn test_invalid_target_rejected() {
        let mut config = ScanConfig::default();
        config.scan.target = Some("AA:BB:CC".into());
        let fields = field_errors(config.validate_with_env(None).unwrap_err());
        assert_eq!(fields, vec!["scan.target"]);
    }

    #[test]
    fn test_irk_and_target_exclusive() {
        let mut config = ScanConfig::default();
        config.scan.irks = vec![IRK.into()];
        config.scan.target = Some("AA:BB:CC:DD:EE:FF".into());
        let fields = field_errors(config.validate_with_env(None).unwrap_err());
        assert!(fields.contains(&"scan.target".to_string()));

        // The environment key counts as an IRK source.
        let mut config = ScanConfig::default();
        config.scan.target = Some("AA:BB:CC:DD:EE:FF".into());
        assert!(config.validate_with_env(Some(IRK)).is_err());
        assert!(config.validate_with_env(None).is_ok());
    }

    #[test]
    fn test_errors_are_collected() {
        let mut config = ScanConfig::default();
        config.signal.rssi_window = 0;
        config.signal.alert_within = Some(-1.0);
        config.gps.port = 0;
        config.scan.adapters = vec!["hci0".into(), "  ".into()];
        let fields = field_errors(config.validate_with_env(None).unwrap_err());
        for expected in [
            "signal.rssi_window",
            "signal.alert_within",
            "gps.port",
            "scan.adapters",
            "scan.mode",
        ] {
            assert!(fields.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn test_mode_must_agree() {
        let mut config = ScanConfig::default();
        config.scan.mode = Some(ModeName::Irk);
        assert!(config.validate_with_env(None).is_err());
        assert!(config.validate_with_env(Some(IRK)).is_ok());

        let mut config = discover_all();
        config.scan.irks = vec![IRK.into()];
        assert!(config.validate_with_env(None).is_err());
    }

    #[test]
    fn test_mode_resolution() {
        let mut config = ScanConfig::default();
        config.scan.irks = vec![IRK.into()];
        let settings = config.engine_settings_with_env(None).unwrap();
        assert!(matches!(settings.aggregator.mode, ScanMode::Irk(ref r) if r.len() == 1));
        assert_eq!(settings.timeout, None);

        let mut config = ScanConfig::default();
        config.scan.target = Some("aa:bb:cc:dd:ee:ff".into());
        let settings = config.engine_settings_with_env(None).unwrap();
        assert!(matches!(settings.aggregator.mode, ScanMode::Targeted(ref t) if t == "AA:BB:CC:DD:EE:FF"));
        assert_eq!(settings.timeout, Some(DEFAULT_TIMEOUT));

        let settings = discover_all().engine_settings_with_env(None).unwrap();
        assert!(matches!(settings.aggregator.mode, ScanMode::DiscoverAll));

        let settings = ScanConfig::default().engine_settings_with_env(Some(IRK)).unwrap();
        assert!(matches!(settings.aggregator.mode, ScanMode::Irk(_)));
    }

    #[test]
    fn test_timeout_override() {
        let mut config = discover_all();
        config.scan.timeout_secs = Some(2.5);
        let settings = config.engine_settings_with_env(None).unwrap();
        assert_eq!(settings.timeout, Some(Duration::from_millis(2500)));
    }

    #[test]
    fn test_oversized_timeout_rejected() {
        let mut config = discover_all();
        config.scan.timeout_secs = Some(1e30);
        let fields = field_errors(config.validate_with_env(None).unwrap_err());
        assert_eq!(fields, vec!["scan.timeout_secs".to_string()]);
        let fields = field_errors(config.engine_settings_with_env(None).unwrap_err());
        assert_eq!(fields, vec!["scan.timeout_secs".to_string()]);
    }

    #[test]
    fn test_bad_inline_irk() {
        let mut config = ScanConfig::default();
        config.scan.irks = vec!["deadbeef".into()];
        assert!(matches!(
            config.engine_settings_with_env(None),
            Err(ConfigError::Irk(IrkError::WrongLength(8)))
        ));
    }

    #[test]
    fn test_irk_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# phone").unwrap();
        writeln!(file, "{IRK}").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "0x{}", IRK.to_uppercase()).unwrap();

        let mut config = ScanConfig::default();
        config.scan.irk_file = Some(file.path().to_path_buf());
        assert_eq!(config.load_irks(None).unwrap().len(), 2);
    }

    #[test]
    fn test_empty_irk_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# nothing here").unwrap();
        let mut config = ScanConfig::default();
        config.scan.irk_file = Some(file.path().to_path_buf());
        assert!(matches!(
            config.load_irks(None),
            Err(ConfigError::EmptyIrkFile(_))
        ));
    }

    #[test]
    fn test_irk_file_reports_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{IRK}").unwrap();
        writeln!(file, "not-a-key").unwrap();
        let mut config = ScanConfig::default();
        config.scan.irk_file = Some(file.path().to_path_buf());
        let err = config.load_irks(None).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_missing_irk_file() {
        let mut config = ScanConfig::default();
        config.scan.irk_file = Some(PathBuf::from("/nonexistent/btrpa/irks.txt"));
        assert!(matches!(
            config.load_irks(None),
            Err(ConfigError::ReadError { .. })
        ));
    }
}
