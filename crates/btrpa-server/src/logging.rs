//! Logging setup.
//!
//! Every detection record reaches the log through the core's `LogSink` as an
//! `info!` event, so the default filter keeps btrpa's crates at `info` and
//! holds HTTP request tracing back at `warn`. In production the same events
//! also go to a daily JSON file, one object per line.

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable selecting btrpa's log level when `RUST_LOG` is unset.
pub const LOG_LEVEL_ENV_VAR: &str = "BTRPA_LOG_LEVEL";

/// Environment variable switching on production logging.
pub const PRODUCTION_ENV_VAR: &str = "BTRPA_PRODUCTION";

/// File name prefix of the daily scan log.
const SCAN_LOG_PREFIX: &str = "scan.log";

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// `true` when `BTRPA_PRODUCTION` is set to `1` or `true`.
#[must_use]
pub fn is_production() -> bool {
    std::env::var(PRODUCTION_ENV_VAR)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true"))
        .unwrap_or(false)
}

/// Filter directives applying `level` to btrpa's crates.
///
/// Request tracing from `tower_http` only follows `level` at `debug` or
/// `trace`; per-request lines would otherwise drown out detections.
#[must_use]
pub fn filter_directives(level: &str) -> String {
    let level = level.trim().to_ascii_lowercase();
    let http = if matches!(level.as_str(), "debug" | "trace") {
        level.as_str()
    } else {
        "warn"
    };
    format!("warn,btrpa_core={level},btrpa_server={level},tower_http={http}")
}

/// Initialize logging. `RUST_LOG` overrides the btrpa defaults entirely.
///
/// # Errors
///
/// Returns an error if the filter cannot be parsed.
pub fn init(is_production: bool) -> anyhow::Result<()> {
    let level = std::env::var(LOG_LEVEL_ENV_VAR).unwrap_or_else(|_| "info".to_string());
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter_directives(&level)))?;

    // journald adds its own timestamps and does not render colour.
    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(false)
        .with_ansi(!is_production);

    let file_layer = is_production.then(|| {
        let log_dir = log_directory();
        std::fs::create_dir_all(&log_dir).ok();
        let appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, SCAN_LOG_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_writer(writer)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    Ok(())
}

fn log_directory() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/btrpa")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "btrpa")
            .map_or_else(|| PathBuf::from("./logs"), |dirs| dirs.data_dir().join("logs"))
    }
}
