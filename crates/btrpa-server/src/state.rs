//! Application state shared across handlers.

use std::sync::Arc;

use btrpa_core::ScanEngine;
use chrono::{DateTime, Utc};

/// Shared application state.
pub type SharedState = Arc<AppState>;

/// State visible to every handler. The engine handle is internally
/// synchronised, so no outer lock is needed.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The running scan.
    pub engine: ScanEngine,

    /// When the server started.
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Wrap an engine.
    #[must_use]
    pub fn new(engine: ScanEngine) -> Self {
        Self {
            engine,
            started_at: Utc::now(),
        }
    }

    /// Wrap an engine into [`SharedState`].
    #[must_use]
    pub fn shared(engine: ScanEngine) -> SharedState {
        Arc::new(Self::new(engine))
    }
}
