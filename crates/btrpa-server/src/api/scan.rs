//! Scan API endpoints.
//!
//! Read-only views of the running engine, plus an idempotent stop.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use btrpa_core::{Address, AddressKind, DeviceState, StatusSnapshot, Summary};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Creates the scan router with all endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/status", get(get_status))
        .route("/summary", get(get_summary))
        .route("/devices/{address}", get(get_device))
        .route("/scan/stop", post(stop_scan))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Engine status response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    /// Scan session identifier.
    pub session_id: Uuid,

    /// When the server started (RFC 3339).
    #[schema(example = "2025-01-15T03:30:00Z")]
    pub started_at_utc: String,

    /// Latest engine snapshot.
    pub status: StatusSnapshot,
}

/// Response after requesting a stop.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StopResponse {
    /// `true` if this request stopped a running scan, `false` if it had
    /// already stopped.
    #[schema(example = true)]
    pub stopped: bool,

    /// Final scan summary.
    pub summary: Summary,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get the current engine status.
#[utoipa::path(
    get,
    path = "/api/status",
    tag = "scan",
    operation_id = "getStatus",
    summary = "Get scan status",
    description = "Returns elapsed time, detection totals, whether the scan \
        is still running, and the latest GPS fix.",
    responses(
        (status = 200, description = "Status retrieved", body = StatusResponse)
    )
)]
pub async fn get_status(State(state): State<SharedState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        session_id: state.engine.session_id(),
        started_at_utc: state.started_at.to_rfc3339(),
        status: state.engine.status().await,
    })
}

/// Get the scan summary.
#[utoipa::path(
    get,
    path = "/api/summary",
    tag = "scan",
    operation_id = "getSummary",
    summary = "Get scan summary",
    description = "Returns totals so far. Once the scan has stopped this is \
        the final summary.",
    responses(
        (status = 200, description = "Summary retrieved", body = Summary)
    )
)]
pub async fn get_summary(State(state): State<SharedState>) -> Json<Summary> {
    Json(state.engine.summary().await)
}

/// Get tracked state for one address.
#[utoipa::path(
    get,
    path = "/api/devices/{address}",
    tag = "scan",
    operation_id = "getDevice",
    summary = "Get device state",
    description = "Returns detection counts, latest signal and best known \
        position for one address.",
    params(
        ("address" = String, Path, description = "Device MAC address", example = "5A:1B:2C:3D:4E:5F")
    ),
    responses(
        (status = 200, description = "Device found", body = DeviceState),
        (status = 400, description = "Address is malformed", body = super::error::ErrorResponse),
        (status = 404, description = "Address has not been seen", body = super::error::ErrorResponse)
    )
)]
pub async fn get_device(
    State(state): State<SharedState>,
    Path(address): Path<String>,
) -> ApiResult<Json<DeviceState>> {
    let key = match AddressKind::classify(&address) {
        AddressKind::Malformed => return Err(ApiError::InvalidAddress(address)),
        AddressKind::PlatformOpaque => address,
        AddressKind::Resolvable | AddressKind::NonResolvable => Address::parse(&address)
            .map_or(address, |parsed| parsed.to_string()),
    };

    state
        .engine
        .device(&key)
        .await
        .map(Json)
        .ok_or(ApiError::DeviceNotFound(key))
}

/// Stop the scan.
#[utoipa::path(
    post,
    path = "/api/scan/stop",
    tag = "scan",
    operation_id = "stopScan",
    summary = "Stop scanning",
    description = "Stops all adapters, drains pending detections and returns \
        the final summary. Calling it again returns the same summary.",
    responses(
        (status = 200, description = "Scan stopped", body = StopResponse)
    )
)]
pub async fn stop_scan(State(state): State<SharedState>) -> Json<StopResponse> {
    let was_running = state.engine.is_running();
    let summary = state.engine.stop().await;
    Json(StopResponse {
        stopped: was_running,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_response_serialization() {
        let response = StopResponse {
            stopped: true,
            summary: Summary {
                session_id: Uuid::nil(),
                elapsed_secs: 1.5,
                total_detections: 3,
                unique_addresses: 2,
                resolved_count: 0,
                resolved_addresses: Vec::new(),
                per_address_counts: std::collections::BTreeMap::new(),
                best_known_positions: std::collections::BTreeMap::new(),
                unresolvable_identifiers: 0,
            },
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"stopped\":true"));
        assert!(json.contains("\"total_detections\":3"));
    }
}
