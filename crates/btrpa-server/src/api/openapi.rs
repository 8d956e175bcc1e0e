//! OpenAPI specification generation for the btrpa API.

use axum::Json;
use btrpa_core::aggregator::DeviceState;
use btrpa_core::address::AddressKind;
use btrpa_core::gps::{BestFix, GpsFix};
use btrpa_core::types::{AddressCount, DetectionRecord, RecordKind, StatusSnapshot, Summary};
use utoipa::OpenApi;

use super::error::ErrorResponse;
use super::health::HealthResponse;
use super::scan::{StatusResponse, StopResponse};

/// Serve the OpenAPI specification as JSON at `/api/openapi.json`.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// The OpenAPI specification as pretty JSON. Used by the gen-openapi binary.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for btrpa.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "btrpa API",
        version = "0.1.0",
        description = r#"
# btrpa API

Status API for a running BLE scan.

The scanner listens for Bluetooth Low Energy advertisements, resolves
Resolvable Private Addresses against the configured Identity Resolving Keys
(or watches for a single target, or reports every device), and tags each
detection with signal strength, estimated distance and GPS position.

All endpoints are read-only views of the running scan except
`POST /api/scan/stop`, which is idempotent.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local btrpa server")
    ),
    tags(
        (
            name = "system",
            description = "Health checks"
        ),
        (
            name = "scan",
            description = "Scan status, totals, per-device state and stop"
        )
    ),
    paths(
        super::health::health_check,
        super::scan::get_status,
        super::scan::get_summary,
        super::scan::get_device,
        super::scan::stop_scan,
    ),
    components(
        schemas(
            // Error types
            ErrorResponse,
            // Health types
            HealthResponse,
            // Scan types
            StatusResponse,
            StopResponse,
            StatusSnapshot,
            Summary,
            AddressCount,
            DeviceState,
            DetectionRecord,
            RecordKind,
            AddressKind,
            GpsFix,
            BestFix,
        )
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_spec_generation() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "btrpa API");
        assert!(spec.paths.paths.contains_key("/api/scan/stop"));
        assert!(spec.paths.paths.contains_key("/api/devices/{address}"));
    }

    #[test]
    fn test_openapi_json_serialization() {
        let json = get_openapi_json().unwrap();
        assert!(json.contains("\"openapi\":"));
        assert!(json.contains("\"btrpa API\""));
    }
}
