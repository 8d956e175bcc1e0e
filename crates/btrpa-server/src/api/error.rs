//! API error responses.
//!
//! The scan API is read-only, so the only client errors are a malformed
//! address and an address that has not been seen.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors returned by scan handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// 400: the path does not hold a Bluetooth address.
    InvalidAddress(String),
    /// 404: no detections have been recorded for this address.
    DeviceNotFound(String),
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidAddress(_) => StatusCode::BAD_REQUEST,
            Self::DeviceNotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    /// Machine-readable code placed in [`ErrorResponse::error`].
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidAddress(_) => "invalid_address",
            Self::DeviceNotFound(_) => "device_not_found",
        }
    }
}

/// JSON error body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "device_not_found",
    "message": "No detections for AA:BB:CC:DD:EE:FF"
}))]
pub struct ErrorResponse {
    /// Machine-readable error code.
    #[schema(example = "device_not_found")]
    pub error: String,

    /// Human-readable error message.
    #[schema(example = "No detections for AA:BB:CC:DD:EE:FF")]
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.code().to_string(),
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidAddress(raw) => write!(f, "'{raw}' is not a Bluetooth address"),
            Self::DeviceNotFound(address) => write!(f, "No detections for {address}"),
        }
    }
}

impl std::error::Error for ApiError {}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn test_not_found_body() {
        let response = ApiError::DeviceNotFound("AA:BB:CC:DD:EE:FF".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(body.error, "device_not_found");
        assert_eq!(body.message, "No detections for AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_invalid_address() {
        let err = ApiError::InvalidAddress("nope".into());
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "invalid_address");
        assert!(err.to_string().contains("'nope'"));
    }
}
