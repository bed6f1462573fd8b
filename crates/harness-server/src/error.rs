//! Error handling for the axum server.
//! Maps `HarnessError` to appropriate HTTP status codes and JSON error bodies (spec.md §7).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use harness_core::HarnessError;
use serde_json::json;

/// Wrapper to convert `HarnessError` into an axum response.
pub struct AppError(HarnessError);

impl From<HarnessError> for AppError {
    fn from(e: HarnessError) -> Self {
        Self(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let kind = match &self.0 {
            HarnessError::NotFound(_) => "not_found",
            HarnessError::Unauthorized(_) => "unauthorized",
            HarnessError::Conflict(_) => "conflict",
            HarnessError::InvalidInput(_) => "invalid_input",
            HarnessError::ServiceUnavailable(_) => "service_unavailable",
            HarnessError::Internal(_) => "internal_error",
        };
        if matches!(self.0, HarnessError::Internal(_)) {
            tracing::error!(error = %self.0, "internal error");
        }

        let body = json!({
            "error": self.0.to_string(),
            "kind": kind,
            "code": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}
