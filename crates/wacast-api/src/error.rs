//! Error responses

use axum::{http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tracing::error;
use wacast_common::Error;

/// Error response body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    /// Error kind, e.g. `validation` or `conflict`
    pub error: String,
    /// Machine readable code
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// Error half of every handler result
pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Map a domain error to its HTTP response
pub fn error_response(e: Error) -> ApiError {
    let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!(kind = e.kind(), error = %e, "Request failed");
    }

    (
        status,
        Json(ErrorResponse {
            error: e.kind().to_string(),
            code: e.code().to_string(),
            message: e.to_string(),
            field: e.field().map(str::to_string),
        }),
    )
}
