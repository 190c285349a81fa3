//! API error types with HTTP response mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::OrderError;
use order_store::StoreError;

use crate::service::ServiceError;

/// API-level error type that maps to HTTP responses.
///
/// Every variant serializes as `{"error": "<message>"}` with its status
/// code.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// Resource not found.
    NotFound(String),
    /// The request conflicts with existing state.
    Conflict(String),
    /// The request body exceeded the size limit.
    PayloadTooLarge,
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::PayloadTooLarge => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "request body too large".to_string(),
            ),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, Json(body)).into_response()
    }
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ApiError::NotFound("not found".to_string()),
            StoreError::InvalidCursor => ApiError::BadRequest(err.to_string()),
            StoreError::Conflict(msg) => ApiError::Conflict(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Domain(err) => err.into(),
            ServiceError::Store(err) => err.into(),
            ServiceError::Serialization(err) => ApiError::Internal(err.to_string()),
        }
    }
}
