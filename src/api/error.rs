//! API error types and conversions

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::alerts::{AlertActionError, AlertLogError};
use crate::thresholds::ThresholdError;

/// API result type
pub type ApiResult<T> = Result<T, ApiError>;

/// API error types
#[derive(Debug)]
pub enum ApiError {
    /// Invalid request parameters
    InvalidRequest(String),

    /// Resource not found
    NotFound(String),

    /// Resource is not in a state that allows the operation
    Conflict(String),

    /// Operation not available on this server
    Unsupported(String),

    /// Internal server error
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Unsupported(msg) => (StatusCode::NOT_IMPLEMENTED, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<AlertActionError> for ApiError {
    fn from(err: AlertActionError) -> Self {
        match err {
            AlertActionError::NotFound(_) => ApiError::NotFound(err.to_string()),
            AlertActionError::InvalidState { .. } => ApiError::Conflict(err.to_string()),
        }
    }
}

impl From<ThresholdError> for ApiError {
    fn from(err: ThresholdError) -> Self {
        match err {
            ThresholdError::Io(_) => ApiError::Internal(err.to_string()),
            _ => ApiError::InvalidRequest(err.to_string()),
        }
    }
}

impl From<AlertLogError> for ApiError {
    fn from(err: AlertLogError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(format!("{err:#}"))
    }
}
