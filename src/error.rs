//! Common error types for the mesh gateway

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Invalid registration: {0}")]
    Validation(String),

    #[error("Invalid request body: {0}")]
    RequestBody(String),

    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("No healthy instances available for service: {0}")]
    ServiceNotAvailable(String),

    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    #[error("Backend instance {instance_id} unreachable: {reason}")]
    BackendUnreachable { instance_id: String, reason: String },

    #[error("Backend instance {instance_id} timed out")]
    Timeout { instance_id: String },

    #[error("Gateway is shutting down")]
    ShuttingDown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status this error surfaces as
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Config(_) | AppError::Io(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Json(_) | AppError::Validation(_) | AppError::RequestBody(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::HttpClient(_) | AppError::BackendUnreachable { .. } => StatusCode::BAD_GATEWAY,
            AppError::ServiceNotAvailable(_) | AppError::ShuttingDown => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::InstanceNotFound(_) => StatusCode::NOT_FOUND,
            AppError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Message exposed to callers. Upstream details stay in the logs.
    fn public_message(&self) -> String {
        match self {
            AppError::ServiceNotAvailable(_) => "Service not available".to_string(),
            AppError::BackendUnreachable { .. } | AppError::HttpClient(_) => {
                "Service request failed".to_string()
            }
            AppError::Timeout { .. } => "Service request timed out".to_string(),
            AppError::Config(_) | AppError::Io(_) | AppError::Internal(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.public_message(),
        });

        (self.status_code(), body).into_response()
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;
