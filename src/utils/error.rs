use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Application error type
#[derive(Debug)]
pub enum AppError {
    // Configuration errors
    ConfigError(String),
    ValidationError(String),

    // Storage errors
    StorageError(String),

    // Authentication errors
    Unauthorized(String),

    // Request errors
    BadRequest(String),
    NotFound(String),

    // External service errors
    UpstreamError(String),

    // Internal errors
    InternalError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            Self::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            Self::StorageError(msg) => write!(f, "Storage error: {}", msg),
            Self::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            Self::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            Self::NotFound(msg) => write!(f, "Not found: {}", msg),
            Self::UpstreamError(msg) => write!(f, "Upstream error: {}", msg),
            Self::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, error_type) = match &self {
            Self::ConfigError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                msg.clone(),
                "config_error",
            ),
            Self::ValidationError(msg) => (
                StatusCode::BAD_REQUEST,
                msg.clone(),
                "invalid_request_error",
            ),
            Self::StorageError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                msg.clone(),
                "storage_error",
            ),
            Self::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                msg.clone(),
                "authentication_error",
            ),
            Self::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                msg.clone(),
                "invalid_request_error",
            ),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone(), "not_found_error"),
            Self::UpstreamError(msg) => (StatusCode::BAD_GATEWAY, msg.clone(), "upstream_error"),
            Self::InternalError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                msg.clone(),
                "internal_server_error",
            ),
        };

        let body = Json(json!({
            "error": {
                "message": error_message,
                "type": error_type,
                "status": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}

// Conversion implementations for common error types
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::StorageError(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::UpstreamError(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        // Keep file I/O failures in the storage taxonomy
        if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
            return Self::StorageError(io_err.to_string());
        }
        Self::InternalError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::InternalError(format!("JSON serialization error: {}", err))
    }
}

/// Result type alias for application errors
pub type Result<T> = std::result::Result<T, AppError>;
