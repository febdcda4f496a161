//! Error types for the bridge
//!
//! All errors in the application are converted to `AppError`,
//! which implements `IntoResponse` for proper HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Application-wide error type
#[derive(Debug, Error)]
pub enum AppError {
    /// Resource not found (404)
    #[error("Resource not found")]
    NotFound,

    /// Authentication required (401)
    #[error("Authentication required")]
    Unauthorized,

    /// Validation error (400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unprocessable entity (422)
    #[error("Unprocessable entity: {0}")]
    Unprocessable(String),

    /// Database error (500)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP client error (502)
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Federation error (502)
    #[error("Federation error: {0}")]
    Federation(String),

    /// Request signing failed (500)
    #[error("Signing error: {0}")]
    Signing(String),

    /// Redis error (500)
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    /// Convert error to HTTP response
    ///
    /// Maps each error variant to appropriate HTTP status code and a plain
    /// text body. Internal details are logged but never leaked in bodies.
    fn into_response(self) -> Response {
        let (status, message, error_type, should_log_detail) = match &self {
            AppError::NotFound => (StatusCode::NOT_FOUND, self.to_string(), "not_found", false),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                self.to_string(),
                "unauthorized",
                false,
            ),
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, msg.clone(), "validation", false)
            }
            AppError::Unprocessable(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                msg.clone(),
                "unprocessable",
                false,
            ),
            AppError::Federation(_) => (
                StatusCode::BAD_GATEWAY,
                "Federation error".to_string(),
                "federation",
                true,
            ),
            AppError::HttpClient(_) => (
                StatusCode::BAD_GATEWAY,
                "Upstream HTTP error".to_string(),
                "http_client",
                true,
            ),
            AppError::Signing(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Signing error".to_string(),
                "signing",
                true,
            ),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error".to_string(),
                "database",
                true,
            ),
            AppError::Redis(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Stream bus error".to_string(),
                "redis",
                true,
            ),
            AppError::Config(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Configuration error".to_string(),
                "config",
                true,
            ),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                "internal",
                true,
            ),
        };

        if should_log_detail {
            tracing::error!(error = %self, %error_type, "Request failed with internal details");
        }

        use crate::metrics::ERRORS_TOTAL;
        ERRORS_TOTAL.with_label_values(&[error_type]).inc();

        (status, message).into_response()
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
