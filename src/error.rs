//! # Error Handling
//!
//! This module defines custom error types and how they're converted to HTTP
//! responses.
//!
//! ## Error Categories:
//! - **Fatal pipeline errors**: `InsufficientData` and `MalformedSample`
//!   abort an analysis before any partial result exists and surface as
//!   4xx responses with enough context (session id, sample index) for the
//!   caller to fix the upload.
//! - **Infrastructure errors**: `Internal`, `ConfigError` (500s).
//! - **Request errors**: `BadRequest`, `NotFound`, `ValidationError` (4xx).
//!
//! Soft conditions (a degraded fallback model, a low-but-usable quality
//! score) are never errors. They travel inside the analysis response.
//!
//! ## Key Rust Concepts:
//! - **enum variants with data**: Each error kind carries its own context
//! - **From trait**: Automatic conversion from library error types via `?`
//! - **ResponseError trait**: Maps errors to JSON HTTP responses

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the application.
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors (worker pool failures, poisoned locks, etc.)
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested resource was not found
    NotFound(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// User input failed validation rules
    ValidationError(String),

    /// Recording too short or too sparse to segment into any epoch.
    /// Fatal: the request is rejected before feature extraction.
    InsufficientData {
        user_id: String,
        detail: String,
    },

    /// A sensor sample is structurally unusable: timestamp outside the
    /// session bounds or an audio band-count mismatch. Carries the
    /// offending sample index so the caller can locate it.
    MalformedSample {
        modality: &'static str,
        index: usize,
        detail: String,
    },
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::InsufficientData { user_id, detail } => {
                write!(f, "Insufficient data for user {}: {}", user_id, detail)
            }
            AppError::MalformedSample { modality, index, detail } => {
                write!(f, "Malformed {} sample at index {}: {}", modality, index, detail)
            }
        }
    }
}

/// Converts errors into the JSON error envelope all endpoints share.
///
/// ## HTTP Status Code Mapping:
/// - Internal/ConfigError → 500
/// - BadRequest/ValidationError → 400
/// - NotFound → 404
/// - InsufficientData/MalformedSample → 422 (the body parsed fine; the
///   sensor payload itself is unprocessable)
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "bad_request",
                msg.clone(),
            ),
            AppError::NotFound(msg) => (
                actix_web::http::StatusCode::NOT_FOUND,
                "not_found",
                msg.clone(),
            ),
            AppError::ConfigError(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                msg.clone(),
            ),
            AppError::ValidationError(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "validation_error",
                msg.clone(),
            ),
            AppError::InsufficientData { .. } => (
                actix_web::http::StatusCode::UNPROCESSABLE_ENTITY,
                "insufficient_data",
                self.to_string(),
            ),
            AppError::MalformedSample { .. } => (
                actix_web::http::StatusCode::UNPROCESSABLE_ENTITY,
                "malformed_sample",
                self.to_string(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Automatic conversion from anyhow::Error to AppError.
///
/// Used throughout the pipeline so `?` on anyhow results becomes a 500.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are almost always the client's fault, so they map
/// to 400 rather than 500.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

/// Configuration loading failures (missing files, bad syntax, failed
/// validation) are server-side problems.
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Type alias for Results that use our custom error type.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_sample_carries_index() {
        let err = AppError::MalformedSample {
            modality: "audio",
            index: 42,
            detail: "expected 8 frequency bands, got 6".to_string(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("index 42"));
        assert!(rendered.contains("audio"));
    }

    #[test]
    fn test_insufficient_data_names_the_user() {
        let err = AppError::InsufficientData {
            user_id: "user-7".to_string(),
            detail: "recording covers 1.5 h, minimum is 2.0 h".to_string(),
        };
        assert!(err.to_string().contains("user-7"));
    }
}
