//! # Error Handling
//!
//! This module defines the application error type and how it is converted to HTTP responses.
//!
//! ## Error Categories:
//! - **Request errors** (4xx): malformed uploads, oversized uploads, a play request
//!   while a session is already running
//! - **Server errors** (5xx): storage failures, configuration problems, anything else
//!
//! Playback failures never show up here: a session that cannot open its file or loses
//! the output device ends with a [`PlaybackOutcome`](crate::audio::engine::PlaybackOutcome) in its
//! report, and the service keeps accepting requests.

use actix_web::{HttpResponse, ResponseError};  // Web framework error handling
use actix_web::http::StatusCode;
use serde_json::json;                          // For creating JSON error responses
use std::fmt;                                  // For implementing Display trait

/// Custom error types for the application.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500)
/// - **BadRequest**: Client sent invalid data (400)
/// - **Conflict**: A playback session is already active (409)
/// - **PayloadTooLarge**: Upload exceeded the storage limit (413)
/// - **Storage**: The storage gateway failed to read or write (500)
/// - **ConfigError**: Configuration problems (500)
///
/// ## Usage Example:
/// ```rust
/// return Err(AppError::Conflict("Playback already in progress".to_string()));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Request collides with work already in progress
    Conflict(String),

    /// Upload body is larger than the configured limit
    PayloadTooLarge(String),

    /// Persistent storage could not be read or written
    Storage(String),

    /// Configuration file or environment variable problems
    ConfigError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::PayloadTooLarge(msg) => write!(f, "Payload too large: {}", msg),
            AppError::Storage(msg) => write!(f, "Storage error: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl AppError {
    /// HTTP status code, machine-readable type and message for this error.
    fn parts(&self) -> (StatusCode, &'static str, &str) {
        match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            AppError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", msg),
            AppError::Storage(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error", msg),
            AppError::ConfigError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg),
        }
    }
}

/// Converts errors into JSON HTTP responses.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "conflict",
///     "message": "Playback already in progress",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        self.parts().0
    }

    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = self.parts();

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Any `anyhow` error that reaches a handler becomes a 500.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Filesystem errors come from the storage gateway.
impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// A broken multipart body is the client's fault.
impl From<actix_multipart::MultipartError> for AppError {
    fn from(err: actix_multipart::MultipartError) -> Self {
        AppError::BadRequest(format!("Multipart error: {}", err))
    }
}

impl From<crate::audio::UploadError> for AppError {
    fn from(err: crate::audio::UploadError) -> Self {
        match err {
            crate::audio::UploadError::TooLarge { limit } => {
                AppError::PayloadTooLarge(format!("Upload exceeds the {} byte limit", limit))
            }
            crate::audio::UploadError::Io(e) => AppError::Storage(e.to_string()),
        }
    }
}

/// Type alias for Results that use our custom error type.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::Conflict("busy".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::PayloadTooLarge("big".into()).status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            AppError::Storage("disk".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::BadRequest("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_io_error_becomes_storage_error() {
        let err: AppError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, AppError::Storage(_)));
        assert!(err.to_string().starts_with("Storage error"));
    }

    #[test]
    fn test_every_variant_has_a_distinct_type() {
        let errors = [
            AppError::Internal("a".into()),
            AppError::BadRequest("a".into()),
            AppError::Conflict("a".into()),
            AppError::PayloadTooLarge("a".into()),
            AppError::Storage("a".into()),
            AppError::ConfigError("a".into()),
        ];
        let mut types: Vec<&str> = errors.iter().map(|e| e.parts().1).collect();
        types.sort_unstable();
        types.dedup();
        assert_eq!(types.len(), errors.len());
    }

    #[test]
    fn test_upload_limit_becomes_413() {
        let err: AppError = crate::audio::UploadError::TooLarge { limit: 10 }.into();
        assert_eq!(err.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
