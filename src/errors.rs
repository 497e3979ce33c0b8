//! Error handling for the Flametree telemetry core
//!
//! Logging and retention failures are contained locally and never surface
//! through this type; the variants here cover the paths that do propagate to
//! callers (data-file writes, log export, request handling).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Main error type for the telemetry core
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("I/O operation failed: {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization failed: {context}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Malformed log line: {reason}")]
    MalformedLogLine { reason: String },

    #[error("Invalid request: {message}")]
    BadRequest { message: String },

    #[error("Too many requests: {message}")]
    RateLimited { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Type alias for Result with TelemetryError
pub type TelemetryResult<T> = Result<T, TelemetryError>;

impl TelemetryError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an I/O error
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Create a serialization error
    pub fn serialization(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            context: context.into(),
            source,
        }
    }

    /// Create a malformed log line error
    pub fn malformed_line(reason: impl Into<String>) -> Self {
        Self::MalformedLogLine {
            reason: reason.into(),
        }
    }

    /// Create a bad request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// Create a rate-limit rejection
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

#[derive(Serialize)]
struct ErrBody {
    error: String,
}

impl IntoResponse for TelemetryError {
    fn into_response(self) -> Response {
        let status = match self {
            TelemetryError::Config { .. }
            | TelemetryError::BadRequest { .. }
            | TelemetryError::MalformedLogLine { .. } => StatusCode::BAD_REQUEST,
            TelemetryError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            TelemetryError::Io { .. }
            | TelemetryError::Serialization { .. }
            | TelemetryError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (
            status,
            Json(ErrBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<std::io::Error> for TelemetryError {
    fn from(err: std::io::Error) -> Self {
        TelemetryError::io("io_operation", err)
    }
}

impl From<serde_json::Error> for TelemetryError {
    fn from(err: serde_json::Error) -> Self {
        TelemetryError::serialization("json_operation", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let config_err = TelemetryError::config("missing log directory");
        assert!(config_err.to_string().contains("Configuration error"));

        let limited = TelemetryError::rate_limited("cap exceeded");
        assert!(limited.to_string().contains("Too many requests"));
    }

    #[test]
    fn test_error_chaining() {
        use std::error::Error;

        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = TelemetryError::io("reading data file", io_err);

        assert!(err.source().is_some());
        assert!(err.to_string().contains("I/O operation failed"));
    }

    #[test]
    fn test_status_mapping() {
        let res = TelemetryError::rate_limited("slow down").into_response();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);

        let res = TelemetryError::bad_request("missing action").into_response();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let io_err = std::io::Error::other("disk full");
        let res = TelemetryError::io("write", io_err).into_response();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
