//! Error types for the memo RAG service

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for memo RAG operations
pub type Result<T> = std::result::Result<T, Error>;

/// Service errors
///
/// The first six variants form the request-facing taxonomy; the `#[from]`
/// variants wrap lower-level failures and surface as internal or upstream errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed request (bad body shape, out-of-range question)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing or unusable caller identity
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Caller exceeded its request window
    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// A collaborator did not answer before its deadline
    #[error("{label} timed out after {timeout_ms}ms")]
    UpstreamTimeout { label: String, timeout_ms: u64 },

    /// A collaborator answered with an error or could not be reached
    #[error("{service} unavailable: {message}")]
    UpstreamUnavailable { service: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Anything unexpected
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// SQLite error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl Error {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create an unauthorized error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    /// Create an upstream-unavailable error for a named collaborator
    pub fn unavailable(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Create a deadline-expiry error for a labelled call
    pub fn timeout(label: impl Into<String>, timeout: Duration) -> Self {
        Self::UpstreamTimeout {
            label: label.into(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// True for a deadline expiry
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::UpstreamTimeout { .. })
    }

    /// HTTP status and machine-readable code for this error
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Error::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            Error::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Error::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            Error::UpstreamTimeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "upstream_timeout"),
            Error::UpstreamUnavailable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "upstream_unavailable")
            }
            Error::Http(_) => (StatusCode::BAD_GATEWAY, "upstream_unavailable"),
            Error::Config(_)
            | Error::Internal(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }

    /// Message safe to show to the caller
    ///
    /// Internal failures are logged in full but reported generically.
    pub fn public_message(&self) -> String {
        match self {
            Error::Config(_)
            | Error::Internal(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::Database(_) => "An unexpected error occurred".to_string(),
            Error::UpstreamTimeout { .. } => {
                "The assistant took too long to respond, please try again".to_string()
            }
            Error::UpstreamUnavailable { .. } | Error::Http(_) => {
                "The assistant is temporarily unavailable, please try again".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// JSON body for errors reported before a stream starts
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        if status.is_server_error() {
            tracing::error!(code, "Request failed: {}", self);
        } else {
            tracing::debug!(code, "Request rejected: {}", self);
        }

        let retry_after = match &self {
            Error::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };

        let body = ErrorBody {
            error: self.public_message(),
            code: Some(code),
            retry_after,
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
