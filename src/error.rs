//! Error types for the api-guard library.

use thiserror::Error;

/// Failures raised while issuing a request or building the library's components.
///
/// These are the raw failures. The retry layer never hands them to callers
/// directly; it classifies them into an [`ErrorRecord`](crate::retry::ErrorRecord)
/// first.
#[derive(Error, Debug)]
pub enum ApiGuardError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// HTTP request with middleware failed
    #[error("HTTP request failed: {0}")]
    HttpMiddleware(#[from] reqwest_middleware::Error),

    /// The remote API answered with a non-success status code
    #[error("HTTP {status}: {body}")]
    Status {
        /// Response status code
        status: u16,
        /// Raw `Retry-After` header value, if the response carried one
        retry_after: Option<String>,
        /// Response body, for diagnostics
        body: String,
    },

    /// Request timeout
    #[error("Request timed out")]
    Timeout,

    /// The connection to the remote API could not be established
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The request was rejected before it was sent
    #[error("Invalid request: {0}")]
    Validation(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error
    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ApiGuardError {
    /// Status code carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            Self::HttpMiddleware(reqwest_middleware::Error::Reqwest(e)) => {
                e.status().map(|s| s.as_u16())
            }
            _ => None,
        }
    }

    /// Check if this error represents a timed out request.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout => true,
            Self::Http(e) => e.is_timeout(),
            Self::HttpMiddleware(reqwest_middleware::Error::Reqwest(e)) => e.is_timeout(),
            _ => false,
        }
    }

    /// Check if this error happened while establishing the connection.
    pub fn is_connection(&self) -> bool {
        match self {
            Self::Connection(_) => true,
            Self::Http(e) => e.is_connect(),
            Self::HttpMiddleware(reqwest_middleware::Error::Reqwest(e)) => e.is_connect(),
            _ => false,
        }
    }
}
