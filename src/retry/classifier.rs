//! Error classification.
//!
//! Turns a raw [`ApiGuardError`] into an [`ErrorRecord`] whose [`ErrorKind`]
//! alone decides whether the call may be retried.
//!
//! # Rules
//!
//! Checked in this order:
//!
//! | Failure | Kind | Retryable |
//! |---------|------|-----------|
//! | timed out | `Timeout` | yes |
//! | connection not established | `ConnectionFailure` | yes |
//! | HTTP 401 | `AuthenticationError` | no |
//! | HTTP 404 | `NotFound` | no |
//! | HTTP 429 | `RateLimited` (from `Retry-After`, default 60s) | yes |
//! | HTTP 408, 500, 502, 503, 504 | `HttpError` | yes |
//! | other HTTP status | `HttpError` | no |
//! | request rejected before sending | `ValidationError` | no |
//! | anything else | `Unknown` | no |

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;

use crate::error::ApiGuardError;

/// Retry hint used when a 429 response has no usable `Retry-After` header.
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Status codes worth retrying.
const RETRYABLE_STATUS: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// What went wrong, independent of the concrete error type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    ConnectionFailure,
    HttpError { status: u16 },
    AuthenticationError,
    NotFound,
    RateLimited { retry_after_secs: u64 },
    ValidationError,
    Unknown,
}

impl ErrorKind {
    /// Whether an operation failing this way may succeed if attempted again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::ConnectionFailure | Self::RateLimited { .. } => true,
            Self::HttpError { status } => RETRYABLE_STATUS.contains(status),
            Self::AuthenticationError | Self::NotFound | Self::ValidationError | Self::Unknown => {
                false
            }
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::ConnectionFailure => write!(f, "connection failure"),
            Self::HttpError { status } => write!(f, "HTTP error {status}"),
            Self::AuthenticationError => write!(f, "authentication error"),
            Self::NotFound => write!(f, "not found"),
            Self::RateLimited { retry_after_secs } => {
                write!(f, "rate limited (retry after {retry_after_secs}s)")
            }
            Self::ValidationError => write!(f, "validation error"),
            Self::Unknown => write!(f, "unknown error"),
        }
    }
}

/// A classified failure of one operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    /// Name of the operation that failed
    pub operation: String,
    /// Message of the underlying error
    pub message: String,
    pub retryable: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub observed_at: OffsetDateTime,
}

impl ErrorRecord {
    /// Create a record, deriving `retryable` from the kind.
    pub fn new(kind: ErrorKind, operation: impl Into<String>, message: impl Into<String>) -> Self {
        let retryable = kind.is_retryable();
        Self {
            kind,
            operation: operation.into(),
            message: message.into(),
            retryable,
            observed_at: OffsetDateTime::now_utc(),
        }
    }

    /// Server-provided wait time for rate limited failures.
    pub fn retry_after(&self) -> Option<Duration> {
        match self.kind {
            ErrorKind::RateLimited { retry_after_secs } => {
                Some(Duration::from_secs(retry_after_secs))
            }
            _ => None,
        }
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.operation, self.kind, self.message)
    }
}

/// Whether the classified failure may be retried.
///
/// Depends only on the record's kind, never on the original error.
pub fn is_retryable(record: &ErrorRecord) -> bool {
    record.kind.is_retryable()
}

/// Classify a failure raised while running `operation`.
pub fn classify(error: &ApiGuardError, operation: &str) -> ErrorRecord {
    ErrorRecord::new(classify_kind(error), operation, error.to_string())
}

fn classify_kind(error: &ApiGuardError) -> ErrorKind {
    if error.is_timeout() {
        return ErrorKind::Timeout;
    }
    if error.is_connection() {
        return ErrorKind::ConnectionFailure;
    }
    if let Some(status) = error.status() {
        return match status {
            401 => ErrorKind::AuthenticationError,
            404 => ErrorKind::NotFound,
            429 => ErrorKind::RateLimited {
                retry_after_secs: retry_after_secs(error),
            },
            status => ErrorKind::HttpError { status },
        };
    }
    match error {
        ApiGuardError::Validation(_) => ErrorKind::ValidationError,
        _ => ErrorKind::Unknown,
    }
}

fn retry_after_secs(error: &ApiGuardError) -> u64 {
    match error {
        ApiGuardError::Status {
            retry_after: Some(value),
            ..
        } => parse_retry_after(value),
        _ => DEFAULT_RETRY_AFTER_SECS,
    }
}

/// Parse a `Retry-After` header given in seconds.
///
/// Falls back to [`DEFAULT_RETRY_AFTER_SECS`] when the value is not a
/// non-negative integer.
pub fn parse_retry_after(value: &str) -> u64 {
    match value.trim().parse::<u64>() {
        Ok(secs) => secs,
        Err(_) => {
            tracing::warn!(value, "Could not parse Retry-After header, using default");
            DEFAULT_RETRY_AFTER_SECS
        }
    }
}
