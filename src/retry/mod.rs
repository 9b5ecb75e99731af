//! Error classification and retries.
//!
//! Failures from the transport are classified into an [`ErrorRecord`]; the
//! [`RetryExecutor`] decides from the record's [`ErrorKind`] alone whether to
//! back off and try again or to hand a [`RetryFailure`] back to the caller.

mod classifier;
mod executor;

pub use classifier::{
    DEFAULT_RETRY_AFTER_SECS, ErrorKind, ErrorRecord, classify, is_retryable, parse_retry_after,
};
pub use executor::{RetryExecutor, RetryFailure, backoff_delay};
