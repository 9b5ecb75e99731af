//! # api-guard
//!
//! A resilience layer for services that proxy calls to a remote REST API on
//! behalf of many concurrent callers.
//!
//! ## Features
//!
//! - Token bucket admission control with burst capacity
//! - TTL/LRU response cache keyed by operation and parameters
//! - Error classification with exponential backoff retries
//! - Request counters and a sliding response time window
//! - `reqwest` transport with tracing middleware
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use api_guard::cache::Params;
//! use api_guard::client::GuardedClient;
//! use api_guard::config::ResilienceConfig;
//! use api_guard::transport::{HttpTransport, Method};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = HttpTransport::builder()
//!         .base_url("https://api.example.com")
//!         .build()?;
//!     let client = GuardedClient::new(transport, ResilienceConfig::from_env()?)?;
//!
//!     let status = client
//!         .call("get_status", Method::GET, "/status", &Params::new(), None)
//!         .await?;
//!     println!("Status: {status}");
//!     println!("Metrics: {:?}", client.metrics_snapshot());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod rate_limit;
pub mod retry;
pub mod transport;

// Re-export commonly used types at crate root
pub use client::GuardedClient;
pub use config::ResilienceConfig;
pub use error::ApiGuardError;
pub use retry::{ErrorKind, ErrorRecord, RetryFailure};

/// Result type alias using ApiGuardError
pub type Result<T> = std::result::Result<T, ApiGuardError>;
