//! Rate limiting for outbound API calls.
//!
//! Every request that misses the response cache must take a token from a
//! shared [`TokenBucket`] before it reaches the remote API. The bucket allows
//! bursts up to its capacity and refills at a steady per-minute rate.
//!
//! ## Example
//!
//! ```rust
//! use api_guard::rate_limit::TokenBucket;
//!
//! // 120 requests per minute, bursts of up to 10
//! let mut bucket = TokenBucket::new(120, 10);
//! assert!(bucket.try_acquire());
//! ```
//!
//! [`GuardedClient`](crate::client::GuardedClient) owns the bucket behind a
//! lock and provides the waiting variant.

mod token_bucket;

pub use token_bucket::TokenBucket;
