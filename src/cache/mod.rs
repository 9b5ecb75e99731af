//! Response caching.
//!
//! Successful read responses are cached under a key built from the operation
//! name and its sorted parameters. Entries expire after their TTL and the
//! least recently used entry is evicted once the cache is full.
//!
//! Expired entries are removed lazily when a lookup finds them, or in bulk
//! with [`ResponseCache::cleanup_expired`].

mod key;
mod response_cache;

pub use key::{Params, generate_key};
pub use response_cache::{CacheEntry, CacheStats, ResponseCache};
