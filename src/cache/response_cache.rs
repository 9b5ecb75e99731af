//! Response cache with per-entry TTL and least-recently-used eviction.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use api_guard::cache::{Params, ResponseCache};
//!
//! let mut cache: ResponseCache<String> = ResponseCache::new(2, Duration::from_secs(300));
//! let params = Params::new();
//!
//! cache.set("get_status", "ok".to_string(), None, &params);
//! assert_eq!(cache.get("get_status", &params), Some(&"ok".to_string()));
//! assert_eq!(cache.stats().hits, 1);
//! ```

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use super::key::{Params, generate_key};

/// A cached value with its key, insertion time and lifetime.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// Key the entry is stored under
    pub key: String,
    /// The cached payload
    pub value: V,
    /// When the entry was stored
    pub inserted_at: Instant,
    /// How long the entry stays fresh
    pub ttl: Duration,
    /// Position in the access order, higher is more recent
    last_access: u64,
}

impl<V> CacheEntry<V> {
    /// Create an entry stamped with the current time.
    pub fn new(key: impl Into<String>, value: V, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            value,
            inserted_at: Instant::now(),
            ttl,
            last_access: 0,
        }
    }

    /// Time since the entry was stored.
    pub fn age(&self) -> Duration {
        self.inserted_at.elapsed()
    }

    /// An entry is expired once its age strictly exceeds its TTL.
    pub fn is_expired(&self) -> bool {
        self.age() > self.ttl
    }
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    /// Number of stored entries, expired ones included
    pub size: usize,
    /// Maximum number of entries
    pub max_size: usize,
    /// Lookups that returned a fresh value
    pub hits: u64,
    /// Lookups that found nothing or an expired value
    pub misses: u64,
    /// `hits / (hits + misses)` as a percentage, 0 with no lookups
    pub hit_rate: f64,
    /// Entries removed to stay within `max_size`
    pub evictions: u64,
    /// Entries that are expired but have not been removed yet
    pub expired_entries: usize,
    /// Age of the oldest stored entry in seconds
    pub oldest_entry_age_secs: Option<f64>,
}

/// Bounded cache keyed by operation name and parameters.
///
/// Lookups go through the entry map. Every access stamps the entry with a new
/// sequence number; `access_order` maps sequence numbers back to keys, so the
/// least recently used entry is always its first element.
#[derive(Debug)]
pub struct ResponseCache<V> {
    entries: HashMap<String, CacheEntry<V>>,
    access_order: BTreeMap<u64, String>,
    next_access: u64,
    max_size: usize,
    default_ttl: Duration,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<V> ResponseCache<V> {
    /// Create an empty cache.
    ///
    /// `max_size` is clamped to at least 1.
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        let max_size = max_size.max(1);
        Self {
            entries: HashMap::with_capacity(max_size.min(1024)),
            access_order: BTreeMap::new(),
            next_access: 0,
            max_size,
            default_ttl,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Look up a fresh value.
    ///
    /// An expired entry is removed and counted as a miss. A hit moves the
    /// entry to the most recently used position.
    pub fn get(&mut self, operation: &str, params: &Params) -> Option<&V> {
        let key = generate_key(operation, params);

        let expired = match self.entries.get(&key) {
            None => {
                self.misses += 1;
                tracing::debug!(key = %key, "cache miss");
                return None;
            }
            Some(entry) => entry.is_expired(),
        };

        if expired {
            self.remove_key(&key);
            self.misses += 1;
            tracing::debug!(key = %key, "cache entry expired");
            return None;
        }

        self.touch(&key);
        self.hits += 1;
        tracing::debug!(key = %key, "cache hit");
        self.entries.get(&key).map(|entry| &entry.value)
    }

    /// Store a value, replacing any previous entry for the same key.
    ///
    /// Uses the default TTL when `ttl` is `None`. Least recently used entries
    /// are evicted until the cache is back within `max_size`.
    pub fn set(&mut self, operation: &str, value: V, ttl: Option<Duration>, params: &Params) {
        let key = generate_key(operation, params);
        let ttl = ttl.unwrap_or(self.default_ttl);

        if let Some(previous) = self.entries.remove(&key) {
            self.access_order.remove(&previous.last_access);
        }
        let mut entry = CacheEntry::new(key.as_str(), value, ttl);
        entry.last_access = self.next_stamp();
        self.access_order.insert(entry.last_access, key.clone());
        self.entries.insert(key, entry);

        while self.entries.len() > self.max_size {
            let Some((_, oldest)) = self.access_order.pop_first() else {
                break;
            };
            self.entries.remove(&oldest);
            self.evictions += 1;
            tracing::debug!(key = %oldest, "cache eviction");
        }
    }

    /// Remove the entry for an operation and parameters.
    ///
    /// Returns the value if one was stored, expired or not.
    pub fn remove(&mut self, operation: &str, params: &Params) -> Option<V> {
        let key = generate_key(operation, params);
        self.remove_key(&key)
    }

    /// Check for a fresh entry without touching its position or the counters.
    pub fn contains(&self, operation: &str, params: &Params) -> bool {
        self.entries
            .get(&generate_key(operation, params))
            .is_some_and(|entry| !entry.is_expired())
    }

    /// Remove every entry. Returns how many were removed.
    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        self.access_order.clear();
        removed
    }

    /// Remove all expired entries. Returns how many were removed.
    pub fn cleanup_expired(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        let entries = &self.entries;
        self.access_order.retain(|_, key| entries.contains_key(key));
        before - self.entries.len()
    }

    /// Current statistics.
    pub fn stats(&self) -> CacheStats {
        let lookups = self.hits + self.misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64 * 100.0
        };

        CacheStats {
            size: self.entries.len(),
            max_size: self.max_size,
            hits: self.hits,
            misses: self.misses,
            hit_rate,
            evictions: self.evictions,
            expired_entries: self.entries.values().filter(|e| e.is_expired()).count(),
            oldest_entry_age_secs: self
                .entries
                .values()
                .map(|e| e.age())
                .max()
                .map(|age| age.as_secs_f64()),
        }
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// TTL applied when `set` is called without one.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn next_stamp(&mut self) -> u64 {
        let stamp = self.next_access;
        self.next_access += 1;
        stamp
    }

    fn touch(&mut self, key: &str) {
        let stamp = self.next_stamp();
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        let order_key = self
            .access_order
            .remove(&entry.last_access)
            .unwrap_or_else(|| entry.key.clone());
        entry.last_access = stamp;
        self.access_order.insert(stamp, order_key);
    }

    fn remove_key(&mut self, key: &str) -> Option<V> {
        let entry = self.entries.remove(key)?;
        self.access_order.remove(&entry.last_access);
        Some(entry.value)
    }
}

impl<V> Default for ResponseCache<V> {
    fn default() -> Self {
        Self::new(1000, Duration::from_secs(300))
    }
}
