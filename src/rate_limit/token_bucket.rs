//! Token bucket admission control.
//!
//! The bucket holds up to `capacity` tokens and refills continuously at
//! `requests_per_minute / 60` tokens per second. Refill is computed lazily from
//! the elapsed time on each call; there is no background timer.
//!
//! # Example
//!
//! ```rust
//! use api_guard::rate_limit::TokenBucket;
//!
//! let mut bucket = TokenBucket::new(60, 5);
//!
//! // The bucket starts full, so a burst of five is admitted.
//! for _ in 0..5 {
//!     assert!(bucket.try_acquire());
//! }
//! assert!(!bucket.try_acquire());
//! ```

use std::time::Duration;

use tokio::time::Instant;

/// Distance from an integer below which the token count is snapped to it.
const DRIFT_EPSILON: f64 = 1e-10;

/// Token bucket rate limiter.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Maximum burst size
    capacity: u32,
    /// Tokens added per second
    refill_rate: f64,
    /// Configured requests per minute
    requests_per_minute: u32,
    /// Current token count, always within `0..=capacity`
    tokens: f64,
    /// Last time tokens were refilled
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket.
    ///
    /// # Arguments
    ///
    /// * `requests_per_minute` - Sustained rate; clamped to at least 1
    /// * `burst_size` - Bucket capacity; clamped to at least 1
    pub fn new(requests_per_minute: u32, burst_size: u32) -> Self {
        let requests_per_minute = requests_per_minute.max(1);
        let capacity = burst_size.max(1);

        Self {
            capacity,
            refill_rate: f64::from(requests_per_minute) / 60.0,
            requests_per_minute,
            tokens: f64::from(capacity),
            last_refill: Instant::now(),
        }
    }

    /// Try to take one token without waiting.
    ///
    /// Returns `true` if a token was consumed.
    pub fn try_acquire(&mut self) -> bool {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            let rounded = self.tokens.round();
            if (self.tokens - rounded).abs() < DRIFT_EPSILON {
                self.tokens = rounded;
            }
            true
        } else {
            false
        }
    }

    /// Interval between attempts while waiting for a token (`60 / rpm` seconds).
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs_f64(60.0 / f64::from(self.requests_per_minute))
    }

    /// Time until the next token becomes available.
    ///
    /// Returns `None` if a token is available now.
    pub fn time_until_available(&mut self) -> Option<Duration> {
        self.refill();

        if self.tokens >= 1.0 {
            None
        } else {
            Some(Duration::from_secs_f64((1.0 - self.tokens) / self.refill_rate))
        }
    }

    /// Current token count after refilling.
    pub fn available_tokens(&mut self) -> f64 {
        self.refill();
        self.tokens
    }

    /// Maximum burst size.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Tokens added per second.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Refill the bucket to full capacity.
    pub fn reset(&mut self) {
        self.tokens = f64::from(self.capacity);
        self.last_refill = Instant::now();
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(f64::from(self.capacity));
        self.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_allows_burst_then_denies() {
        let mut bucket = TokenBucket::new(60, 5);

        for _ in 0..5 {
            assert!(bucket.try_acquire());
        }
        assert!(!bucket.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_is_capped_at_capacity() {
        let mut bucket = TokenBucket::new(60, 5);
        for _ in 0..5 {
            bucket.try_acquire();
        }
        assert_eq!(bucket.available_tokens(), 0.0);

        tokio::time::advance(Duration::from_secs(60)).await;

        // 60 tokens worth of refill, capped at the burst size
        assert_eq!(bucket.available_tokens(), 5.0);
        for _ in 0..5 {
            assert!(bucket.try_acquire());
        }
        assert!(!bucket.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_refill() {
        let mut bucket = TokenBucket::new(60, 2);
        bucket.try_acquire();
        bucket.try_acquire();
        assert!(!bucket.try_acquire());

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(!bucket.try_acquire());

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(bucket.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_consumed_count_snaps_to_whole_tokens() {
        // 7 rpm refills 7/600 of a token per 100ms step, which is not exact in f64
        let mut bucket = TokenBucket::new(7, 10);
        for _ in 0..10 {
            assert!(bucket.try_acquire());
        }

        for _ in 0..600 {
            tokio::time::advance(Duration::from_millis(100)).await;
            bucket.available_tokens();
        }

        assert!((bucket.available_tokens() - 7.0).abs() < 1e-9);
        assert!(bucket.try_acquire());
        assert_eq!(bucket.available_tokens(), 6.0);

        // A minute of refill admits exactly seven requests
        for _ in 0..6 {
            assert!(bucket.try_acquire());
        }
        assert_eq!(bucket.available_tokens(), 0.0);
        assert!(!bucket.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_refill_admits_capacity() {
        let mut bucket = TokenBucket::new(7, 3);
        for _ in 0..3 {
            bucket.try_acquire();
        }

        for _ in 0..300 {
            tokio::time::advance(Duration::from_millis(130)).await;
            bucket.available_tokens();
        }

        for _ in 0..3 {
            assert!(bucket.try_acquire());
        }
        assert!(!bucket.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokens_stay_within_bounds() {
        let mut bucket = TokenBucket::new(120, 3);
        let steps = [0u64, 10, 700, 3, 2500, 0, 0, 90_000, 1, 499];

        for (i, step) in steps.iter().cycle().take(200).enumerate() {
            tokio::time::advance(Duration::from_millis(*step)).await;
            if i % 3 != 0 {
                bucket.try_acquire();
            }
            let tokens = bucket.available_tokens();
            assert!((0.0..=3.0).contains(&tokens), "tokens out of bounds: {tokens}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_until_available() {
        let mut bucket = TokenBucket::new(60, 1);
        assert_eq!(bucket.time_until_available(), None);

        bucket.try_acquire();
        let wait = bucket.time_until_available().unwrap();
        assert!(wait <= Duration::from_secs(1));
        assert!(wait > Duration::from_millis(900));
    }

    #[test]
    fn test_retry_interval() {
        let bucket = TokenBucket::new(120, 10);
        assert_eq!(bucket.retry_interval(), Duration::from_millis(500));
        assert_eq!(bucket.refill_rate(), 2.0);
    }

    #[test]
    fn test_zero_settings_are_clamped() {
        let bucket = TokenBucket::new(0, 0);
        assert_eq!(bucket.capacity(), 1);
        assert_eq!(bucket.retry_interval(), Duration::from_secs(60));
    }
}
