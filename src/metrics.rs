//! Request metrics.
//!
//! [`MetricsRecorder`] keeps monotonically increasing counters and a sliding
//! window of the most recent response times. Derived values (average response
//! time, success rate, uptime) are computed on every read.
//!
//! The retry executor and the client report through the [`MetricsSink`] trait,
//! so the sink is chosen once when the client is built.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Counters and a bounded window of response times.
#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    rate_limited_requests: u64,
    /// Most recent response times, oldest at the front
    response_times: VecDeque<Duration>,
    window_size: usize,
    start_time: Instant,
}

impl MetricsRecorder {
    /// Create a recorder keeping the last `window_size` response times.
    ///
    /// `window_size` is clamped to at least 1.
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            rate_limited_requests: 0,
            response_times: VecDeque::with_capacity(window_size),
            window_size,
            start_time: Instant::now(),
        }
    }

    /// Record one completed request attempt.
    pub fn record_request(&mut self, success: bool, response_time: Duration) {
        self.total_requests += 1;
        if success {
            self.successful_requests += 1;
        } else {
            self.failed_requests += 1;
        }

        if self.response_times.len() == self.window_size {
            self.response_times.pop_front();
        }
        self.response_times.push_back(response_time);
    }

    /// Record a request that was denied a rate limit token.
    pub fn record_rate_limited(&mut self) {
        self.rate_limited_requests += 1;
    }

    /// Mean of the response times in the window, zero when it is empty.
    pub fn average_response_time(&self) -> Duration {
        if self.response_times.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.response_times.iter().sum();
        total / self.response_times.len() as u32
    }

    /// Percentage of successful requests, 100 when nothing was recorded.
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            100.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64 * 100.0
        }
    }

    /// Time since the recorder was created.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Number of samples currently in the response time window.
    pub fn window_len(&self) -> usize {
        self.response_times.len()
    }

    /// Current counters and derived values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests,
            successful_requests: self.successful_requests,
            failed_requests: self.failed_requests,
            rate_limited_requests: self.rate_limited_requests,
            average_response_time_secs: self.average_response_time().as_secs_f64(),
            success_rate: self.success_rate(),
            uptime_secs: self.uptime().as_secs_f64(),
            window_samples: self.response_times.len(),
        }
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Point-in-time view of the metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub rate_limited_requests: u64,
    pub average_response_time_secs: f64,
    /// Percentage in `0.0..=100.0`
    pub success_rate: f64,
    pub uptime_secs: f64,
    /// Samples behind `average_response_time_secs`
    pub window_samples: usize,
}

impl Default for MetricsSnapshot {
    fn default() -> Self {
        MetricsRecorder::new(1).snapshot()
    }
}

/// Destination for request observations.
///
/// Implementations must be cheap to call; they are invoked once per attempt.
pub trait MetricsSink: Send + Sync {
    /// Record one completed request attempt.
    fn record_request(&self, success: bool, response_time: Duration);

    /// Record a request that had to wait for a rate limit token.
    fn record_rate_limited(&self);

    /// Current metrics.
    fn snapshot(&self) -> MetricsSnapshot;
}

/// In-process sink backed by a [`MetricsRecorder`].
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    recorder: Mutex<MetricsRecorder>,
}

impl InMemoryMetrics {
    /// Create a sink keeping the last `window_size` response times.
    pub fn new(window_size: usize) -> Self {
        Self {
            recorder: Mutex::new(MetricsRecorder::new(window_size)),
        }
    }

    fn with_recorder<R>(&self, f: impl FnOnce(&mut MetricsRecorder) -> R) -> R {
        // Counters stay valid even if a holder panicked.
        let mut recorder = self.recorder.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut recorder)
    }
}

impl MetricsSink for InMemoryMetrics {
    fn record_request(&self, success: bool, response_time: Duration) {
        self.with_recorder(|r| r.record_request(success, response_time));
    }

    fn record_rate_limited(&self) {
        self.with_recorder(|r| r.record_rate_limited());
    }

    fn snapshot(&self) -> MetricsSnapshot {
        self.with_recorder(|r| r.snapshot())
    }
}

/// Sink that discards every observation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_request(&self, _success: bool, _response_time: Duration) {}

    fn record_rate_limited(&self) {}

    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot::default()
    }
}
