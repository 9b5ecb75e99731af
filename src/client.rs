//! Guarded API client.
//!
//! [`GuardedClient`] wraps any [`Transport`] and runs every outbound call
//! through the resilience layer:
//!
//! 1. `GET` calls are answered from the response cache when possible.
//! 2. A token is taken from the rate limiter, waiting if the bucket is empty.
//! 3. The request runs under the [`RetryExecutor`].
//! 4. Successful `GET` responses are cached.
//!
//! The bucket, cache and metrics are each guarded by their own lock, which is
//! never held across a network call. Two callers missing the same key at the
//! same time both reach the remote API.
//!
//! # Example
//!
//! ```rust,no_run
//! use api_guard::client::GuardedClient;
//! use api_guard::config::ResilienceConfig;
//! use api_guard::transport::{HttpTransport, Method};
//! use api_guard::cache::Params;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = HttpTransport::builder()
//!         .base_url("https://api.example.com")
//!         .build()?;
//!     let client = GuardedClient::new(transport, ResilienceConfig::default())?;
//!
//!     let users = client
//!         .call("list_users", Method::GET, "/users", &Params::new(), None)
//!         .await?;
//!     println!("{users}");
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::cache::{CacheStats, Params, ResponseCache};
use crate::config::ResilienceConfig;
use crate::error::ApiGuardError;
use crate::metrics::{InMemoryMetrics, MetricsSink, MetricsSnapshot};
use crate::rate_limit::TokenBucket;
use crate::retry::{ErrorKind, ErrorRecord, RetryExecutor, RetryFailure};
use crate::transport::{Method, Transport};

/// A [`Transport`] wrapped with rate limiting, caching, retries and metrics.
pub struct GuardedClient<T> {
    transport: T,
    config: ResilienceConfig,
    bucket: Arc<Mutex<TokenBucket>>,
    rate_limit_enabled: Arc<AtomicBool>,
    cache: Arc<Mutex<ResponseCache<Value>>>,
    metrics: Arc<dyn MetricsSink>,
    retry: RetryExecutor,
}

impl<T> GuardedClient<T> {
    /// Create a client with in-memory metrics.
    pub fn new(transport: T, config: ResilienceConfig) -> Result<Self, ApiGuardError> {
        Self::builder(transport).config(config).build()
    }

    /// Create a client builder.
    pub fn builder(transport: T) -> GuardedClientBuilder<T> {
        GuardedClientBuilder::new(transport)
    }

    /// Get a reference to the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Get the configuration the client was built with.
    ///
    /// `enabled` is the initial setting; see [`rate_limit_enabled`](Self::rate_limit_enabled).
    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    /// Enable or disable rate limiting for this client and all of its clones.
    pub fn set_rate_limit_enabled(&self, enabled: bool) {
        self.rate_limit_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Whether rate limiting is currently applied.
    pub fn rate_limit_enabled(&self) -> bool {
        self.rate_limit_enabled.load(Ordering::Relaxed)
    }

    /// Try to take a rate limit token without waiting.
    pub async fn acquire(&self) -> bool {
        if !self.rate_limit_enabled() {
            return true;
        }
        self.bucket.lock().await.try_acquire()
    }

    /// Wait until a rate limit token is granted.
    ///
    /// Polls the bucket every `60 / requests_per_minute` seconds and never
    /// gives up on its own.
    pub async fn wait_for_token(&self) {
        if !self.rate_limit_enabled() {
            return;
        }

        loop {
            let mut bucket = self.bucket.lock().await;
            if bucket.try_acquire() {
                return;
            }
            let interval = bucket.retry_interval();
            drop(bucket);
            tokio::time::sleep(interval).await;
        }
    }

    /// Look up a cached response.
    pub async fn cache_get(&self, operation: &str, params: &Params) -> Option<Value> {
        self.cache.lock().await.get(operation, params).cloned()
    }

    /// Cache a response, using the configured TTL when `ttl` is `None`.
    pub async fn cache_set(&self, operation: &str, value: Value, ttl: Option<Duration>, params: &Params) {
        self.cache.lock().await.set(operation, value, ttl, params);
    }

    /// Drop one cached response. Returns whether it existed.
    pub async fn cache_invalidate(&self, operation: &str, params: &Params) -> bool {
        self.cache.lock().await.remove(operation, params).is_some()
    }

    /// Drop every cached response. Returns how many were removed.
    pub async fn cache_clear(&self) -> usize {
        self.cache.lock().await.clear()
    }

    /// Drop expired responses. Returns how many were removed.
    pub async fn cache_cleanup_expired(&self) -> usize {
        self.cache.lock().await.cleanup_expired()
    }

    /// Current cache statistics.
    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.lock().await.stats()
    }

    /// Run `operation` under the client's retry policy.
    pub async fn execute_with_retry<R, F, Fut>(&self, name: &str, operation: F) -> Result<R, RetryFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, ApiGuardError>>,
    {
        self.retry.run(name, operation).await
    }

    /// Current metrics.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Periodically remove expired cache entries in a background task.
    ///
    /// The task runs until the returned handle is aborted or the runtime
    /// shuts down. Must be called from within a tokio runtime.
    pub fn spawn_cache_janitor(&self, every: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(&self.cache);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = cache.lock().await.cleanup_expired();
                if removed > 0 {
                    tracing::debug!(removed, "removed expired cache entries");
                }
            }
        })
    }
}

impl<T: Transport> GuardedClient<T> {
    /// Call the remote API through the cache, rate limiter and retry executor.
    ///
    /// `params` go into the query string and the cache key; `body` is sent as
    /// JSON. Only `GET` responses are cached.
    pub async fn call(
        &self,
        operation: &str,
        method: Method,
        path: &str,
        params: &Params,
        body: Option<&Value>,
    ) -> Result<Value, RetryFailure> {
        let cacheable = method == Method::GET;

        if cacheable {
            if let Some(cached) = self.cache_get(operation, params).await {
                return Ok(cached);
            }
        }

        if !self.acquire().await {
            self.metrics.record_rate_limited();
            tracing::debug!(operation, "rate limit token unavailable, waiting");
            self.wait_for_token().await;
        }

        let transport = &self.transport;
        let response = self
            .retry
            .run(operation, move || {
                transport.perform_request(method.clone(), path, params, body)
            })
            .await?;

        if cacheable {
            self.cache_set(operation, response.body.clone(), None, params).await;
        }

        Ok(response.body)
    }

    /// Like [`call`](Self::call), giving up once `deadline` has passed.
    ///
    /// An abandoned call fails with a retryable `Timeout` and `attempts_made`
    /// of 0, because attempts still in flight are not counted.
    pub async fn call_with_timeout(
        &self,
        operation: &str,
        method: Method,
        path: &str,
        params: &Params,
        body: Option<&Value>,
        deadline: Duration,
    ) -> Result<Value, RetryFailure> {
        match tokio::time::timeout(deadline, self.call(operation, method, path, params, body)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(operation, deadline_ms = deadline.as_millis() as u64, "call abandoned");
                Err(RetryFailure {
                    error: ErrorRecord::new(
                        ErrorKind::Timeout,
                        operation,
                        format!("no response within {deadline:?}"),
                    ),
                    attempts_made: 0,
                    max_retries: self.retry.max_retries(),
                })
            }
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for GuardedClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedClient")
            .field("transport", &self.transport)
            .field("config", &self.config)
            .finish()
    }
}

impl<T: Clone> Clone for GuardedClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            config: self.config.clone(),
            bucket: self.bucket.clone(),
            rate_limit_enabled: self.rate_limit_enabled.clone(),
            cache: self.cache.clone(),
            metrics: self.metrics.clone(),
            retry: self.retry.clone(),
        }
    }
}

/// Builder for [`GuardedClient`].
pub struct GuardedClientBuilder<T> {
    transport: T,
    config: ResilienceConfig,
    metrics: Option<Arc<dyn MetricsSink>>,
}

impl<T> GuardedClientBuilder<T> {
    /// Create a new builder with the default configuration.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            config: ResilienceConfig::default(),
            metrics: None,
        }
    }

    /// Set the configuration.
    pub fn config(mut self, config: ResilienceConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the metrics sink. Defaults to [`InMemoryMetrics`].
    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<GuardedClient<T>, ApiGuardError> {
        let config = self.config;
        config.validate()?;

        let metrics = self
            .metrics
            .unwrap_or_else(|| Arc::new(InMemoryMetrics::new(config.metrics_window_size)));

        Ok(GuardedClient {
            transport: self.transport,
            bucket: Arc::new(Mutex::new(TokenBucket::new(
                config.requests_per_minute,
                config.burst_size,
            ))),
            rate_limit_enabled: Arc::new(AtomicBool::new(config.enabled)),
            cache: Arc::new(Mutex::new(ResponseCache::new(
                config.cache_max_size,
                config.cache_default_ttl,
            ))),
            retry: RetryExecutor::new(config.max_retries, config.base_delay, metrics.clone()),
            metrics,
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::NoopMetrics;
    use crate::transport::ApiResponse;
    use reqwest::header::HeaderMap;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays scripted outcomes, then succeeds with `{"ok": true}`.
    #[derive(Default)]
    struct ScriptedTransport {
        script: StdMutex<VecDeque<Result<Value, ApiGuardError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<Value, ApiGuardError>>) -> Self {
            Self {
                script: StdMutex::new(script.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Transport for ScriptedTransport {
        async fn perform_request(
            &self,
            _method: Method,
            _path: &str,
            _query: &Params,
            _body: Option<&Value>,
        ) -> Result<ApiResponse, ApiGuardError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Ok(json!({"ok": true})))
                .map(|body| ApiResponse {
                    status: 200,
                    headers: HeaderMap::new(),
                    body,
                })
        }
    }

    fn config() -> ResilienceConfig {
        ResilienceConfig {
            requests_per_minute: 60,
            burst_size: 2,
            cache_max_size: 2,
            cache_default_ttl: Duration::from_secs(300),
            max_retries: 2,
            base_delay: Duration::from_secs(1),
            metrics_window_size: 10,
            enabled: true,
        }
    }

    fn id(n: i64) -> Params {
        let mut params = Params::new();
        params.insert("id".into(), json!(n));
        params
    }

    fn client(script: Vec<Result<Value, ApiGuardError>>) -> GuardedClient<Arc<ScriptedTransport>> {
        GuardedClient::new(Arc::new(ScriptedTransport::new(script)), config()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_is_served_from_cache() {
        let client = client(vec![Ok(json!({"id": 1}))]);

        let first = client.call("get_x", Method::GET, "/x/1", &id(1), None).await.unwrap();
        let second = client.call("get_x", Method::GET, "/x/1", &id(1), None).await.unwrap();

        assert_eq!(first, json!({"id": 1}));
        assert_eq!(second, first);
        assert_eq!(client.transport().calls(), 1);

        let stats = client.cache_stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(client.metrics_snapshot().total_requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_bypass_cache() {
        let client = client(vec![]);
        let body = json!({"name": "n"});

        client.call("create_x", Method::POST, "/x", &Params::new(), Some(&body)).await.unwrap();
        client.call("create_x", Method::POST, "/x", &Params::new(), Some(&body)).await.unwrap();

        assert_eq!(client.transport().calls(), 2);
        assert_eq!(client.cache_stats().await.size, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_token_when_bucket_is_empty() {
        let client = client(vec![]);
        let started = tokio::time::Instant::now();

        for n in 0..3 {
            client.call("get_x", Method::GET, "/x", &id(n), None).await.unwrap();
        }

        // Third call had to wait for a refill
        assert!(started.elapsed() >= Duration::from_secs(1));
        let snapshot = client.metrics_snapshot();
        assert_eq!(snapshot.rate_limited_requests, 1);
        assert_eq!(snapshot.total_requests, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_rate_limit_always_grants() {
        let client = client(vec![]);
        client.set_rate_limit_enabled(false);

        for _ in 0..10 {
            assert!(client.acquire().await);
        }
        client.wait_for_token().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_switch_is_shared_by_clones() {
        let client = client(vec![]);
        let other = client.clone();

        other.set_rate_limit_enabled(false);
        assert!(!client.rate_limit_enabled());
        for _ in 0..5 {
            assert!(client.acquire().await);
        }

        client.set_rate_limit_enabled(true);
        assert!(other.rate_limit_enabled());
        // The bucket was not drawn from while disabled
        assert!(other.acquire().await);
        assert!(other.acquire().await);
        assert!(!client.acquire().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_retried_and_not_cached() {
        let client = client(vec![
            Err(ApiGuardError::Timeout),
            Err(ApiGuardError::Timeout),
            Err(ApiGuardError::Timeout),
        ]);

        let failure = client.call("get_x", Method::GET, "/x", &id(1), None).await.unwrap_err();

        assert_eq!(failure.attempts_made, 3);
        assert_eq!(failure.error.kind, ErrorKind::Timeout);
        assert_eq!(client.cache_stats().await.size, 0);
        assert_eq!(client.metrics_snapshot().failed_requests, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_with_timeout_abandons_slow_calls() {
        let client = client(vec![
            Err(ApiGuardError::Timeout),
            Err(ApiGuardError::Timeout),
        ]);

        // Backoff alone takes 1s + 2s
        let failure = client
            .call_with_timeout("get_x", Method::GET, "/x", &id(1), None, Duration::from_millis(1500))
            .await
            .unwrap_err();

        assert_eq!(failure.error.kind, ErrorKind::Timeout);
        assert!(failure.error.retryable);
        assert_eq!(failure.attempts_made, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_primitives() {
        let client = client(vec![]);

        client.cache_set("get_x", json!("A"), None, &id(1)).await;
        client.cache_set("get_x", json!("B"), None, &id(2)).await;
        client.cache_set("get_x", json!("C"), None, &id(3)).await;

        assert_eq!(client.cache_get("get_x", &id(1)).await, None);
        assert_eq!(client.cache_get("get_x", &id(2)).await, Some(json!("B")));
        assert_eq!(client.cache_get("get_x", &id(3)).await, Some(json!("C")));
        assert_eq!(client.cache_stats().await.evictions, 1);

        assert!(client.cache_invalidate("get_x", &id(2)).await);
        assert!(!client.cache_invalidate("get_x", &id(2)).await);
        assert_eq!(client.cache_clear().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_janitor_removes_expired_entries() {
        let client = client(vec![]);
        client
            .cache_set("get_x", json!(1), Some(Duration::from_secs(5)), &id(1))
            .await;

        let janitor = client.spawn_cache_janitor(Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(11)).await;

        assert_eq!(client.cache_stats().await.size, 0);
        janitor.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_metrics_sink() {
        let client = GuardedClient::builder(ScriptedTransport::default())
            .config(config())
            .metrics(Arc::new(NoopMetrics))
            .build()
            .unwrap();

        client.call("get_x", Method::GET, "/x", &id(1), None).await.unwrap();
        assert_eq!(client.metrics_snapshot().total_requests, 0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = ResilienceConfig {
            cache_max_size: 0,
            ..config()
        };
        assert!(GuardedClient::new(ScriptedTransport::default(), config).is_err());
    }
}
