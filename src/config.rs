//! Configuration for the resilience layer.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ApiGuardError;

/// Settings for the token bucket, response cache, retries and metrics.
///
/// Durations are read as whole seconds (`cache_default_ttl`) and milliseconds
/// (`base_delay`) when deserialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Sustained request rate.
    pub requests_per_minute: u32,
    /// Maximum burst, i.e. the token bucket capacity.
    pub burst_size: u32,
    pub cache_max_size: usize,
    #[serde(with = "duration_secs")]
    pub cache_default_ttl: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,
    /// Number of response times kept for the average.
    pub metrics_window_size: usize,
    /// Whether to enforce the rate limit.
    pub enabled: bool,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            burst_size: 10,
            cache_max_size: 1000,
            cache_default_ttl: Duration::from_secs(300),
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            metrics_window_size: 100,
            enabled: true,
        }
    }
}

impl ResilienceConfig {
    /// Check that every limit is usable.
    pub fn validate(&self) -> Result<(), ApiGuardError> {
        let zero = [
            ("requests_per_minute", self.requests_per_minute == 0),
            ("burst_size", self.burst_size == 0),
            ("cache_max_size", self.cache_max_size == 0),
            ("metrics_window_size", self.metrics_window_size == 0),
        ];
        match zero.iter().find(|(_, is_zero)| *is_zero) {
            Some((field, _)) => Err(ApiGuardError::Config(format!("{field} must be at least 1"))),
            None => Ok(()),
        }
    }

    /// Build a configuration from `API_GUARD_*` environment variables.
    ///
    /// Unset variables keep their default. Reads:
    /// `API_GUARD_REQUESTS_PER_MINUTE`, `API_GUARD_BURST_SIZE`,
    /// `API_GUARD_CACHE_MAX_SIZE`, `API_GUARD_CACHE_TTL_SECS`,
    /// `API_GUARD_MAX_RETRIES`, `API_GUARD_BASE_DELAY_MS`,
    /// `API_GUARD_METRICS_WINDOW`, `API_GUARD_RATE_LIMIT_ENABLED`.
    pub fn from_env() -> Result<Self, ApiGuardError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ApiGuardError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_var(&lookup, "API_GUARD_REQUESTS_PER_MINUTE")? {
            config.requests_per_minute = v;
        }
        if let Some(v) = parse_var(&lookup, "API_GUARD_BURST_SIZE")? {
            config.burst_size = v;
        }
        if let Some(v) = parse_var(&lookup, "API_GUARD_CACHE_MAX_SIZE")? {
            config.cache_max_size = v;
        }
        if let Some(v) = parse_var(&lookup, "API_GUARD_CACHE_TTL_SECS")? {
            config.cache_default_ttl = Duration::from_secs(v);
        }
        if let Some(v) = parse_var(&lookup, "API_GUARD_MAX_RETRIES")? {
            config.max_retries = v;
        }
        if let Some(v) = parse_var(&lookup, "API_GUARD_BASE_DELAY_MS")? {
            config.base_delay = Duration::from_millis(v);
        }
        if let Some(v) = parse_var(&lookup, "API_GUARD_METRICS_WINDOW")? {
            config.metrics_window_size = v;
        }
        if let Some(v) = parse_var(&lookup, "API_GUARD_RATE_LIMIT_ENABLED")? {
            config.enabled = v;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>, ApiGuardError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| ApiGuardError::Config(format!("invalid value for {name}: {raw:?}")))
        })
        .transpose()
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
