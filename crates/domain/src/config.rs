//! Pipeline configuration
//!
//! Values only; loading from the environment or files lives in
//! `waypoint-infra::config`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BASE_DELAY_MS, DEFAULT_CACHE_EVICT_FRACTION, DEFAULT_CACHE_MAX_ENTRIES,
    DEFAULT_CACHE_SWEEP_INTERVAL_MS, DEFAULT_CACHE_TTL_MS, DEFAULT_JITTER_FRACTION,
    DEFAULT_MAX_DELAY_MS, DEFAULT_MAX_DEPTH, DEFAULT_MAX_REFRESH_ATTEMPTS, DEFAULT_MAX_RETRIES,
    DEFAULT_REFRESH_WINDOW_MS, DEFAULT_REQUEST_TIMEOUT_MS,
};

/// Tunables for the resilient request pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// First backoff delay
    #[serde(with = "duration_millis", rename = "base_delay_ms")]
    pub base_delay: Duration,
    /// Backoff cap (before jitter)
    #[serde(with = "duration_millis", rename = "max_delay_ms")]
    pub max_delay: Duration,
    /// Upper bound of the positive-only jitter as a fraction of the delay
    pub jitter_fraction: f64,
    /// Retries after the first attempt for transient failures
    pub max_retries: u32,
    /// Hard ceiling on transport attempts for a single call
    pub max_depth: u32,
    /// Refresh attempts allowed per refresh token inside `refresh_window`
    pub max_refresh_attempts: u32,
    #[serde(with = "duration_millis", rename = "refresh_window_ms")]
    pub refresh_window: Duration,
    #[serde(with = "duration_millis", rename = "cache_ttl_ms")]
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
    #[serde(with = "duration_millis", rename = "cache_sweep_interval_ms")]
    pub cache_sweep_interval: Duration,
    /// Share of the cache evicted when a write finds it full
    pub cache_evict_fraction: f64,
    #[serde(with = "duration_millis", rename = "request_timeout_ms")]
    pub request_timeout: Duration,
    /// Request headers (lower-case) that take part in the canonical key
    pub vary_headers: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            jitter_fraction: DEFAULT_JITTER_FRACTION,
            max_retries: DEFAULT_MAX_RETRIES,
            max_depth: DEFAULT_MAX_DEPTH,
            max_refresh_attempts: DEFAULT_MAX_REFRESH_ATTEMPTS,
            refresh_window: Duration::from_millis(DEFAULT_REFRESH_WINDOW_MS),
            cache_ttl: Duration::from_millis(DEFAULT_CACHE_TTL_MS),
            cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            cache_sweep_interval: Duration::from_millis(DEFAULT_CACHE_SWEEP_INTERVAL_MS),
            cache_evict_fraction: DEFAULT_CACHE_EVICT_FRACTION,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            vary_headers: vec!["accept".to_string(), "accept-language".to_string()],
        }
    }
}

impl PipelineConfig {
    /// Validate the configuration
    ///
    /// # Errors
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.base_delay.is_zero() {
            return Err("base_delay_ms must be greater than 0".to_string());
        }
        if self.max_delay < self.base_delay {
            return Err("max_delay_ms must not be below base_delay_ms".to_string());
        }
        if !(0.0..=1.0).contains(&self.jitter_fraction) {
            return Err("jitter_fraction must be within [0, 1]".to_string());
        }
        if self.max_depth == 0 {
            return Err("max_depth must be greater than 0".to_string());
        }
        if self.max_refresh_attempts == 0 {
            return Err("max_refresh_attempts must be greater than 0".to_string());
        }
        if self.cache_max_entries == 0 {
            return Err("cache_max_entries must be greater than 0".to_string());
        }
        if !(self.cache_evict_fraction > 0.0 && self.cache_evict_fraction <= 1.0) {
            return Err("cache_evict_fraction must be within (0, 1]".to_string());
        }
        if self.request_timeout.is_zero() {
            return Err("request_timeout_ms must be greater than 0".to_string());
        }
        if self.cache_sweep_interval.is_zero() {
            return Err("cache_sweep_interval_ms must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Serde helper storing a `Duration` as integer milliseconds
pub mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// `duration_millis` for optional fields
pub mod option_duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer
                .serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.base_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert!((config.jitter_fraction - 0.20).abs() < f64::EPSILON);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.max_depth, 10);
        assert_eq!(config.max_refresh_attempts, 2);
        assert_eq!(config.refresh_window, Duration::from_secs(60));
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
        assert_eq!(config.cache_max_entries, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{ "max_retries": 5, "cache_ttl_ms": 1000 }"#).unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.cache_ttl, Duration::from_millis(1000));
        assert_eq!(config.max_depth, 10);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let result = serde_json::from_str::<PipelineConfig>(r#"{ "max_retry": 5 }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_delays() {
        let config = PipelineConfig {
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(1),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_fractions() {
        let config = PipelineConfig { jitter_fraction: 1.5, ..Default::default() };
        assert!(config.validate().is_err());

        let config = PipelineConfig { cache_evict_fraction: 0.0, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_intervals() {
        let config = PipelineConfig { request_timeout: Duration::ZERO, ..Default::default() };
        assert!(config.validate().is_err());

        let config = PipelineConfig { cache_sweep_interval: Duration::ZERO, ..Default::default() };
        assert_eq!(
            config.validate().unwrap_err(),
            "cache_sweep_interval_ms must be greater than 0"
        );
    }
}
