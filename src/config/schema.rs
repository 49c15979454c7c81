//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the call layer.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::resilience::backoff::BackoffPolicy;
use crate::resilience::circuit_breaker::BreakerSettings;

/// Root configuration for the inter-service call layer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct LinkConfig {
    /// Default circuit breaker thresholds.
    pub breaker: BreakerConfig,

    /// Retry loop settings.
    pub retry: RetryConfig,

    /// Per-call deadline.
    pub deadline: DeadlineConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Downstream services keyed by dependency name.
    pub downstreams: BTreeMap<String, DownstreamConfig>,
}

impl LinkConfig {
    pub fn downstream(&self, name: &str) -> Option<&DownstreamConfig> {
        self.downstreams.get(name)
    }
}

/// Circuit breaker defaults, applied to every dependency without overrides.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failed calls that open the circuit.
    pub failure_threshold: u32,

    /// Seconds the circuit stays open before a trial call.
    pub reset_timeout_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_secs: 30,
        }
    }
}

impl BreakerConfig {
    pub fn settings(&self) -> BreakerSettings {
        BreakerSettings {
            failure_threshold: self.failure_threshold,
            reset_timeout: Duration::from_secs(self.reset_timeout_secs),
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per call, including the first.
    pub max_attempts: u32,

    /// Delay before the second attempt, in milliseconds.
    pub base_delay_ms: u64,

    /// Upper bound for any single delay, in milliseconds.
    pub max_delay_ms: u64,

    /// Scale each delay by a random factor in [0.8, 1.2].
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
            jitter: false,
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
        .with_jitter(self.jitter)
    }
}

/// Deadline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeadlineConfig {
    /// Budget for a whole call, retries included, in milliseconds.
    pub per_call_ms: u64,
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self { per_call_ms: 5_000 }
    }
}

impl DeadlineConfig {
    pub fn per_call(&self) -> Duration {
        Duration::from_millis(self.per_call_ms)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// A downstream service the call layer talks to.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownstreamConfig {
    /// Scheme, host and port, e.g. "https://auth-server:8080".
    pub base_url: String,

    /// Overrides `breaker.failure_threshold` for this dependency.
    #[serde(default)]
    pub failure_threshold: Option<u32>,

    /// Overrides `breaker.reset_timeout_secs` for this dependency.
    #[serde(default)]
    pub reset_timeout_secs: Option<u64>,

    /// Accept self-signed TLS certificates.
    #[serde(default)]
    pub accept_invalid_certs: bool,

    /// Largest response body read from this dependency, in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

impl DownstreamConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            failure_threshold: None,
            reset_timeout_secs: None,
            accept_invalid_certs: false,
            max_body_bytes: default_max_body_bytes(),
        }
    }

    pub fn has_breaker_overrides(&self) -> bool {
        self.failure_threshold.is_some() || self.reset_timeout_secs.is_some()
    }

    /// Breaker settings for this dependency, falling back to `defaults`.
    pub fn breaker_settings(&self, defaults: BreakerSettings) -> BreakerSettings {
        BreakerSettings {
            failure_threshold: self.failure_threshold.unwrap_or(defaults.failure_threshold),
            reset_timeout: self
                .reset_timeout_secs
                .map_or(defaults.reset_timeout, Duration::from_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LinkConfig::default();
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.retry.max_attempts, 3);
        assert!(!config.retry.jitter);
        assert_eq!(config.deadline.per_call(), Duration::from_secs(5));
        assert_eq!(config.observability.log_format, LogFormat::Pretty);
        assert!(config.downstreams.is_empty());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: LinkConfig = toml::from_str(
            r#"
            [retry]
            max_attempts = 5

            [downstreams.auth]
            base_url = "https://auth-server:8080"
            failure_threshold = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 100);

        let auth = config.downstream("auth").unwrap();
        assert!(auth.has_breaker_overrides());
        let settings = auth.breaker_settings(config.breaker.settings());
        assert_eq!(settings.failure_threshold, 2);
        assert_eq!(settings.reset_timeout, Duration::from_secs(30));
        assert_eq!(auth.max_body_bytes, 1024 * 1024);
    }

    #[test]
    fn test_json_log_format() {
        let config: LinkConfig = toml::from_str("[observability]\nlog_format = \"json\"").unwrap();
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }
}
