//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, delays ordered, deadline > 0)
//! - Check downstream URLs and the metrics address
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: LinkConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;
use url::Url;

use crate::config::schema::LinkConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: String },

    #[error("retry.base_delay_ms ({base}) exceeds retry.max_delay_ms ({max})")]
    DelayOrder { base: u64, max: u64 },

    #[error("downstreams.{name}.base_url is invalid: {reason}")]
    BaseUrl { name: String, reason: String },

    #[error("observability.metrics_address {0:?} is not a socket address")]
    MetricsAddress(String),

    #[error("observability.log_level {0:?} is not a valid filter")]
    LogLevel(String),
}

pub fn validate_config(config: &LinkConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let zero = |field: &str| ValidationError::Zero { field: field.to_string() };

    if config.breaker.failure_threshold == 0 {
        errors.push(zero("breaker.failure_threshold"));
    }
    if config.retry.max_attempts == 0 {
        errors.push(zero("retry.max_attempts"));
    }
    if config.retry.max_delay_ms == 0 {
        errors.push(zero("retry.max_delay_ms"));
    }
    if config.retry.base_delay_ms > config.retry.max_delay_ms {
        errors.push(ValidationError::DelayOrder {
            base: config.retry.base_delay_ms,
            max: config.retry.max_delay_ms,
        });
    }
    if config.deadline.per_call_ms == 0 {
        errors.push(zero("deadline.per_call_ms"));
    }

    for (name, downstream) in &config.downstreams {
        if downstream.failure_threshold == Some(0) {
            errors.push(zero(&format!("downstreams.{}.failure_threshold", name)));
        }
        if downstream.max_body_bytes == 0 {
            errors.push(zero(&format!("downstreams.{}.max_body_bytes", name)));
        }
        if let Err(reason) = check_base_url(&downstream.base_url) {
            errors.push(ValidationError::BaseUrl {
                name: name.clone(),
                reason,
            });
        }
    }

    let observability = &config.observability;
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::MetricsAddress(observability.metrics_address.clone()));
    }
    if observability.log_level.parse::<tracing_subscriber::EnvFilter>().is_err() {
        errors.push(ValidationError::LogLevel(observability.log_level.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_base_url(raw: &str) -> Result<(), String> {
    let url = Url::parse(raw).map_err(|e| e.to_string())?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(format!("unsupported scheme {:?}", other)),
    }
    if url.host_str().is_none() {
        return Err("missing host".to_string());
    }
    Ok(())
}
