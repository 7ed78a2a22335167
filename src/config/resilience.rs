//! Circuit breaker and retry defaults

use serde::Deserialize;
use std::time::Duration;

use crate::domain::resilience::{CircuitBreakerConfig, RetryPolicy};

use super::error::ValidationError;

/// Defaults for every breaker the registry creates and for the gate's retry
/// policy.
#[derive(Debug, Clone, Deserialize)]
pub struct ResilienceConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_reset_timeout")]
    pub reset_timeout_secs: u64,

    #[serde(default = "default_monitoring_window")]
    pub monitoring_window_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

impl ResilienceConfig {
    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new(
            self.failure_threshold,
            Duration::from_secs(self.reset_timeout_secs),
            Duration::from_secs(self.monitoring_window_secs),
        )
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.backoff_factor,
        )
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.failure_threshold == 0 {
            return Err(ValidationError::InvalidFailureThreshold);
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(ValidationError::InvalidBackoffFactor);
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(ValidationError::InvalidRetryDelays);
        }
        Ok(())
    }
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_secs: default_reset_timeout(),
            monitoring_window_secs: default_monitoring_window(),
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout() -> u64 {
    30
}

fn default_monitoring_window() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay() -> u64 {
    1_000
}

fn default_max_delay() -> u64 {
    30_000
}

fn default_backoff_factor() -> f64 {
    2.0
}
