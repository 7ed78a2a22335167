//! Response bodies for the ops endpoints.

use std::collections::HashMap;

use serde::Serialize;

use crate::domain::resilience::CircuitBreakerMetrics;

/// Liveness plus a snapshot of local realtime load.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub instance_id: String,
    pub local_connections: usize,
    pub online_users: usize,
    pub rooms: usize,
}

/// One breaker as reported by the registry.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerResponse {
    pub name: String,
    pub state: &'static str,
    pub current_failures: u32,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
    pub times_opened: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl BreakerResponse {
    pub fn from_metrics(name: String, metrics: CircuitBreakerMetrics) -> Self {
        Self {
            name,
            state: metrics.state.as_str(),
            current_failures: metrics.current_failures,
            total_successes: metrics.total_successes,
            total_failures: metrics.total_failures,
            total_rejections: metrics.total_rejections,
            times_opened: metrics.times_opened,
            retry_after_ms: metrics
                .time_until_half_open
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        }
    }
}

/// Standard error body.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub error_code: String,
    pub message: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, String>,
}

impl ErrorResponse {
    pub fn new(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            message: message.into(),
            details: HashMap::new(),
        }
    }
}
