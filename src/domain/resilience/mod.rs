//! Resilience primitives for calling unreliable dependencies.
//!
//! - [`CircuitBreaker`] - per-dependency failure tracking state machine
//! - [`BreakerRegistry`] - shares one breaker per dependency name
//! - [`retry`] / [`RetryPolicy`] - backoff with jitter around a single call
//!
//! The budget gate composes these as retry around breaker:
//!
//! ```text
//! retry(policy, || breaker.execute(operation))
//! ```

mod circuit_breaker;
mod errors;
mod registry;
mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState,
};
pub use errors::{BreakerError, FallbackReason, RetryError, Served};
pub use registry::BreakerRegistry;
pub use retry::{
    is_transient, retry, retry_cancellable, RetryObserver, RetryPolicy, RetryPredicate,
    JITTER_RATIO,
};
