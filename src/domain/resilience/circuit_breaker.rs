//! Per-dependency circuit breaker.
//!
//! ## States
//!
//! - **Closed**: normal operation, calls flow through
//! - **Open**: too many recent failures, calls rejected without running
//! - **Half-Open**: reset timeout elapsed, one probe call allowed through
//!
//! ## Transitions
//!
//! ```text
//! Closed --[failure_threshold reached in window]--> Open
//! Open --[reset_timeout elapsed since last failure]--> Half-Open
//! Half-Open --[probe succeeds]--> Closed
//! Half-Open --[probe fails]--> Open
//! ```
//!
//! All state lives behind one mutex that is never held across an `.await`,
//! so every transition is atomic per breaker. A success racing a failure
//! resolves as last writer wins.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::domain::foundation::CancelSignal;

use super::errors::{BreakerError, FallbackReason, Served};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Check if the circuit lets calls through (subject to the probe slot).
    pub fn allows_requests(&self) -> bool {
        matches!(self, CircuitState::Closed | CircuitState::HalfOpen)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Failures within the monitoring window before the circuit opens.
    ///
    /// Default: 5 failures
    pub failure_threshold: u32,

    /// Time after the last failure before a probe is allowed.
    ///
    /// Default: 30 seconds
    pub reset_timeout: Duration,

    /// A failure older than this no longer counts toward the threshold.
    ///
    /// Default: 120 seconds
    pub monitoring_window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            monitoring_window: Duration::from_secs(120),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(
        failure_threshold: u32,
        reset_timeout: Duration,
        monitoring_window: Duration,
    ) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
            monitoring_window,
        }
    }
}

/// Point-in-time view of a breaker for telemetry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,

    /// Total successful calls since creation
    pub total_successes: u64,

    /// Total failed calls since creation
    pub total_failures: u64,

    /// Calls refused while open or while a probe was in flight
    pub total_rejections: u64,

    /// Times the circuit has opened
    pub times_opened: u64,

    /// Failures counted toward the threshold right now
    pub current_failures: u32,

    /// Time until a probe is allowed (when open)
    pub time_until_half_open: Option<Duration>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    probe_in_flight: bool,
    total_successes: u64,
    total_failures: u64,
    total_rejections: u64,
    times_opened: u64,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_at: None,
            probe_in_flight: false,
            total_successes: 0,
            total_failures: 0,
            total_rejections: 0,
            times_opened: 0,
        }
    }

    fn remaining_open_time(&self, reset_timeout: Duration, now: Instant) -> Duration {
        match self.last_failure_at {
            Some(at) => reset_timeout.saturating_sub(now.saturating_duration_since(at)),
            None => Duration::ZERO,
        }
    }
}

/// Refusal produced by the admission check.
struct Rejected {
    retry_after: Duration,
}

/// Admission to run one call. A probe permit dropped without completing
/// (the caller was cancelled) frees the probe slot and records nothing.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
}

impl Permit<'_> {
    fn complete(mut self, success: bool) {
        self.probe = false;
        if success {
            self.breaker.record_success();
        } else {
            self.breaker.record_failure();
        }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.probe {
            self.breaker.lock().probe_in_flight = false;
        }
    }
}

/// A named circuit breaker guarding one external dependency.
///
/// Obtain shared instances through [`BreakerRegistry`](super::BreakerRegistry)
/// so every call site for the same dependency sees the same state.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState::closed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state. An open circuit whose reset timeout has elapsed still
    /// reports `Open` until the next call moves it to half-open.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Runs `operation` under the breaker.
    ///
    /// When the circuit is open the operation is never invoked and
    /// [`BreakerError::Open`] is returned.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run(operation, None).await
    }

    /// Like [`execute`](Self::execute), but gives up as soon as `cancel`
    /// fires. A cancelled call is not counted as a failure.
    pub async fn execute_cancellable<T, E, F, Fut>(
        &self,
        cancel: &CancelSignal,
        operation: F,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run(operation, Some(cancel)).await
    }

    /// Runs `operation`, substituting `fallback` when the circuit refuses the
    /// call or the operation fails. The failure is still recorded.
    ///
    /// Only an error from the fallback itself is returned as `Err`.
    pub async fn execute_with_fallback<T, E, F, Fut, G, GFut>(
        &self,
        operation: F,
        fallback: G,
    ) -> Result<Served<T>, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        G: FnOnce(FallbackReason) -> GFut,
        GFut: Future<Output = Result<T, E>>,
    {
        let reason = match self.run(operation, None).await {
            Ok(value) => return Ok(Served::Primary(value)),
            Err(BreakerError::Open { .. }) => FallbackReason::CircuitOpen,
            Err(BreakerError::Inner(_)) => FallbackReason::OperationFailed,
            Err(BreakerError::Cancelled) => return Err(BreakerError::Cancelled),
        };

        tracing::warn!(breaker = %self.name, reason = ?reason, "serving fallback");
        fallback(reason)
            .await
            .map(Served::Fallback)
            .map_err(BreakerError::Inner)
    }

    /// Forces the breaker back to closed with no recorded failures.
    pub fn reset(&self) {
        let mut state = self.lock();
        if state.state != CircuitState::Closed {
            tracing::info!(breaker = %self.name, from = state.state.as_str(), "circuit reset");
        }
        state.state = CircuitState::Closed;
        state.failure_count = 0;
        state.last_failure_at = None;
        state.probe_in_flight = false;
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let state = self.lock();
        let time_until_half_open = (state.state == CircuitState::Open)
            .then(|| state.remaining_open_time(self.config.reset_timeout, Instant::now()));

        CircuitBreakerMetrics {
            state: state.state,
            total_successes: state.total_successes,
            total_failures: state.total_failures,
            total_rejections: state.total_rejections,
            times_opened: state.times_opened,
            current_failures: state.failure_count,
            time_until_half_open,
        }
    }

    async fn run<T, E, F, Fut>(
        &self,
        operation: F,
        cancel: Option<&CancelSignal>,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if cancel.is_some_and(CancelSignal::is_cancelled) {
            return Err(BreakerError::Cancelled);
        }

        let permit = self.admit().map_err(|rejected| BreakerError::Open {
            name: self.name.clone(),
            retry_after: rejected.retry_after,
        })?;

        let result = match cancel {
            Some(signal) => tokio::select! {
                biased;
                _ = signal.cancelled() => return Err(BreakerError::Cancelled),
                result = operation() => result,
            },
            None => operation().await,
        };

        permit.complete(result.is_ok());
        result.map_err(BreakerError::Inner)
    }

    fn admit(&self) -> Result<Permit<'_>, Rejected> {
        let mut state = self.lock();
        let now = Instant::now();

        match state.state {
            CircuitState::Closed => Ok(Permit {
                breaker: self,
                probe: false,
            }),
            CircuitState::Open => {
                let remaining = state.remaining_open_time(self.config.reset_timeout, now);
                if !remaining.is_zero() {
                    state.total_rejections += 1;
                    return Err(Rejected {
                        retry_after: remaining,
                    });
                }
                tracing::info!(breaker = %self.name, "circuit half-open, probing");
                state.state = CircuitState::HalfOpen;
                state.probe_in_flight = true;
                Ok(Permit {
                    breaker: self,
                    probe: true,
                })
            }
            CircuitState::HalfOpen => {
                if state.probe_in_flight {
                    state.total_rejections += 1;
                    return Err(Rejected {
                        retry_after: Duration::ZERO,
                    });
                }
                state.probe_in_flight = true;
                Ok(Permit {
                    breaker: self,
                    probe: true,
                })
            }
        }
    }

    fn record_success(&self) {
        let mut state = self.lock();
        state.total_successes += 1;
        state.probe_in_flight = false;
        state.failure_count = 0;
        if state.state != CircuitState::Closed {
            tracing::info!(breaker = %self.name, from = state.state.as_str(), "circuit closed");
            state.state = CircuitState::Closed;
        }
    }

    fn record_failure(&self) {
        let mut state = self.lock();
        let now = Instant::now();

        state.total_failures += 1;
        state.probe_in_flight = false;

        let within_window = state
            .last_failure_at
            .is_some_and(|at| now.saturating_duration_since(at) <= self.config.monitoring_window);
        state.failure_count = if within_window {
            state.failure_count.saturating_add(1)
        } else {
            1
        };
        state.last_failure_at = Some(now);

        let should_open = match state.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => state.failure_count >= self.config.failure_threshold,
            CircuitState::Open => false,
        };

        if should_open {
            state.state = CircuitState::Open;
            state.times_opened += 1;
            tracing::warn!(
                breaker = %self.name,
                failures = state.failure_count,
                reset_timeout_ms = self.config.reset_timeout.as_millis() as u64,
                "circuit opened"
            );
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
