//! Retry executor with exponential backoff and jitter.
//!
//! Delays are `tokio::time::sleep`, so a waiting retry never blocks the
//! worker thread. Attempt 1 runs immediately; attempt `n + 1` waits
//! `min(initial_delay * factor^(n-1), max_delay)` with ±20% jitter.

use std::error::Error;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::domain::foundation::CancelSignal;

use super::errors::RetryError;

/// Fraction of the computed delay added or removed at random.
pub const JITTER_RATIO: f64 = 0.2;

/// Decides whether an error is worth another attempt.
pub type RetryPredicate = Arc<dyn Fn(&(dyn Error + 'static)) -> bool + Send + Sync>;

/// Called before each wait with the error, the attempt that failed and the
/// delay about to be slept.
pub type RetryObserver = Arc<dyn Fn(&(dyn Error + 'static), u32, Duration) + Send + Sync>;

/// How a call site retries. Cheap to clone.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    retryable: Option<RetryPredicate>,
    observer: Option<RetryObserver>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            retryable: None,
            observer: None,
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_factor", &self.backoff_factor)
            .field("custom_predicate", &self.retryable.is_some())
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl RetryPolicy {
    pub fn new(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_factor: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            backoff_factor: backoff_factor.max(1.0),
            retryable: None,
            observer: None,
        }
    }

    /// Policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Replace the default transient-failure predicate.
    pub fn with_predicate(
        mut self,
        predicate: impl Fn(&(dyn Error + 'static)) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.retryable = Some(Arc::new(predicate));
        self
    }

    pub fn with_observer(
        mut self,
        observer: impl Fn(&(dyn Error + 'static), u32, Duration) + Send + Sync + 'static,
    ) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn is_retryable(&self, error: &(dyn Error + 'static)) -> bool {
        match &self.retryable {
            Some(predicate) => predicate(error),
            None => is_transient(error),
        }
    }

    /// Delay before the retry following failed attempt `attempt` (1-based),
    /// without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.backoff_factor.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// [`base_delay`](Self::base_delay) with ±20% jitter applied.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let spread = rand::thread_rng().gen_range(-JITTER_RATIO..=JITTER_RATIO);
        self.base_delay(attempt).mul_f64(1.0 + spread)
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// exceeds `policy.max_retries`.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, operation: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Error + 'static,
{
    run(policy, None, operation).await
}

/// Like [`retry`], but stops as soon as `cancel` fires, dropping any
/// in-flight attempt and skipping remaining waits.
pub async fn retry_cancellable<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancelSignal,
    operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Error + 'static,
{
    run(policy, Some(cancel), operation).await
}

async fn run<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: Option<&CancelSignal>,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Error + 'static,
{
    let mut attempts: u32 = 0;

    loop {
        if cancel.is_some_and(CancelSignal::is_cancelled) {
            return Err(RetryError::Cancelled { attempts });
        }
        attempts += 1;

        let outcome = match cancel {
            Some(signal) => tokio::select! {
                biased;
                _ = signal.cancelled() => return Err(RetryError::Cancelled { attempts }),
                outcome = operation() => outcome,
            },
            None => operation().await,
        };

        let error = match outcome {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if !policy.is_retryable(&error) {
            return Err(RetryError::NonRetryable { attempts, error });
        }
        if attempts > policy.max_retries {
            tracing::debug!(attempts, error = %error, "retries exhausted");
            return Err(RetryError::Exhausted {
                attempts,
                last: error,
            });
        }

        let delay = policy.jittered_delay(attempts);
        if let Some(observer) = &policy.observer {
            observer(&error, attempts, delay);
        }
        tracing::debug!(
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "retrying after failure"
        );

        match cancel {
            Some(signal) => tokio::select! {
                biased;
                _ = signal.cancelled() => return Err(RetryError::Cancelled { attempts }),
                _ = tokio::time::sleep(delay) => {}
            },
            None => tokio::time::sleep(delay).await,
        }
    }
}

const TRANSIENT_PHRASES: &[&str] = &[
    "timeout",
    "timed out",
    "connection",
    "network",
    "econnreset",
    "econnrefused",
    "socket hang up",
    "temporarily unavailable",
    "service unavailable",
    "bad gateway",
    "rate limit",
    "too many requests",
    "throttl",
];

/// Default retryable predicate: matches timeout, connection, network,
/// HTTP 5xx and throttling signatures anywhere in the error's source chain.
pub fn is_transient(error: &(dyn Error + 'static)) -> bool {
    let mut current = Some(error);
    while let Some(err) = current {
        if message_is_transient(&err.to_string()) {
            return true;
        }
        current = err.source();
    }
    false
}

fn message_is_transient(message: &str) -> bool {
    let lower = message.to_lowercase();
    if TRANSIENT_PHRASES.iter().any(|phrase| lower.contains(phrase)) {
        return true;
    }
    lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| {
            token.len() == 3 && token.starts_with('5') && token.bytes().all(|b| b.is_ascii_digit())
        })
}
