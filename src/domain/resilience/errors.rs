//! Error and outcome types shared by the breaker and the retry executor.

use std::time::Duration;
use thiserror::Error;

/// Failure of a call made through a [`CircuitBreaker`](super::CircuitBreaker).
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The breaker refused the call without invoking the operation.
    #[error("circuit breaker '{name}' is open (retry in {retry_after:?})")]
    Open { name: String, retry_after: Duration },

    /// The caller cancelled before the operation finished.
    #[error("call cancelled")]
    Cancelled,

    /// The operation itself failed.
    #[error(transparent)]
    Inner(E),
}

impl<E> BreakerError<E> {
    /// Returns the operation's own error, if that is what failed.
    pub fn into_inner(self) -> Option<E> {
        match self {
            BreakerError::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// True when the breaker refused the call.
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }
}

/// Failure of a call made through [`retry`](super::retry).
///
/// Always carries the last real error from the operation, never a generic
/// "retries exhausted" message.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: E,
    },

    #[error("non-retryable failure on attempt {attempts}: {error}")]
    NonRetryable {
        attempts: u32,
        #[source]
        error: E,
    },

    #[error("cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

impl<E> RetryError<E> {
    /// Number of times the operation was invoked.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. }
            | RetryError::NonRetryable { attempts, .. }
            | RetryError::Cancelled { attempts } => *attempts,
        }
    }

    /// The last error the operation returned, if any.
    pub fn into_last_error(self) -> Option<E> {
        match self {
            RetryError::Exhausted { last, .. } => Some(last),
            RetryError::NonRetryable { error, .. } => Some(error),
            RetryError::Cancelled { .. } => None,
        }
    }
}

/// Why a fallback was invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// The breaker was open and refused the call.
    CircuitOpen,
    /// The operation ran and failed.
    OperationFailed,
}

/// A successful result, tagged with whether the primary operation or a
/// fallback produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Served<T> {
    Primary(T),
    Fallback(T),
}

impl<T> Served<T> {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Served::Fallback(_))
    }

    pub fn value(&self) -> &T {
        match self {
            Served::Primary(v) | Served::Fallback(v) => v,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            Served::Primary(v) | Served::Fallback(v) => v,
        }
    }

    /// Maps the value, keeping the tag.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Served<U> {
        match self {
            Served::Primary(v) => Served::Primary(f(v)),
            Served::Fallback(v) => Served::Fallback(f(v)),
        }
    }
}
