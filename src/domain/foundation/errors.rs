//! Domain errors and their caller-facing codes.

use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Rejected input to an id or value constructor.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Field '{field}' cannot be empty")]
    EmptyField { field: String },

    #[error("Field '{field}' has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

impl ValidationError {
    pub fn empty_field(field: impl Into<String>) -> Self {
        ValidationError::EmptyField { field: field.into() }
    }

    pub fn invalid_format(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::InvalidFormat {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Caller-facing error codes.
///
/// Budget and breaker refusals carry distinct codes so the console can show
/// an actionable message instead of a generic failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Validation errors
    ValidationFailed,

    // Budget errors
    BudgetExceeded,
    ServiceDisabled,

    // Resilience errors
    CircuitOpen,
    RetryExhausted,
    NonRetryable,
    Cancelled,

    // Infrastructure errors
    BrokerUnavailable,
    LedgerUnavailable,
    DeliveryFailed,
    InternalError,
}

impl ErrorCode {
    /// Wire spelling, as carried in `error_code` fields and failed events.
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::BudgetExceeded => "BUDGET_EXCEEDED",
            ErrorCode::ServiceDisabled => "SERVICE_DISABLED",
            ErrorCode::CircuitOpen => "CIRCUIT_OPEN",
            ErrorCode::RetryExhausted => "RETRY_EXHAUSTED",
            ErrorCode::NonRetryable => "NON_RETRYABLE",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::BrokerUnavailable => "BROKER_UNAVAILABLE",
            ErrorCode::LedgerUnavailable => "LEDGER_UNAVAILABLE",
            ErrorCode::DeliveryFailed => "DELIVERY_FAILED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error crossing a port or leaving the crate.
///
/// `details` holds machine-readable context such as the breaker name or the
/// remaining budget; `message` is for people.
#[derive(Debug, Clone, Error)]
#[error("[{code}] {message}")]
pub struct DomainError {
    pub code: ErrorCode,
    pub message: String,
    pub details: HashMap<String, String>,
}

impl DomainError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: HashMap::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn detail(&self, key: &str) -> Option<&str> {
        self.details.get(key).map(String::as_str)
    }
}

impl From<ValidationError> for DomainError {
    fn from(err: ValidationError) -> Self {
        DomainError::new(ErrorCode::ValidationFailed, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_leads_with_the_wire_code() {
        let err = DomainError::new(ErrorCode::BudgetExceeded, "Monthly budget reached");
        assert_eq!(err.to_string(), "[BUDGET_EXCEEDED] Monthly budget reached");
    }

    #[test]
    fn details_are_looked_up_by_key() {
        let err = DomainError::new(ErrorCode::CircuitOpen, "Circuit open")
            .with_detail("breaker", "transcription")
            .with_detail("retry_after_ms", "1500");

        assert_eq!(err.detail("breaker"), Some("transcription"));
        assert_eq!(err.detail("retry_after_ms"), Some("1500"));
        assert_eq!(err.detail("tenant_id"), None);
    }

    #[test]
    fn validation_failures_keep_the_field_name() {
        let err: DomainError = ValidationError::invalid_format("room_id", "contains spaces").into();
        assert_eq!(err.code, ErrorCode::ValidationFailed);
        assert_eq!(
            err.message,
            "Field 'room_id' has invalid format: contains spaces"
        );
        assert_eq!(
            ValidationError::empty_field("tenant_id").to_string(),
            "Field 'tenant_id' cannot be empty"
        );
    }

    #[test]
    fn refusal_codes_are_spelled_apart() {
        assert_eq!(ErrorCode::CircuitOpen.as_str(), "CIRCUIT_OPEN");
        assert_eq!(ErrorCode::BudgetExceeded.to_string(), "BUDGET_EXCEEDED");
        assert_eq!(ErrorCode::ServiceDisabled.as_str(), "SERVICE_DISABLED");
    }
}
