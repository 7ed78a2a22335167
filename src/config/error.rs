//! Failures while reading or checking settings.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// A setting that parsed but is out of range.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Required configuration missing: {0}")]
    MissingRequired(&'static str),

    #[error("Invalid port number")]
    InvalidPort,

    #[error("Invalid socket address: {0}")]
    InvalidSocketAddr(String),

    #[error("Invalid Redis URL format")]
    InvalidRedisUrl,

    #[error("Channel prefix must be non-empty and contain no whitespace")]
    InvalidChannelPrefix,

    #[error("Breaker failure threshold must be at least 1")]
    InvalidFailureThreshold,

    #[error("Backoff factor must be at least 1.0")]
    InvalidBackoffFactor,

    #[error("Initial retry delay exceeds maximum retry delay")]
    InvalidRetryDelays,

    #[error("Monthly budget must be a finite, non-negative amount")]
    InvalidBudget,

    #[error("Alert threshold must be between 1 and 100 percent")]
    InvalidAlertThreshold,

    #[error("Unknown service kind in unit rates: {0}")]
    UnknownServiceKind(String),

    #[error("Unit rate for {0} must be a finite, non-negative amount")]
    InvalidUnitRate(String),

    #[error("Outbound buffer must hold at least one message")]
    InvalidOutboundBuffer,
}
