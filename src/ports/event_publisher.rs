//! EventPublisher port - Interface for putting envelopes on the broker.
//!
//! Every instance subscribed to the envelope's channel receives it,
//! including the publishing instance itself.

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, ErrorCode};
use crate::domain::realtime::EventEnvelope;

/// Errors from the broker.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    /// Broker unreachable or rejected the command.
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// Envelope could not be encoded or decoded.
    #[error("envelope serialization failed: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        BrokerError::Serialization(err.to_string())
    }
}

impl From<BrokerError> for DomainError {
    fn from(err: BrokerError) -> Self {
        DomainError::new(ErrorCode::BrokerUnavailable, err.to_string())
    }
}

/// Port for publishing envelopes.
///
/// Callers on the real-time path treat publishing as fire-and-forget: an
/// error is logged and swallowed, never surfaced to the user action that
/// triggered it.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish one envelope on its channel.
    async fn publish(&self, envelope: EventEnvelope) -> Result<(), BrokerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time check that trait is object-safe
    #[allow(dead_code)]
    fn assert_object_safe(_: &dyn EventPublisher) {}

    #[test]
    fn broker_error_maps_to_broker_unavailable_code() {
        let err: DomainError = BrokerError::Unavailable("connection refused".into()).into();
        assert_eq!(err.code, ErrorCode::BrokerUnavailable);
        assert!(err.message.contains("connection refused"));
    }
}
