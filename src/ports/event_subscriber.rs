//! Inbound side of the broker.

use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::foundation::DomainError;
use crate::domain::realtime::{Channel, EventEnvelope};

use super::BrokerError;

/// Receives envelopes in the order the broker delivers them on a
/// subscription. A returned error is logged by the adapter; delivery of the
/// next envelope goes ahead regardless.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, envelope: EventEnvelope) -> Result<(), DomainError>;

    /// Used as the `handler` log field.
    fn name(&self) -> &'static str;
}

#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Invoke `handler` for every envelope published on any of `channels`,
    /// from any instance, including this one.
    async fn subscribe(
        &self,
        channels: &[Channel],
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), BrokerError>;
}
