//! In-memory broker for tests and single-process runs.
//!
//! One `InMemoryBroker` shared by several hubs behaves like a broker shared
//! by several instances: every subscriber of a channel receives every
//! envelope published on it, the publisher's own subscription included.
//! Delivery is inline and in subscription order, which keeps tests
//! deterministic.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::domain::realtime::{Channel, EventEnvelope};
use crate::ports::{BrokerError, EventHandler, EventPublisher, EventSubscriber};

/// In-memory broker.
///
/// # Example
///
/// ```ignore
/// let broker = Arc::new(InMemoryBroker::new());
/// broker.subscribe(&Channel::ALL, hub_a.clone()).await?;
/// broker.subscribe(&Channel::ALL, hub_b.clone()).await?;
///
/// broker.publish(envelope).await?;
/// assert_eq!(broker.published_count(), 1);
/// ```
#[derive(Default)]
pub struct InMemoryBroker {
    handlers: RwLock<HashMap<Channel, Vec<Arc<dyn EventHandler>>>>,
    published: RwLock<Vec<EventEnvelope>>,
    unavailable: AtomicBool,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: while set, `publish` fails with
    /// [`BrokerError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    // === Test Helpers ===

    /// Every envelope accepted so far.
    pub fn published(&self) -> Vec<EventEnvelope> {
        self.published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Accepted envelopes with the given event type.
    pub fn published_of_type(&self, event_type: &str) -> Vec<EventEnvelope> {
        self.published()
            .into_iter()
            .filter(|envelope| envelope.event_type == event_type)
            .collect()
    }

    pub fn published_count(&self) -> usize {
        self.published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn subscriber_count(&self, channel: Channel) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&channel)
            .map_or(0, Vec::len)
    }

    pub fn clear(&self) {
        self.published
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[async_trait]
impl EventPublisher for InMemoryBroker {
    async fn publish(&self, envelope: EventEnvelope) -> Result<(), BrokerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("in-memory broker offline".to_string()));
        }

        self.published
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(envelope.clone());

        // Clone handlers so no lock is held across await.
        let handlers: Vec<Arc<dyn EventHandler>> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&envelope.channel)
            .cloned()
            .unwrap_or_default();

        for handler in handlers {
            if let Err(e) = handler.handle(envelope.clone()).await {
                tracing::warn!(
                    handler = handler.name(),
                    event_type = %envelope.event_type,
                    error = %e,
                    "envelope handler failed"
                );
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventSubscriber for InMemoryBroker {
    async fn subscribe(
        &self,
        channels: &[Channel],
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), BrokerError> {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        for channel in channels {
            handlers.entry(*channel).or_default().push(handler.clone());
        }
        Ok(())
    }
}
