//! Channel-backed connection sink.
//!
//! Each socket owns a bounded mpsc queue drained by its send task. The hub
//! never writes to a socket directly; it pushes onto the queue, so a slow
//! client fills its own queue instead of stalling delivery to everyone else.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::domain::foundation::ConnectionId;
use crate::domain::realtime::EventEnvelope;
use crate::ports::{ConnectionSink, SinkError};

use super::messages::ServerMessage;

/// Outbound queues of the sockets held by this process.
#[derive(Debug, Default)]
pub struct ChannelConnectionSink {
    senders: RwLock<HashMap<ConnectionId, mpsc::Sender<ServerMessage>>>,
}

impl ChannelConnectionSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection's queue. Replaces any earlier queue for it.
    pub fn register(&self, connection: ConnectionId, sender: mpsc::Sender<ServerMessage>) {
        self.senders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(connection, sender);
    }

    pub fn remove(&self, connection: ConnectionId) {
        self.senders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&connection);
    }

    pub fn len(&self) -> usize {
        self.senders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ConnectionSink for ChannelConnectionSink {
    async fn send(
        &self,
        connection: ConnectionId,
        envelope: &EventEnvelope,
    ) -> Result<(), SinkError> {
        let sender = self
            .senders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&connection)
            .cloned()
            .ok_or(SinkError::Closed(connection))?;

        sender
            .try_send(ServerMessage::Event(envelope.clone()))
            .map_err(|e| match e {
                TrySendError::Full(_) => SinkError::Backpressure(connection),
                TrySendError::Closed(_) => SinkError::Closed(connection),
            })
    }
}
