//! ConnectionSink port - Interface for writing to one live client connection.

use async_trait::async_trait;

use crate::domain::foundation::ConnectionId;
use crate::domain::realtime::EventEnvelope;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SinkError {
    /// The connection is gone (closed between lookup and send).
    #[error("connection {0} is closed")]
    Closed(ConnectionId),

    /// The connection's outbound queue is full.
    #[error("connection {0} is not keeping up")]
    Backpressure(ConnectionId),
}

/// Port for handing an envelope to a connection held by this process.
#[async_trait]
pub trait ConnectionSink: Send + Sync {
    async fn send(
        &self,
        connection: ConnectionId,
        envelope: &EventEnvelope,
    ) -> Result<(), SinkError>;
}
