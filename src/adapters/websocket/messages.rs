//! JSON frames exchanged over `/ws`.
//!
//! Both directions are internally tagged on `type` with snake_case names.
//! Clients can only ping and manage their own room membership; everything
//! else arrives from the hub as `event` frames.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{DomainError, Timestamp};
use crate::domain::realtime::EventEnvelope;

/// Outbound frame.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected(ConnectedMessage),

    /// An envelope addressed to this connection's user, one of its rooms, or everyone.
    Event(EventEnvelope),

    /// Room membership changed at the client's request.
    Room(RoomMessage),

    /// Request refused or malformed; the socket stays open.
    Error(ErrorMessage),

    Pong(PongMessage),
}

impl ServerMessage {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerMessage::Error(ErrorMessage {
            code: code.into(),
            message: message.into(),
            timestamp: Timestamp::now().to_rfc3339(),
        })
    }

    pub fn pong() -> Self {
        ServerMessage::Pong(PongMessage {
            timestamp: Timestamp::now().to_rfc3339(),
        })
    }
}

impl From<&DomainError> for ServerMessage {
    fn from(err: &DomainError) -> Self {
        ServerMessage::error(err.code.to_string(), err.message.clone())
    }
}

/// Sent once the connection is registered with the hub.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedMessage {
    pub connection_id: String,
    pub user_id: String,
    pub instance_id: String,
    pub timestamp: String,
}

/// Acknowledges a join or leave.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMessage {
    pub room_id: String,
    pub joined: bool,
}

/// `code` uses the same spelling as domain error codes, plus
/// `INVALID_MESSAGE` for frames that did not parse.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorMessage {
    pub code: String,
    pub message: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PongMessage {
    pub timestamp: String,
}

/// Inbound frame. Unknown `type` values fail to parse.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,

    #[serde(rename_all = "camelCase")]
    JoinRoom { room_id: String },

    #[serde(rename_all = "camelCase")]
    LeaveRoom { room_id: String },
}
