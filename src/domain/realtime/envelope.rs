//! Transport wrapper for real-time events.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::domain::foundation::{EventId, InstanceId, RoomId, Timestamp, UserId};

use super::Channel;

/// Who an envelope is for. Resolved against the local session registry on
/// every instance that receives it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Target {
    /// Every live connection of one user.
    User(UserId),
    /// Every live connection of every participant of a room.
    Room(RoomId),
    /// Every live connection.
    #[default]
    Broadcast,
}

/// A real-time event on its way to client connections.
///
/// Transient: never stored, only published and delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: EventId,
    pub channel: Channel,
    pub event_type: String,
    pub payload: JsonValue,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub target: Target,
    /// Instance that published the envelope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<InstanceId>,
}

impl EventEnvelope {
    pub fn new(
        channel: Channel,
        event_type: impl Into<String>,
        payload: JsonValue,
        target: Target,
    ) -> Self {
        Self {
            event_id: EventId::new(),
            channel,
            event_type: event_type.into(),
            payload,
            timestamp: Timestamp::now(),
            target,
            origin: None,
        }
    }

    /// Envelope for one user.
    pub fn to_user(
        channel: Channel,
        event_type: impl Into<String>,
        payload: JsonValue,
        user: UserId,
    ) -> Self {
        Self::new(channel, event_type, payload, Target::User(user))
    }

    /// Envelope for a room.
    pub fn to_room(
        channel: Channel,
        event_type: impl Into<String>,
        payload: JsonValue,
        room: RoomId,
    ) -> Self {
        Self::new(channel, event_type, payload, Target::Room(room))
    }

    /// Envelope for everyone.
    pub fn broadcast(channel: Channel, event_type: impl Into<String>, payload: JsonValue) -> Self {
        Self::new(channel, event_type, payload, Target::Broadcast)
    }

    /// Stamps the publishing instance.
    pub fn with_origin(mut self, origin: InstanceId) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Deserializes the payload into a concrete type.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn target_defaults_to_broadcast_when_missing() {
        let json = json!({
            "event_id": "6f1c1ef4-9a55-4a77-9b2b-0c7f4b7e6b2a",
            "channel": "system",
            "event_type": "maintenance",
            "payload": {},
            "timestamp": "2024-05-01T12:00:00Z"
        });
        let envelope: EventEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(envelope.target, Target::Broadcast);
        assert!(envelope.origin.is_none());
    }

    #[test]
    fn target_serializes_with_kind_and_id() {
        let target = Target::Room(RoomId::new("lesson_42").unwrap());
        assert_eq!(
            serde_json::to_value(&target).unwrap(),
            json!({"kind": "room", "id": "lesson_42"})
        );
    }

    #[test]
    fn payload_as_reads_typed_payload() {
        #[derive(Deserialize)]
        struct Progress {
            percent: u8,
        }
        let envelope = EventEnvelope::to_user(
            Channel::AnalysisProgress,
            "analysis.progress",
            json!({"percent": 40}),
            UserId::new("u1").unwrap(),
        );
        assert_eq!(envelope.payload_as::<Progress>().unwrap().percent, 40);
    }
}
