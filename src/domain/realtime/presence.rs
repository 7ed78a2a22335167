//! Presence event types and payloads.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::domain::foundation::{InstanceId, RoomId, UserId};

use super::{Channel, EventEnvelope};

pub const USER_ONLINE: &str = "user_online";
pub const USER_OFFLINE: &str = "user_offline";
pub const USER_JOINED_ROOM: &str = "user_joined_room";
pub const USER_LEFT_ROOM: &str = "user_left_room";

/// Payload of `user_online` / `user_offline`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresencePayload {
    pub user_id: UserId,
    pub instance_id: InstanceId,
}

/// Payload of `user_joined_room` / `user_left_room`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomPresencePayload {
    pub user_id: UserId,
    pub room_id: RoomId,
}

/// Broadcast announcing that a user's first connection opened.
pub fn user_online(user: &UserId, instance: &InstanceId) -> EventEnvelope {
    EventEnvelope::broadcast(
        Channel::Presence,
        USER_ONLINE,
        json!({ "user_id": user, "instance_id": instance }),
    )
}

/// Broadcast announcing that a user's last connection closed.
pub fn user_offline(user: &UserId, instance: &InstanceId) -> EventEnvelope {
    EventEnvelope::broadcast(
        Channel::Presence,
        USER_OFFLINE,
        json!({ "user_id": user, "instance_id": instance }),
    )
}

/// Room-targeted notice that `user` joined `room`.
pub fn user_joined_room(user: &UserId, room: &RoomId) -> EventEnvelope {
    EventEnvelope::to_room(
        Channel::Presence,
        USER_JOINED_ROOM,
        json!({ "user_id": user, "room_id": room }),
        room.clone(),
    )
}

/// Room-targeted notice that `user` left `room`.
pub fn user_left_room(user: &UserId, room: &RoomId) -> EventEnvelope {
    EventEnvelope::to_room(
        Channel::Presence,
        USER_LEFT_ROOM,
        json!({ "user_id": user, "room_id": room }),
        room.clone(),
    )
}
