//! Process-local map of users, live connections and room membership.
//!
//! Every instance keeps its own registry describing only the connections it
//! holds. There is deliberately no way to ask which rooms a user has joined
//! on another instance: room delivery works because every instance resolves
//! a room-targeted envelope against its own local view.

use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;

use crate::domain::foundation::{ConnectionId, RoomId, Timestamp, UserId};

use super::Target;

/// Category of a room, derived from its id prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomKind {
    Lesson,
    Homework,
    Tenant,
    Direct,
    Other,
}

impl RoomKind {
    pub fn from_room_id(room: &RoomId) -> Self {
        let prefix = room.as_str().split('_').next().unwrap_or_default();
        match prefix {
            "lesson" => RoomKind::Lesson,
            "homework" => RoomKind::Homework,
            "tenant" => RoomKind::Tenant,
            "direct" => RoomKind::Direct,
            _ => RoomKind::Other,
        }
    }
}

/// Snapshot of one room.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomInfo {
    pub room_id: RoomId,
    pub kind: RoomKind,
    pub created_at: Timestamp,
    /// Sorted.
    pub participants: Vec<UserId>,
}

/// Result of removing a connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Disconnected {
    pub user_id: UserId,
    /// The user has no remaining connection on this instance.
    pub last_connection: bool,
    /// Rooms the user is no longer a participant of.
    pub left_rooms: Vec<RoomId>,
}

/// Result of joining a room.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomJoin {
    pub user_id: UserId,
    /// The user was not a participant before this join.
    pub newly_joined: bool,
}

/// Result of leaving a room.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomLeave {
    pub user_id: UserId,
    /// The user is no longer a participant.
    pub user_left: bool,
    /// The room had no participants left and was removed.
    pub room_removed: bool,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SessionError {
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),

    #[error("connection {0} is already registered to another user")]
    ConnectionOwnedByOtherUser(ConnectionId),
}

#[derive(Debug)]
struct ConnectionEntry {
    user_id: UserId,
    rooms: HashSet<RoomId>,
}

#[derive(Debug)]
struct Room {
    kind: RoomKind,
    created_at: Timestamp,
    /// Participants and which of their connections joined.
    members: HashMap<UserId, HashSet<ConnectionId>>,
}

#[derive(Debug, Default)]
struct RegistryState {
    users: HashMap<UserId, HashSet<ConnectionId>>,
    connections: HashMap<ConnectionId, ConnectionEntry>,
    rooms: HashMap<RoomId, Room>,
}

impl RegistryState {
    /// Removes `connection` from `room`. Returns (user left, room removed).
    fn detach(
        &mut self,
        room_id: &RoomId,
        user_id: &UserId,
        connection: ConnectionId,
    ) -> (bool, bool) {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return (false, false);
        };

        let mut user_left = false;
        if let Some(connections) = room.members.get_mut(user_id) {
            connections.remove(&connection);
            if connections.is_empty() {
                room.members.remove(user_id);
                user_left = true;
            }
        }

        let room_removed = room.members.is_empty();
        if room_removed {
            self.rooms.remove(room_id);
        }
        (user_left, room_removed)
    }
}

/// User → connections and room → participants for this process.
///
/// A single lock guards both maps so every operation sees them consistent.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    state: RwLock<RegistryState>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a live connection. Returns `true` if it is the user's first
    /// connection on this instance.
    pub async fn connect(
        &self,
        user_id: UserId,
        connection: ConnectionId,
    ) -> Result<bool, SessionError> {
        let mut state = self.state.write().await;

        if let Some(existing) = state.connections.get(&connection) {
            if existing.user_id != user_id {
                return Err(SessionError::ConnectionOwnedByOtherUser(connection));
            }
            return Ok(false);
        }

        state.connections.insert(
            connection,
            ConnectionEntry {
                user_id: user_id.clone(),
                rooms: HashSet::new(),
            },
        );
        let connections = state.users.entry(user_id).or_default();
        connections.insert(connection);
        Ok(connections.len() == 1)
    }

    /// Removes a connection and its room memberships. `None` if it was not
    /// registered.
    pub async fn disconnect(&self, connection: ConnectionId) -> Option<Disconnected> {
        let mut state = self.state.write().await;
        let entry = state.connections.remove(&connection)?;

        let mut left_rooms = Vec::new();
        for room_id in &entry.rooms {
            let (user_left, _) = state.detach(room_id, &entry.user_id, connection);
            if user_left {
                left_rooms.push(room_id.clone());
            }
        }
        left_rooms.sort();

        let last_connection = match state.users.get_mut(&entry.user_id) {
            Some(connections) => {
                connections.remove(&connection);
                connections.is_empty()
            }
            None => true,
        };
        if last_connection {
            state.users.remove(&entry.user_id);
        }

        Some(Disconnected {
            user_id: entry.user_id,
            last_connection,
            left_rooms,
        })
    }

    /// Adds the connection's user to a room, creating the room if needed.
    pub async fn join_room(
        &self,
        connection: ConnectionId,
        room_id: RoomId,
    ) -> Result<RoomJoin, SessionError> {
        let mut state = self.state.write().await;
        let entry = state
            .connections
            .get_mut(&connection)
            .ok_or(SessionError::UnknownConnection(connection))?;
        entry.rooms.insert(room_id.clone());
        let user_id = entry.user_id.clone();

        let room = state.rooms.entry(room_id.clone()).or_insert_with(|| Room {
            kind: RoomKind::from_room_id(&room_id),
            created_at: Timestamp::now(),
            members: HashMap::new(),
        });
        let connections = room.members.entry(user_id.clone()).or_default();
        let newly_joined = connections.is_empty();
        connections.insert(connection);

        Ok(RoomJoin { user_id, newly_joined })
    }

    /// Removes the connection from a room; the room is dropped once empty.
    pub async fn leave_room(
        &self,
        connection: ConnectionId,
        room_id: &RoomId,
    ) -> Result<RoomLeave, SessionError> {
        let mut state = self.state.write().await;
        let entry = state
            .connections
            .get_mut(&connection)
            .ok_or(SessionError::UnknownConnection(connection))?;
        let was_member = entry.rooms.remove(room_id);
        let user_id = entry.user_id.clone();

        let (user_left, room_removed) = if was_member {
            state.detach(room_id, &user_id, connection)
        } else {
            (false, false)
        };

        Ok(RoomLeave {
            user_id,
            user_left,
            room_removed,
        })
    }

    /// Local connections an envelope with `target` should reach.
    ///
    /// A room resolves to every local connection of each participant, not
    /// only the connections that joined.
    pub async fn resolve(&self, target: &Target) -> Vec<ConnectionId> {
        let state = self.state.read().await;
        match target {
            Target::User(user_id) => state
                .users
                .get(user_id)
                .map(|connections| connections.iter().copied().collect())
                .unwrap_or_default(),
            Target::Room(room_id) => state
                .rooms
                .get(room_id)
                .map(|room| {
                    room.members
                        .keys()
                        .filter_map(|user_id| state.users.get(user_id))
                        .flatten()
                        .copied()
                        .collect()
                })
                .unwrap_or_default(),
            Target::Broadcast => state.connections.keys().copied().collect(),
        }
    }

    pub async fn is_online(&self, user_id: &UserId) -> bool {
        self.state.read().await.users.contains_key(user_id)
    }

    pub async fn connections_for_user(&self, user_id: &UserId) -> Vec<ConnectionId> {
        self.resolve(&Target::User(user_id.clone())).await
    }

    pub async fn user_for_connection(&self, connection: ConnectionId) -> Option<UserId> {
        self.state
            .read()
            .await
            .connections
            .get(&connection)
            .map(|entry| entry.user_id.clone())
    }

    pub async fn room_info(&self, room_id: &RoomId) -> Option<RoomInfo> {
        let state = self.state.read().await;
        state.rooms.get(room_id).map(|room| {
            let mut participants: Vec<_> = room.members.keys().cloned().collect();
            participants.sort();
            RoomInfo {
                room_id: room_id.clone(),
                kind: room.kind,
                created_at: room.created_at,
                participants,
            }
        })
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    pub async fn online_user_count(&self) -> usize {
        self.state.read().await.users.len()
    }

    pub async fn room_count(&self) -> usize {
        self.state.read().await.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    fn room(id: &str) -> RoomId {
        RoomId::new(id).unwrap()
    }

    #[tokio::test]
    async fn first_and_last_connection_are_reported() {
        let registry = SessionRegistry::new();
        let (c1, c2) = (ConnectionId::new(), ConnectionId::new());

        assert!(registry.connect(user("u1"), c1).await.unwrap());
        assert!(!registry.connect(user("u1"), c2).await.unwrap());

        let first = registry.disconnect(c1).await.unwrap();
        assert!(!first.last_connection);
        assert!(registry.is_online(&user("u1")).await);

        let second = registry.disconnect(c2).await.unwrap();
        assert!(second.last_connection);
        assert!(!registry.is_online(&user("u1")).await);
    }

    #[tokio::test]
    async fn disconnecting_unknown_connection_is_none() {
        let registry = SessionRegistry::new();
        assert!(registry.disconnect(ConnectionId::new()).await.is_none());
    }

    #[tokio::test]
    async fn reconnecting_same_connection_is_idempotent() {
        let registry = SessionRegistry::new();
        let c1 = ConnectionId::new();
        assert!(registry.connect(user("u1"), c1).await.unwrap());
        assert!(!registry.connect(user("u1"), c1).await.unwrap());
        assert_eq!(
            registry.connect(user("u2"), c1).await,
            Err(SessionError::ConnectionOwnedByOtherUser(c1))
        );
        assert_eq!(registry.connection_count().await, 1);
    }

    #[tokio::test]
    async fn room_removed_when_last_participant_leaves() {
        let registry = SessionRegistry::new();
        let (c1, c2) = (ConnectionId::new(), ConnectionId::new());
        registry.connect(user("u1"), c1).await.unwrap();
        registry.connect(user("u2"), c2).await.unwrap();

        assert!(registry.join_room(c1, room("lesson_42")).await.unwrap().newly_joined);
        registry.join_room(c2, room("lesson_42")).await.unwrap();

        let info = registry.room_info(&room("lesson_42")).await.unwrap();
        assert_eq!(info.kind, RoomKind::Lesson);
        assert_eq!(info.participants, vec![user("u1"), user("u2")]);

        let leave = registry.leave_room(c1, &room("lesson_42")).await.unwrap();
        assert!(leave.user_left);
        assert!(!leave.room_removed);

        let leave = registry.leave_room(c2, &room("lesson_42")).await.unwrap();
        assert!(leave.room_removed);
        assert!(registry.room_info(&room("lesson_42")).await.is_none());
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn user_stays_in_room_while_another_connection_remains() {
        let registry = SessionRegistry::new();
        let (c1, c2) = (ConnectionId::new(), ConnectionId::new());
        registry.connect(user("u1"), c1).await.unwrap();
        registry.connect(user("u1"), c2).await.unwrap();
        registry.join_room(c1, room("homework_7")).await.unwrap();
        assert!(!registry.join_room(c2, room("homework_7")).await.unwrap().newly_joined);

        let leave = registry.leave_room(c1, &room("homework_7")).await.unwrap();
        assert!(!leave.user_left);
        assert!(registry.room_info(&room("homework_7")).await.is_some());
    }

    #[tokio::test]
    async fn disconnect_leaves_joined_rooms() {
        let registry = SessionRegistry::new();
        let c1 = ConnectionId::new();
        registry.connect(user("u1"), c1).await.unwrap();
        registry.join_room(c1, room("lesson_1")).await.unwrap();
        registry.join_room(c1, room("lesson_2")).await.unwrap();

        let gone = registry.disconnect(c1).await.unwrap();
        assert_eq!(gone.left_rooms, vec![room("lesson_1"), room("lesson_2")]);
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn join_requires_registered_connection() {
        let registry = SessionRegistry::new();
        let stray = ConnectionId::new();
        assert_eq!(
            registry.join_room(stray, room("lesson_1")).await,
            Err(SessionError::UnknownConnection(stray))
        );
    }

    #[tokio::test]
    async fn room_target_reaches_all_connections_of_participants() {
        let registry = SessionRegistry::new();
        let (c1, c2, c3) = (ConnectionId::new(), ConnectionId::new(), ConnectionId::new());
        registry.connect(user("u1"), c1).await.unwrap();
        registry.connect(user("u1"), c2).await.unwrap();
        registry.connect(user("u2"), c3).await.unwrap();
        registry.join_room(c1, room("lesson_42")).await.unwrap();

        let mut reached = registry.resolve(&Target::Room(room("lesson_42"))).await;
        reached.sort_by_key(|c| *c.as_uuid());
        let mut expected = vec![c1, c2];
        expected.sort_by_key(|c| *c.as_uuid());
        assert_eq!(reached, expected);

        assert_eq!(registry.resolve(&Target::Broadcast).await.len(), 3);
        assert!(registry.resolve(&Target::User(user("ghost"))).await.is_empty());
        assert!(registry.resolve(&Target::Room(room("lesson_0"))).await.is_empty());
    }

    #[test]
    fn room_kind_from_prefix() {
        assert_eq!(RoomKind::from_room_id(&room("tenant_acme")), RoomKind::Tenant);
        assert_eq!(RoomKind::from_room_id(&room("direct_u1_u2")), RoomKind::Direct);
        assert_eq!(RoomKind::from_room_id(&room("misc")), RoomKind::Other);
    }
}
