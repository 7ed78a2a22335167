//! RealtimeHub - Connection lifecycle and cross-instance fanout.
//!
//! Every instance runs one hub. Producers call [`RealtimeHub::publish`];
//! the broker hands the envelope to every instance's hub (the publisher's
//! own included), and each hub delivers it to the connections it holds.
//!
//! ```text
//!  producer ──publish──▶ broker ──▶ hub A ──▶ local connections on A
//!                               └─▶ hub B ──▶ local connections on B
//! ```
//!
//! Room membership lives only in each hub's [`SessionRegistry`]. There is
//! no way to ask which users are in a room across all instances; a room
//! envelope reaches a participant through whichever instance holds that
//! participant's connections.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::foundation::{ConnectionId, DomainError, ErrorCode, InstanceId, RoomId, UserId};
use crate::domain::realtime::presence;
use crate::domain::realtime::{
    Channel, EventEnvelope, RoomJoin, RoomLeave, SessionError, SessionRegistry,
};
use crate::ports::{BrokerError, ConnectionSink, EventHandler, EventPublisher, EventSubscriber};

impl From<SessionError> for DomainError {
    fn from(err: SessionError) -> Self {
        DomainError::new(ErrorCode::ValidationFailed, err.to_string())
    }
}

/// Per-instance fanout hub.
pub struct RealtimeHub {
    instance_id: InstanceId,
    sessions: SessionRegistry,
    publisher: Arc<dyn EventPublisher>,
    sink: Arc<dyn ConnectionSink>,
}

impl RealtimeHub {
    pub fn new(
        instance_id: InstanceId,
        publisher: Arc<dyn EventPublisher>,
        sink: Arc<dyn ConnectionSink>,
    ) -> Self {
        Self {
            instance_id,
            sessions: SessionRegistry::new(),
            publisher,
            sink,
        }
    }

    /// Create as an Arc (for sharing with the broker subscription).
    pub fn new_shared(
        instance_id: InstanceId,
        publisher: Arc<dyn EventPublisher>,
        sink: Arc<dyn ConnectionSink>,
    ) -> Arc<Self> {
        Arc::new(Self::new(instance_id, publisher, sink))
    }

    /// Subscribe this hub to every channel.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let hub = RealtimeHub::new_shared(instance_id, broker.clone(), sink);
    /// hub.register(broker.as_ref()).await?;
    /// ```
    pub async fn register(
        self: &Arc<Self>,
        subscriber: &dyn EventSubscriber,
    ) -> Result<(), BrokerError> {
        subscriber.subscribe(&Channel::ALL, self.clone()).await
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    /// This instance's view of users, connections and rooms.
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    // === Connection Lifecycle ===

    /// Registers a new connection. The user's first connection on this
    /// instance broadcasts `user_online`.
    pub async fn on_connect(
        &self,
        user_id: UserId,
        connection: ConnectionId,
    ) -> Result<(), DomainError> {
        let first = self.sessions.connect(user_id.clone(), connection).await?;
        tracing::info!(
            user_id = %user_id.as_str(),
            connection_id = %connection,
            instance_id = %self.instance_id.as_str(),
            "connection registered"
        );

        if first {
            self.publish(presence::user_online(&user_id, &self.instance_id)).await;
        }
        Ok(())
    }

    /// Removes a connection and its room memberships. The user's last
    /// connection on this instance broadcasts `user_offline`. Unknown
    /// connections are ignored.
    pub async fn on_disconnect(&self, connection: ConnectionId) {
        let Some(disconnected) = self.sessions.disconnect(connection).await else {
            tracing::debug!(connection_id = %connection, "disconnect for unknown connection");
            return;
        };
        tracing::info!(
            user_id = %disconnected.user_id.as_str(),
            connection_id = %connection,
            last_connection = disconnected.last_connection,
            "connection removed"
        );

        for room_id in &disconnected.left_rooms {
            self.publish(presence::user_left_room(&disconnected.user_id, room_id))
                .await;
        }
        if disconnected.last_connection {
            self.publish(presence::user_offline(&disconnected.user_id, &self.instance_id))
                .await;
        }
    }

    /// Adds the connection's user to a room on this instance.
    pub async fn on_join_room(
        &self,
        connection: ConnectionId,
        room_id: RoomId,
    ) -> Result<RoomJoin, DomainError> {
        let joined = self.sessions.join_room(connection, room_id.clone()).await?;
        if joined.newly_joined {
            tracing::debug!(
                user_id = %joined.user_id.as_str(),
                room_id = %room_id.as_str(),
                "joined room"
            );
            self.publish(presence::user_joined_room(&joined.user_id, &room_id))
                .await;
        }
        Ok(joined)
    }

    /// Removes the connection from a room on this instance.
    pub async fn on_leave_room(
        &self,
        connection: ConnectionId,
        room_id: &RoomId,
    ) -> Result<RoomLeave, DomainError> {
        let left = self.sessions.leave_room(connection, room_id).await?;
        if left.user_left {
            tracing::debug!(
                user_id = %left.user_id.as_str(),
                room_id = %room_id.as_str(),
                "left room"
            );
            self.publish(presence::user_left_room(&left.user_id, room_id))
                .await;
        }
        Ok(left)
    }

    // === Fanout ===

    /// Publishes an envelope to every instance, stamped with this instance
    /// as origin. Broker failures are logged and swallowed; returns whether
    /// the broker accepted the envelope.
    pub async fn publish(&self, envelope: EventEnvelope) -> bool {
        let envelope = envelope.with_origin(self.instance_id.clone());
        let event_type = envelope.event_type.clone();
        let channel = envelope.channel;

        match self.publisher.publish(envelope).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    channel = %channel,
                    event_type = %event_type,
                    error = %e,
                    "publish failed, envelope dropped"
                );
                false
            }
        }
    }

    /// Delivers an envelope to the connections this instance holds for its
    /// target. Returns how many sends succeeded.
    pub async fn deliver_local(&self, envelope: &EventEnvelope) -> usize {
        let connections = self.sessions.resolve(&envelope.target).await;
        if connections.is_empty() {
            tracing::trace!(event_type = %envelope.event_type, "no local recipients");
            return 0;
        }

        let mut delivered = 0;
        for connection in connections {
            match self.sink.send(connection, envelope).await {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!(
                    connection_id = %connection,
                    event_type = %envelope.event_type,
                    error = %e,
                    "delivery failed"
                ),
            }
        }

        tracing::debug!(
            event_type = %envelope.event_type,
            channel = %envelope.channel,
            delivered,
            "delivered locally"
        );
        delivered
    }
}

#[async_trait]
impl EventHandler for RealtimeHub {
    async fn handle(&self, envelope: EventEnvelope) -> Result<(), DomainError> {
        self.deliver_local(&envelope).await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "RealtimeHub"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::events::InMemoryBroker;
    use crate::domain::realtime::Target;
    use crate::ports::SinkError;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<(ConnectionId, String)>>,
        closed: Mutex<HashSet<ConnectionId>>,
    }

    impl RecordingSink {
        fn close(&self, connection: ConnectionId) {
            self.closed.lock().unwrap().insert(connection);
        }

        fn sent_to(&self, connection: ConnectionId) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(c, _)| *c == connection)
                .map(|(_, t)| t.clone())
                .collect()
        }
    }

    #[async_trait]
    impl ConnectionSink for RecordingSink {
        async fn send(
            &self,
            connection: ConnectionId,
            envelope: &EventEnvelope,
        ) -> Result<(), SinkError> {
            if self.closed.lock().unwrap().contains(&connection) {
                return Err(SinkError::Closed(connection));
            }
            self.sent
                .lock()
                .unwrap()
                .push((connection, envelope.event_type.clone()));
            Ok(())
        }
    }

    async fn hub() -> (Arc<RealtimeHub>, Arc<InMemoryBroker>, Arc<RecordingSink>) {
        let broker = Arc::new(InMemoryBroker::new());
        let sink = Arc::new(RecordingSink::default());
        let hub = RealtimeHub::new_shared(InstanceId::new("a"), broker.clone(), sink.clone());
        hub.register(broker.as_ref()).await.unwrap();
        (hub, broker, sink)
    }

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    #[tokio::test]
    async fn online_and_offline_fire_once_per_user() {
        let (hub, broker, _) = hub().await;
        let c1 = ConnectionId::new();
        let c2 = ConnectionId::new();

        hub.on_connect(user("u1"), c1).await.unwrap();
        hub.on_connect(user("u1"), c2).await.unwrap();
        assert_eq!(broker.published_of_type(presence::USER_ONLINE).len(), 1);

        hub.on_disconnect(c1).await;
        assert!(hub.sessions().is_online(&user("u1")).await);
        assert!(broker.published_of_type(presence::USER_OFFLINE).is_empty());

        hub.on_disconnect(c2).await;
        assert!(!hub.sessions().is_online(&user("u1")).await);
        assert_eq!(broker.published_of_type(presence::USER_OFFLINE).len(), 1);
    }

    #[tokio::test]
    async fn published_envelopes_carry_origin() {
        let (hub, broker, _) = hub().await;
        hub.publish(EventEnvelope::broadcast(Channel::System, "maintenance", json!({})))
            .await;
        assert_eq!(broker.published()[0].origin, Some(InstanceId::new("a")));
    }

    #[tokio::test]
    async fn user_target_reaches_every_connection_of_user() {
        let (hub, _, sink) = hub().await;
        let c1 = ConnectionId::new();
        let c2 = ConnectionId::new();
        let other = ConnectionId::new();
        hub.on_connect(user("u1"), c1).await.unwrap();
        hub.on_connect(user("u1"), c2).await.unwrap();
        hub.on_connect(user("u2"), other).await.unwrap();

        let envelope = EventEnvelope::to_user(
            Channel::Homework,
            "homework.graded",
            json!({}),
            user("u1"),
        );
        hub.publish(envelope).await;

        assert!(sink.sent_to(c1).contains(&"homework.graded".to_string()));
        assert!(sink.sent_to(c2).contains(&"homework.graded".to_string()));
        assert!(!sink.sent_to(other).contains(&"homework.graded".to_string()));
    }

    #[tokio::test]
    async fn unknown_user_target_is_dropped_silently() {
        let (hub, _, _) = hub().await;
        let envelope = EventEnvelope::to_user(Channel::Notification, "x", json!({}), user("ghost"));
        assert_eq!(hub.deliver_local(&envelope).await, 0);
    }

    #[tokio::test]
    async fn failed_send_does_not_stop_delivery() {
        let (hub, _, sink) = hub().await;
        let dead = ConnectionId::new();
        let live = ConnectionId::new();
        hub.on_connect(user("u1"), dead).await.unwrap();
        hub.on_connect(user("u2"), live).await.unwrap();
        sink.close(dead);

        let envelope = EventEnvelope::new(
            Channel::System,
            "maintenance",
            json!({}),
            Target::Broadcast,
        );
        assert_eq!(hub.deliver_local(&envelope).await, 1);
        assert_eq!(sink.sent_to(live).last().map(String::as_str), Some("maintenance"));
    }

    #[tokio::test]
    async fn room_presence_published_on_join_leave_and_disconnect() {
        let (hub, broker, _) = hub().await;
        let c1 = ConnectionId::new();
        let room = RoomId::new("lesson_42").unwrap();
        hub.on_connect(user("u1"), c1).await.unwrap();

        let joined = hub.on_join_room(c1, room.clone()).await.unwrap();
        assert!(joined.newly_joined);
        let again = hub.on_join_room(c1, room.clone()).await.unwrap();
        assert!(!again.newly_joined);
        assert_eq!(broker.published_of_type(presence::USER_JOINED_ROOM).len(), 1);

        hub.on_disconnect(c1).await;
        let left = broker.published_of_type(presence::USER_LEFT_ROOM);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].target, Target::Room(room));
    }

    #[tokio::test]
    async fn join_from_unknown_connection_is_rejected() {
        let (hub, _, _) = hub().await;
        let err = hub
            .on_join_room(ConnectionId::new(), RoomId::new("lesson_1").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationFailed);
    }

    #[tokio::test]
    async fn broker_outage_is_swallowed() {
        let (hub, broker, _) = hub().await;
        broker.set_unavailable(true);

        hub.on_connect(user("u1"), ConnectionId::new()).await.unwrap();
        assert!(!hub.publish(EventEnvelope::broadcast(Channel::System, "x", json!({}))).await);
        assert!(hub.sessions().is_online(&user("u1")).await);
    }
}
