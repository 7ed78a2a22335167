//! Integration tests for cross-instance fanout.
//!
//! Two hubs share one in-memory broker, standing in for two service
//! instances behind the same Redis. Each hub owns its own sockets through a
//! `ChannelConnectionSink`; the tests read those queues the way a socket's
//! send task would.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;

use lesson_relay::adapters::{ChannelConnectionSink, InMemoryBroker};
use lesson_relay::adapters::websocket::ServerMessage;
use lesson_relay::application::RealtimeHub;
use lesson_relay::domain::foundation::{ConnectionId, InstanceId, RoomId, UserId};
use lesson_relay::domain::realtime::{presence, Channel, EventEnvelope};

// =============================================================================
// Test Infrastructure
// =============================================================================

struct Instance {
    hub: Arc<RealtimeHub>,
    sink: Arc<ChannelConnectionSink>,
}

impl Instance {
    async fn start(name: &str, broker: &Arc<InMemoryBroker>) -> Self {
        let sink = Arc::new(ChannelConnectionSink::new());
        let hub = RealtimeHub::new_shared(InstanceId::new(name), broker.clone(), sink.clone());
        hub.register(broker.as_ref()).await.unwrap();
        Self { hub, sink }
    }

    /// Opens a socket for `user` and returns its outbound queue.
    async fn connect(&self, user: &str) -> (ConnectionId, mpsc::Receiver<ServerMessage>) {
        let connection = ConnectionId::new();
        let (tx, rx) = mpsc::channel(64);
        self.sink.register(connection, tx);
        self.hub.on_connect(UserId::new(user).unwrap(), connection).await.unwrap();
        (connection, rx)
    }
}

/// Event types queued for a socket so far.
fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<String> {
    let mut received = Vec::new();
    while let Ok(message) = rx.try_recv() {
        if let ServerMessage::Event(envelope) = message {
            received.push(envelope.event_type);
        }
    }
    received
}

fn count(received: &[String], event_type: &str) -> usize {
    received.iter().filter(|t| t.as_str() == event_type).count()
}

fn lesson_42() -> RoomId {
    RoomId::new("lesson_42").unwrap()
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn room_envelope_reaches_each_participant_on_its_own_instance() {
    let broker = Arc::new(InMemoryBroker::new());
    let a = Instance::start("instance-a", &broker).await;
    let b = Instance::start("instance-b", &broker).await;

    let (c1, mut u1_rx) = a.connect("u1").await;
    let (c2, mut u2_rx) = b.connect("u2").await;
    a.hub.on_join_room(c1, lesson_42()).await.unwrap();
    b.hub.on_join_room(c2, lesson_42()).await.unwrap();
    drain(&mut u1_rx);
    drain(&mut u2_rx);

    let published = a
        .hub
        .publish(EventEnvelope::to_room(
            Channel::Lesson,
            "lesson.slide_changed",
            json!({ "slide": 3 }),
            lesson_42(),
        ))
        .await;
    assert!(published);

    assert_eq!(drain(&mut u1_rx), vec!["lesson.slide_changed".to_string()]);
    assert_eq!(drain(&mut u2_rx), vec!["lesson.slide_changed".to_string()]);
}

#[tokio::test]
async fn user_envelope_is_delivered_only_where_the_user_is_connected() {
    let broker = Arc::new(InMemoryBroker::new());
    let a = Instance::start("instance-a", &broker).await;
    let b = Instance::start("instance-b", &broker).await;

    let (_, mut u1_rx) = a.connect("u1").await;
    let (_, mut u2_rx) = b.connect("u2").await;
    drain(&mut u1_rx);
    drain(&mut u2_rx);

    b.hub
        .publish(EventEnvelope::to_user(
            Channel::Homework,
            "homework.graded",
            json!({ "score": 9 }),
            UserId::new("u1").unwrap(),
        ))
        .await;

    assert_eq!(drain(&mut u1_rx), vec!["homework.graded".to_string()]);
    assert!(drain(&mut u2_rx).is_empty());
    assert!(b
        .hub
        .sessions()
        .connections_for_user(&UserId::new("u1").unwrap())
        .await
        .is_empty());
}

#[tokio::test]
async fn presence_is_announced_once_per_user_across_tabs() {
    let broker = Arc::new(InMemoryBroker::new());
    let a = Instance::start("instance-a", &broker).await;
    let b = Instance::start("instance-b", &broker).await;

    let (_, mut observer_rx) = b.connect("observer").await;
    drain(&mut observer_rx);

    let (first_tab, _first_rx) = a.connect("u1").await;
    let (second_tab, _second_rx) = a.connect("u1").await;
    a.hub.on_disconnect(first_tab).await;
    assert!(a.hub.sessions().is_online(&UserId::new("u1").unwrap()).await);

    a.hub.on_disconnect(second_tab).await;

    let seen = drain(&mut observer_rx);
    assert_eq!(count(&seen, presence::USER_ONLINE), 1);
    assert_eq!(count(&seen, presence::USER_OFFLINE), 1);
    assert_eq!(broker.published_of_type(presence::USER_OFFLINE).len(), 1);
}

#[tokio::test]
async fn leaving_a_room_is_seen_by_the_remaining_participants() {
    let broker = Arc::new(InMemoryBroker::new());
    let a = Instance::start("instance-a", &broker).await;
    let b = Instance::start("instance-b", &broker).await;

    let (c1, mut u1_rx) = a.connect("u1").await;
    let (c2, _u2_rx) = b.connect("u2").await;
    a.hub.on_join_room(c1, lesson_42()).await.unwrap();
    b.hub.on_join_room(c2, lesson_42()).await.unwrap();
    drain(&mut u1_rx);

    b.hub.on_disconnect(c2).await;

    let seen = drain(&mut u1_rx);
    assert_eq!(count(&seen, presence::USER_LEFT_ROOM), 1);
    assert_eq!(count(&seen, presence::USER_OFFLINE), 1);
}

#[tokio::test]
async fn broker_outage_does_not_break_connection_lifecycle() {
    let broker = Arc::new(InMemoryBroker::new());
    let a = Instance::start("instance-a", &broker).await;

    broker.set_unavailable(true);
    let (connection, _rx) = a.connect("u1").await;
    a.hub.on_join_room(connection, lesson_42()).await.unwrap();

    let published = a
        .hub
        .publish(EventEnvelope::broadcast(Channel::System, "maintenance", json!({})))
        .await;
    assert!(!published);

    a.hub.on_disconnect(connection).await;
    assert!(!a.hub.sessions().is_online(&UserId::new("u1").unwrap()).await);
    assert_eq!(broker.published_count(), 0);
}
