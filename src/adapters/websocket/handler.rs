//! WebSocket upgrade handler for real-time connections.
//!
//! Handles the HTTP → WebSocket upgrade and manages the connection lifecycle:
//! 1. Validate the user id
//! 2. Upgrade to WebSocket
//! 3. Register the connection with the hub and the sink
//! 4. Send/receive messages until disconnect
//! 5. Unregister, which also leaves every room

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::application::RealtimeHub;
use crate::domain::foundation::{ConnectionId, DomainError, RoomId, Timestamp, UserId};

use super::messages::{ClientMessage, ConnectedMessage, RoomMessage, ServerMessage};
use super::sink::ChannelConnectionSink;

/// State required for WebSocket handling.
#[derive(Clone)]
pub struct WebSocketState {
    pub hub: Arc<RealtimeHub>,
    pub sink: Arc<ChannelConnectionSink>,
    /// Capacity of each connection's outbound queue.
    pub outbound_buffer: usize,
}

impl WebSocketState {
    pub fn new(
        hub: Arc<RealtimeHub>,
        sink: Arc<ChannelConnectionSink>,
        outbound_buffer: usize,
    ) -> Self {
        Self {
            hub,
            sink,
            outbound_buffer: outbound_buffer.max(1),
        }
    }
}

/// Query parameters of the upgrade request.
#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub user_id: String,
}

/// Handle WebSocket upgrade requests.
///
/// Route: `GET /ws?user_id=<id>`
///
/// The user id is trusted as given; authentication happens in front of
/// this service.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<WebSocketState>,
) -> Response {
    let user_id = match UserId::new(params.user_id) {
        Ok(id) => id,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, user_id, state))
}

/// Handle an established WebSocket connection.
///
/// Runs for the lifetime of the connection, handling:
/// - Registering with the hub (which announces presence)
/// - Draining the outbound queue to the client
/// - Processing client messages (ping, join/leave room)
/// - Cleanup on disconnect
async fn handle_socket(socket: WebSocket, user_id: UserId, state: WebSocketState) {
    let (mut sender, mut receiver) = socket.split();
    let connection_id = ConnectionId::new();

    let (tx, mut rx) = mpsc::channel::<ServerMessage>(state.outbound_buffer);
    state.sink.register(connection_id, tx.clone());

    if let Err(e) = state.hub.on_connect(user_id.clone(), connection_id).await {
        tracing::warn!(
            user_id = %user_id,
            connection_id = %connection_id,
            error = %e,
            "connection refused"
        );
        state.sink.remove(connection_id);
        let _ = send_message(&mut sender, &ServerMessage::from(&e)).await;
        return;
    }

    let connected = ServerMessage::Connected(ConnectedMessage {
        connection_id: connection_id.to_string(),
        user_id: user_id.to_string(),
        instance_id: state.hub.instance_id().to_string(),
        timestamp: Timestamp::now().to_rfc3339(),
    });
    if let Err(e) = send_message(&mut sender, &connected).await {
        tracing::debug!(connection_id = %connection_id, "Failed to send connected message: {}", e);
        state.sink.remove(connection_id);
        state.hub.on_disconnect(connection_id).await;
        return;
    }

    // Drain the outbound queue to the client
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = send_message(&mut sender, &msg).await {
                tracing::debug!(
                    connection_id = %connection_id,
                    "Send error, closing connection: {}",
                    e
                );
                break;
            }
        }
    });

    // Handle incoming messages from client
    let hub = state.hub.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    let reply = match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(msg) => handle_client_message(&hub, connection_id, msg).await,
                        Err(e) => ServerMessage::error("INVALID_MESSAGE", e.to_string()),
                    };
                    if tx.try_send(reply).is_err() {
                        tracing::warn!(
                            connection_id = %connection_id,
                            "outbound queue full, reply dropped"
                        );
                    }
                }
                Ok(Message::Binary(_)) => {
                    tracing::warn!(
                        connection_id = %connection_id,
                        "Received unsupported binary message"
                    );
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                    // WebSocket protocol ping/pong - handled automatically by axum
                }
                Ok(Message::Close(_)) => {
                    tracing::debug!(connection_id = %connection_id, "Client sent close frame");
                    break;
                }
                Err(e) => {
                    tracing::debug!(connection_id = %connection_id, "Receive error: {}", e);
                    break;
                }
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.sink.remove(connection_id);
    state.hub.on_disconnect(connection_id).await;
}

async fn handle_client_message(
    hub: &RealtimeHub,
    connection_id: ConnectionId,
    msg: ClientMessage,
) -> ServerMessage {
    let outcome = match msg {
        ClientMessage::Ping => return ServerMessage::pong(),
        ClientMessage::JoinRoom { room_id } => join(hub, connection_id, room_id).await,
        ClientMessage::LeaveRoom { room_id } => leave(hub, connection_id, room_id).await,
    };
    match outcome {
        Ok(room) => ServerMessage::Room(room),
        Err(e) => ServerMessage::from(&e),
    }
}

async fn join(
    hub: &RealtimeHub,
    connection_id: ConnectionId,
    room_id: String,
) -> Result<RoomMessage, DomainError> {
    let room_id = RoomId::new(room_id)?;
    hub.on_join_room(connection_id, room_id.clone()).await?;
    Ok(RoomMessage {
        room_id: room_id.to_string(),
        joined: true,
    })
}

async fn leave(
    hub: &RealtimeHub,
    connection_id: ConnectionId,
    room_id: String,
) -> Result<RoomMessage, DomainError> {
    let room_id = RoomId::new(room_id)?;
    hub.on_leave_room(connection_id, &room_id).await?;
    Ok(RoomMessage {
        room_id: room_id.to_string(),
        joined: false,
    })
}

/// Send a JSON message over the WebSocket.
async fn send_message(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMessage,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(msg).map_err(axum::Error::new)?;
    sender.send(Message::Text(json)).await
}

/// Create axum router for the WebSocket endpoint.
///
/// # Example
///
/// ```ignore
/// let app = Router::new()
///     .merge(websocket_router())
///     .with_state(ws_state);
/// ```
pub fn websocket_router() -> axum::Router<WebSocketState> {
    use axum::routing::get;

    axum::Router::new().route("/ws", get(ws_handler))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::events::InMemoryBroker;
    use crate::domain::foundation::InstanceId;

    fn state() -> WebSocketState {
        let broker = Arc::new(InMemoryBroker::new());
        let sink = Arc::new(ChannelConnectionSink::new());
        let hub = RealtimeHub::new_shared(InstanceId::new("test"), broker, sink.clone());
        WebSocketState::new(hub, sink, 0)
    }

    #[test]
    fn outbound_buffer_is_at_least_one() {
        assert_eq!(state().outbound_buffer, 1);
    }

    #[test]
    fn websocket_router_creates_route() {
        let _router = websocket_router();
    }

    #[tokio::test]
    async fn join_from_registered_connection_acknowledges() {
        let state = state();
        let connection = ConnectionId::new();
        state
            .hub
            .on_connect(UserId::new("u1").unwrap(), connection)
            .await
            .unwrap();

        let reply = handle_client_message(
            &state.hub,
            connection,
            ClientMessage::JoinRoom {
                room_id: "lesson_42".into(),
            },
        )
        .await;
        assert!(matches!(reply, ServerMessage::Room(RoomMessage { joined: true, .. })));
    }

    #[tokio::test]
    async fn blank_room_id_is_an_error_reply() {
        let state = state();
        let reply = handle_client_message(
            &state.hub,
            ConnectionId::new(),
            ClientMessage::JoinRoom { room_id: "  ".into() },
        )
        .await;
        assert!(matches!(reply, ServerMessage::Error(_)));
    }
}
