//! Client sockets.
//!
//! `handler` upgrades `GET /ws?user_id=..` and drives the hub's connection
//! callbacks; `sink` gives every socket a bounded outbound queue that the hub
//! writes envelopes into; `messages` is the JSON frame protocol.
//!
//! ```text
//! broker ──▶ RealtimeHub ──ConnectionSink::send──▶ ChannelConnectionSink
//!                                                    ├─ conn-a queue ─▶ socket
//!                                                    └─ conn-b queue ─▶ socket
//! ```

pub mod handler;
pub mod messages;
pub mod sink;

pub use handler::{websocket_router, ws_handler, ConnectParams, WebSocketState};
pub use messages::{
    ClientMessage, ConnectedMessage, ErrorMessage, PongMessage, RoomMessage, ServerMessage,
};
pub use sink::ChannelConnectionSink;
