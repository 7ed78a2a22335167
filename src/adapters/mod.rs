//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the domain to external systems:
//! - `events` - Broker implementations (in-memory, Redis pub/sub)
//! - `budget` - Usage ledger and budget settings (in-memory, Redis)
//! - `websocket` - Axum WebSocket transport and the connection sink
//! - `http` - Operational REST endpoints

pub mod budget;
pub mod events;
pub mod http;
pub mod websocket;

pub use budget::{
    InMemoryBudgetSettings, InMemoryUsageLedger, RedisBudgetSettings, RedisUsageLedger,
};
pub use events::{InMemoryBroker, RedisBroker};
pub use http::{ops_router, OpsAppState};
pub use websocket::{websocket_router, ChannelConnectionSink, WebSocketState};
