//! HTTP adapters - REST endpoints beside the WebSocket transport.

pub mod ops;

pub use ops::{ops_router, OpsAppState};
