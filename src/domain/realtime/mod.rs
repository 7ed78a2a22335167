//! Real-time domain - channels, envelopes, presence and the local session
//! registry.
//!
//! ```text
//!   producer ──publish──▶ broker ──▶ every instance (publisher included)
//!                                        │
//!                                        ▼
//!                            SessionRegistry::resolve(target)
//!                                        │
//!                                        ▼
//!                              local connections only
//! ```

mod channel;
mod envelope;
pub mod presence;
mod session_registry;

pub use channel::Channel;
pub use envelope::{EventEnvelope, Target};
pub use presence::{PresencePayload, RoomPresencePayload};
pub use session_registry::{
    Disconnected, RoomInfo, RoomJoin, RoomKind, RoomLeave, SessionError, SessionRegistry,
};
