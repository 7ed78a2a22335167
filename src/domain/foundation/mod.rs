//! Foundation module - Shared domain primitives.
//!
//! Contains identifiers, timestamps, cancellation and error types
//! that form the vocabulary of the rest of the crate.

mod cancel;
mod errors;
mod ids;
mod timestamp;

pub use cancel::{CancelHandle, CancelSignal};
pub use errors::{DomainError, ErrorCode, ValidationError};
pub use ids::{ConnectionId, EventId, InstanceId, RoomId, TenantId, UserId};
pub use timestamp::Timestamp;
