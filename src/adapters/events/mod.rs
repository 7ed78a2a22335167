//! Broker adapters.
//!
//! Adapters implement the event publishing and subscribing ports
//! for different environments:
//!
//! - `InMemoryBroker` - In-process broker for tests and single-instance runs
//! - `RedisBroker` - Redis pub/sub for multi-instance deployments

mod in_memory;
mod redis;

pub use self::redis::RedisBroker;
pub use in_memory::InMemoryBroker;
