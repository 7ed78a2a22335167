//! Domain layer - pure types and rules with no I/O.
//!
//! - `foundation` - ids, timestamps, cancellation, errors
//! - `resilience` - circuit breaker, breaker registry, retry
//! - `budget` - metered services, tenant budgets, usage accounting
//! - `realtime` - channels, envelopes, presence, session registry

pub mod budget;
pub mod foundation;
pub mod realtime;
pub mod resilience;
