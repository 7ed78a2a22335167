//! Usage ledger and budget settings adapters.
//!
//! - `InMemoryUsageLedger` / `InMemoryBudgetSettings` - Tests and single-instance runs
//! - `RedisUsageLedger` / `RedisBudgetSettings` - Shared across instances

mod in_memory;
mod redis;

pub use self::redis::{RedisBudgetSettings, RedisUsageLedger};
pub use in_memory::{InMemoryBudgetSettings, InMemoryUsageLedger};
