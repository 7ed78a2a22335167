//! Application layer - Services that orchestrate domain logic and ports.
//!
//! - `BudgetGate` - Budget-checked, resilient metered calls
//! - `RealtimeHub` - Connection lifecycle and cross-instance fanout

mod budget_gate;
mod realtime_hub;

pub use budget_gate::{
    BudgetDefaults, BudgetGate, GateError, MeteredRequest, METERED_CALL_COMPLETED,
    METERED_CALL_FAILED,
};
pub use realtime_hub::RealtimeHub;
