//! Operational HTTP endpoints.
//!
//! Read-mostly views over the process: liveness, breaker telemetry and
//! per-tenant usage. Metered calls themselves go through [`BudgetGate`]
//! in-process, never over HTTP.
//!
//! [`BudgetGate`]: crate::application::BudgetGate

mod dto;
mod handlers;
mod routes;

pub use dto::{BreakerResponse, ErrorResponse, HealthResponse};
pub use handlers::{OpsApiError, OpsAppState};
pub use routes::ops_router;
