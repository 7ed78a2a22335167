//! Router for the ops endpoints.

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{
    get_usage_status, get_usage_summary, health, list_breakers, reset_breakers, roll_over_usage,
    OpsAppState,
};

/// Create the ops router.
///
/// # Routes
/// - `GET /health` - liveness and local session counts
/// - `GET /breakers` - metrics for every registered breaker
/// - `POST /breakers/reset` - force every breaker closed
/// - `GET /tenants/:tenant_id/usage` - period usage by service kind
/// - `GET /tenants/:tenant_id/usage/status` - usage relative to the budget
/// - `POST /tenants/:tenant_id/usage/roll-over` - drop rows before the current period
pub fn ops_router() -> Router<OpsAppState> {
    Router::new()
        .route("/health", get(health))
        .route("/breakers", get(list_breakers))
        .route("/breakers/reset", post(reset_breakers))
        .route("/tenants/:tenant_id/usage", get(get_usage_summary))
        .route("/tenants/:tenant_id/usage/status", get(get_usage_status))
        .route("/tenants/:tenant_id/usage/roll-over", post(roll_over_usage))
}
