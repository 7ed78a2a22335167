//! Handlers for the ops endpoints.

use std::sync::Arc;

use axum::extract::{Json, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::application::{BudgetGate, RealtimeHub};
use crate::domain::foundation::{DomainError, ErrorCode, TenantId};

use super::dto::{BreakerResponse, ErrorResponse, HealthResponse};

/// Shared state for the ops router.
#[derive(Clone)]
pub struct OpsAppState {
    pub gate: Arc<BudgetGate>,
    pub hub: Arc<RealtimeHub>,
}

/// GET /health
pub async fn health(State(state): State<OpsAppState>) -> Json<HealthResponse> {
    let sessions = state.hub.sessions();
    Json(HealthResponse {
        status: "ok",
        instance_id: state.hub.instance_id().to_string(),
        local_connections: sessions.connection_count().await,
        online_users: sessions.online_user_count().await,
        rooms: sessions.room_count().await,
    })
}

/// GET /breakers
pub async fn list_breakers(State(state): State<OpsAppState>) -> Json<Vec<BreakerResponse>> {
    let breakers = state
        .gate
        .breakers()
        .metrics()
        .into_iter()
        .map(|(name, metrics)| BreakerResponse::from_metrics(name, metrics))
        .collect();
    Json(breakers)
}

/// POST /breakers/reset
pub async fn reset_breakers(State(state): State<OpsAppState>) -> StatusCode {
    state.gate.breakers().reset_all();
    tracing::info!("all circuit breakers reset by operator");
    StatusCode::NO_CONTENT
}

/// GET /tenants/:tenant_id/usage
pub async fn get_usage_summary(
    State(state): State<OpsAppState>,
    Path(tenant_id): Path<String>,
) -> Result<impl IntoResponse, OpsApiError> {
    let tenant_id = TenantId::new(tenant_id).map_err(DomainError::from)?;
    let summary = state.gate.usage_summary(&tenant_id).await.map_err(DomainError::from)?;
    Ok(Json(summary))
}

/// GET /tenants/:tenant_id/usage/status
pub async fn get_usage_status(
    State(state): State<OpsAppState>,
    Path(tenant_id): Path<String>,
) -> Result<impl IntoResponse, OpsApiError> {
    let tenant_id = TenantId::new(tenant_id).map_err(DomainError::from)?;
    let status = state.gate.usage_status(&tenant_id).await.map_err(DomainError::from)?;
    Ok(Json(status))
}

/// POST /tenants/:tenant_id/usage/roll-over
pub async fn roll_over_usage(
    State(state): State<OpsAppState>,
    Path(tenant_id): Path<String>,
) -> Result<StatusCode, OpsApiError> {
    let tenant_id = TenantId::new(tenant_id).map_err(DomainError::from)?;
    state.gate.roll_over(&tenant_id).await.map_err(DomainError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Converts domain errors to HTTP responses.
#[derive(Debug)]
pub struct OpsApiError(DomainError);

impl From<DomainError> for OpsApiError {
    fn from(err: DomainError) -> Self {
        Self(err)
    }
}

impl IntoResponse for OpsApiError {
    fn into_response(self) -> Response {
        let status = match self.0.code {
            ErrorCode::ValidationFailed => StatusCode::BAD_REQUEST,
            ErrorCode::BudgetExceeded => StatusCode::PAYMENT_REQUIRED,
            ErrorCode::ServiceDisabled => StatusCode::FORBIDDEN,
            ErrorCode::CircuitOpen
            | ErrorCode::BrokerUnavailable
            | ErrorCode::LedgerUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ErrorCode::RetryExhausted | ErrorCode::NonRetryable | ErrorCode::DeliveryFailed => {
                StatusCode::BAD_GATEWAY
            }
            ErrorCode::Cancelled | ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = ErrorResponse {
            error_code: self.0.code.to_string(),
            message: self.0.message,
            details: self.0.details,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::budget::{InMemoryBudgetSettings, InMemoryUsageLedger};
    use crate::adapters::events::InMemoryBroker;
    use crate::adapters::websocket::ChannelConnectionSink;
    use crate::domain::foundation::{ConnectionId, InstanceId, UserId};
    use crate::domain::resilience::BreakerRegistry;
    use crate::ports::LedgerError;

    fn state() -> OpsAppState {
        let broker = Arc::new(InMemoryBroker::new());
        let gate = BudgetGate::new(
            Arc::new(InMemoryUsageLedger::new()),
            Arc::new(InMemoryBudgetSettings::new()),
            Arc::new(BreakerRegistry::default()),
            broker.clone(),
        );
        let hub = RealtimeHub::new_shared(
            InstanceId::new("ops-test"),
            broker,
            Arc::new(ChannelConnectionSink::new()),
        );
        OpsAppState {
            gate: Arc::new(gate),
            hub,
        }
    }

    #[tokio::test]
    async fn health_reports_local_sessions() {
        let state = state();
        state
            .hub
            .on_connect(UserId::new("u1").unwrap(), ConnectionId::new())
            .await
            .unwrap();

        let Json(body) = health(State(state)).await;
        assert_eq!(body.status, "ok");
        assert_eq!(body.instance_id, "ops-test");
        assert_eq!(body.local_connections, 1);
        assert_eq!(body.online_users, 1);
    }

    #[tokio::test]
    async fn breakers_listed_after_first_use() {
        let state = state();
        state.gate.breakers().get_breaker("transcription", None);

        let Json(body) = list_breakers(State(state)).await;
        assert_eq!(body.len(), 1);
        assert_eq!(body[0].name, "transcription");
    }

    #[tokio::test]
    async fn blank_tenant_is_bad_request() {
        let result = get_usage_status(State(state()), Path("  ".to_string())).await;
        let response = result.err().unwrap().into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn fresh_tenant_summary_is_ok() {
        let result = get_usage_summary(State(state()), Path("acme".to_string())).await;
        assert!(result.is_ok());
    }

    #[test]
    fn ledger_outage_maps_to_503() {
        let err = OpsApiError::from(DomainError::from(LedgerError::Unavailable("down".into())));
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn budget_exceeded_maps_to_402() {
        let err = OpsApiError::from(DomainError::new(
            ErrorCode::BudgetExceeded,
            "monthly budget reached",
        ));
        assert_eq!(err.into_response().status(), StatusCode::PAYMENT_REQUIRED);
    }
}
