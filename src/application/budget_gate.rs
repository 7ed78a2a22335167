//! BudgetGate - Metered calls to paid external services.
//!
//! A metered call goes through four steps:
//!
//! 1. Load the tenant's budget setting, creating it with defaults on first use
//! 2. Reserve the projected cost against the tenant budget and the service
//!    sub-limit, or reject without invoking anything
//! 3. Invoke the operation through retry, then the service's circuit breaker,
//!    then the optional fallback
//! 4. Commit the reservation to the usage ledger on success, or release it
//!
//! Reservations are kept per tenant behind an async mutex that is released
//! while the external call runs. Within one instance, concurrent calls can
//! never jointly overshoot a limit and each threshold crossing is reported
//! once. Across instances the guarantee is only as strong as the ledger's
//! atomic increment.

use std::collections::HashMap;
use std::error::Error;
use std::future::{Future, Ready};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::json;
use tokio::sync::Mutex as AsyncMutex;

use crate::domain::budget::{
    check_projection, detect_crossings, BillingPeriod, BudgetSetting, BudgetViolation, PeriodSpend,
    ServiceKind, ServiceUsage, ThresholdCrossing, UnitRates, UsageKey, UsageLimitStatus,
    UsageSummary, DEFAULT_ALERT_THRESHOLD_PERCENT,
};
use crate::domain::foundation::{
    CancelSignal, DomainError, ErrorCode, RoomId, TenantId, Timestamp, UserId,
};
use crate::domain::realtime::{Channel, EventEnvelope, Target};
use crate::domain::resilience::{
    retry_cancellable, BreakerError, BreakerRegistry, FallbackReason, RetryError, RetryPolicy,
    Served,
};
use crate::ports::{BudgetSettingsRepository, EventPublisher, LedgerError, UsageLedger};

pub const METERED_CALL_COMPLETED: &str = "metered_call.completed";
pub const METERED_CALL_FAILED: &str = "metered_call.failed";

/// Settings given to a tenant the first time it makes a metered call.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetDefaults {
    pub monthly_budget: f64,
    pub alert_threshold_percent: u8,
}

impl Default for BudgetDefaults {
    fn default() -> Self {
        Self {
            monthly_budget: 1000.0,
            alert_threshold_percent: DEFAULT_ALERT_THRESHOLD_PERCENT,
        }
    }
}

/// One metered call.
#[derive(Debug, Clone)]
pub struct MeteredRequest {
    pub tenant_id: TenantId,
    pub service_kind: ServiceKind,
    pub estimated_units: f64,
    /// Receives the completion and failure events. Without one they go to
    /// the tenant room.
    pub requested_by: Option<UserId>,
    pub cancel: CancelSignal,
}

impl MeteredRequest {
    pub fn new(tenant_id: TenantId, service_kind: ServiceKind, estimated_units: f64) -> Self {
        Self {
            tenant_id,
            service_kind,
            estimated_units,
            requested_by: None,
            cancel: CancelSignal::never(),
        }
    }

    pub fn requested_by(mut self, user_id: UserId) -> Self {
        self.requested_by = Some(user_id);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    fn event_target(&self) -> Target {
        match &self.requested_by {
            Some(user_id) => Target::User(user_id.clone()),
            None => Target::Room(RoomId::for_tenant(&self.tenant_id)),
        }
    }
}

/// Why a metered call did not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum GateError<E> {
    /// Nothing was invoked: the unit estimate is negative or not finite.
    #[error("estimated units must be finite and non-negative, got {0}")]
    InvalidUnits(f64),

    /// Nothing was invoked: the call would pass a limit.
    #[error("budget exceeded: {0}")]
    BudgetExceeded(BudgetViolation),

    /// Nothing was invoked: the tenant has this service turned off.
    #[error("service {0} is disabled for this tenant")]
    ServiceDisabled(ServiceKind),

    #[error("circuit breaker '{name}' is open (retry in {retry_after:?})")]
    CircuitOpen { name: String, retry_after: Duration },

    #[error("gave up after {attempts} attempts: {source}")]
    RetryExhausted { attempts: u32, source: E },

    #[error("non-retryable failure on attempt {attempts}: {source}")]
    NonRetryable { attempts: u32, source: E },

    #[error("metered call cancelled")]
    Cancelled,

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl<E> GateError<E> {
    pub fn code(&self) -> ErrorCode {
        match self {
            GateError::InvalidUnits(_) => ErrorCode::ValidationFailed,
            GateError::BudgetExceeded(_) => ErrorCode::BudgetExceeded,
            GateError::ServiceDisabled(_) => ErrorCode::ServiceDisabled,
            GateError::CircuitOpen { .. } => ErrorCode::CircuitOpen,
            GateError::RetryExhausted { .. } => ErrorCode::RetryExhausted,
            GateError::NonRetryable { .. } => ErrorCode::NonRetryable,
            GateError::Cancelled => ErrorCode::Cancelled,
            GateError::Ledger(_) => ErrorCode::LedgerUnavailable,
        }
    }

    /// True when the operation was never invoked.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            GateError::InvalidUnits(_)
                | GateError::BudgetExceeded(_)
                | GateError::ServiceDisabled(_)
        )
    }

    /// The operation's last error, if that is what ended the call.
    pub fn into_source(self) -> Option<E> {
        match self {
            GateError::RetryExhausted { source, .. } | GateError::NonRetryable { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }
}

impl<E: Error + 'static> GateError<E> {
    /// Caller-facing projection with the details a client can act on.
    pub fn into_domain_error(self) -> DomainError {
        let error = DomainError::new(self.code(), self.to_string());
        match self {
            GateError::InvalidUnits(units) => {
                error.with_detail("estimated_units", units.to_string())
            }
            GateError::BudgetExceeded(violation) => error
                .with_detail("scope", violation.scope.to_string())
                .with_detail("limit", violation.limit.to_string())
                .with_detail("current", violation.current.to_string())
                .with_detail("projected", violation.projected.to_string()),
            GateError::ServiceDisabled(kind) => error.with_detail("service_kind", kind.as_str()),
            GateError::CircuitOpen { name, retry_after } => error
                .with_detail("breaker", name)
                .with_detail("retry_after_ms", retry_after.as_millis().to_string()),
            GateError::RetryExhausted { attempts, .. }
            | GateError::NonRetryable { attempts, .. } => {
                error.with_detail("attempts", attempts.to_string())
            }
            GateError::Cancelled | GateError::Ledger(_) => error,
        }
    }
}

fn from_retry_error<E>(err: RetryError<BreakerError<E>>) -> GateError<E> {
    let (attempts, error, exhausted) = match err {
        RetryError::Cancelled { .. } => return GateError::Cancelled,
        RetryError::Exhausted { attempts, last } => (attempts, last, true),
        RetryError::NonRetryable { attempts, error } => (attempts, error, false),
    };
    match error {
        BreakerError::Open { name, retry_after } => GateError::CircuitOpen { name, retry_after },
        BreakerError::Cancelled => GateError::Cancelled,
        BreakerError::Inner(source) if exhausted => GateError::RetryExhausted { attempts, source },
        BreakerError::Inner(source) => GateError::NonRetryable { attempts, source },
    }
}

/// Cost reserved by calls that passed the check but have not finished.
#[derive(Debug, Default)]
struct TenantBook {
    tenant: f64,
    by_service: HashMap<ServiceKind, f64>,
}

impl TenantBook {
    fn reserve(&mut self, kind: ServiceKind, cost: f64) {
        self.tenant += cost;
        *self.by_service.entry(kind).or_default() += cost;
    }

    fn release(&mut self, kind: ServiceKind, cost: f64) {
        self.tenant = (self.tenant - cost).max(0.0);
        if let Some(reserved) = self.by_service.get_mut(&kind) {
            *reserved = (*reserved - cost).max(0.0);
        }
    }

    fn reserved_for(&self, kind: ServiceKind) -> f64 {
        self.by_service.get(&kind).copied().unwrap_or(0.0)
    }
}

/// Releases a reservation if the call is dropped before it settles.
struct Reservation {
    book: Arc<AsyncMutex<TenantBook>>,
    kind: ServiceKind,
    cost: f64,
    settled: bool,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let (kind, cost) = (self.kind, self.cost);
        if let Ok(mut book) = self.book.try_lock() {
            book.release(kind, cost);
            return;
        }
        let book = self.book.clone();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move { book.lock().await.release(kind, cost) });
        }
    }
}

/// Enforces tenant budgets around metered calls.
pub struct BudgetGate {
    ledger: Arc<dyn UsageLedger>,
    settings: Arc<dyn BudgetSettingsRepository>,
    breakers: Arc<BreakerRegistry>,
    publisher: Arc<dyn EventPublisher>,
    rates: UnitRates,
    retry_policy: RetryPolicy,
    defaults: BudgetDefaults,
    books: Mutex<HashMap<TenantId, Arc<AsyncMutex<TenantBook>>>>,
}

impl BudgetGate {
    pub fn new(
        ledger: Arc<dyn UsageLedger>,
        settings: Arc<dyn BudgetSettingsRepository>,
        breakers: Arc<BreakerRegistry>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            ledger,
            settings,
            breakers,
            publisher,
            rates: UnitRates::default(),
            retry_policy: RetryPolicy::default(),
            defaults: BudgetDefaults::default(),
            books: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_unit_rates(mut self, rates: UnitRates) -> Self {
        self.rates = rates;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_defaults(mut self, defaults: BudgetDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    /// Runs a metered call.
    ///
    /// `operation` is invoked once per attempt. Usage is recorded only when
    /// it succeeds; on failure the caller gets the last real error.
    pub async fn execute_metered<T, E, F, Fut>(
        &self,
        request: MeteredRequest,
        operation: F,
    ) -> Result<T, GateError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Error + 'static,
    {
        self.run(request, operation, None::<&fn(FallbackReason) -> Ready<Result<T, E>>>)
            .await
            .map(Served::into_inner)
    }

    /// Runs a metered call with a fallback.
    ///
    /// The fallback is wired into the service breaker, so it stands in for
    /// any attempt the breaker refuses or that fails. A fallback-served
    /// result records no usage. Budget rejections never reach the fallback.
    pub async fn execute_metered_with_fallback<T, E, F, Fut, G, GFut>(
        &self,
        request: MeteredRequest,
        operation: F,
        fallback: G,
    ) -> Result<Served<T>, GateError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        G: Fn(FallbackReason) -> GFut,
        GFut: Future<Output = Result<T, E>>,
        E: Error + 'static,
    {
        self.run(request, operation, Some(&fallback)).await
    }

    async fn run<T, E, F, Fut, G, GFut>(
        &self,
        request: MeteredRequest,
        operation: F,
        fallback: Option<&G>,
    ) -> Result<Served<T>, GateError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        G: Fn(FallbackReason) -> GFut,
        GFut: Future<Output = Result<T, E>>,
        E: Error + 'static,
    {
        let kind = request.service_kind;
        let cost = self.rates.cost(kind, request.estimated_units);
        let period = current_period();

        let reserved = match validate_units(request.estimated_units) {
            Ok(()) => self.reserve(&request, cost, period).await,
            Err(rejection) => Err(rejection),
        };
        let setting = match reserved {
            Ok(setting) => setting,
            Err(rejection) => {
                if rejection.is_rejection() {
                    tracing::warn!(
                        tenant_id = %request.tenant_id,
                        service_kind = %kind,
                        cost,
                        error = %rejection,
                        "metered call rejected"
                    );
                    self.publish_failed(&request, rejection.code(), &rejection.to_string())
                        .await;
                }
                return Err(rejection.into_gate_error());
            }
        };
        let mut reservation = Reservation {
            book: self.book(&request.tenant_id),
            kind,
            cost,
            settled: false,
        };

        let breaker = self.breakers.get_breaker(kind.as_str(), None);
        let breaker = breaker.as_ref();
        let policy = gate_policy::<E>(&self.retry_policy);
        // Called by the breaker only once it admits the attempt.
        let operation = Mutex::new(operation);
        let operation = &operation;
        let outcome = retry_cancellable(&policy, &request.cancel, move || async move {
            let attempt = move || {
                let mut operation = operation.lock().unwrap_or_else(PoisonError::into_inner);
                (*operation)()
            };
            match fallback {
                Some(fallback) => {
                    breaker
                        .execute_with_fallback(attempt, move |reason| fallback(reason))
                        .await
                }
                None => breaker.execute(attempt).await.map(Served::Primary),
            }
        })
        .await;

        let mut book = reservation.book.lock().await;
        book.release(kind, cost);
        reservation.settled = true;

        match outcome {
            Ok(Served::Primary(value)) => {
                let committed = self.commit(&request, &setting, cost, period).await;
                drop(book);
                let (period_total, crossings) = match committed {
                    Some((total, crossings)) => (Some(total), crossings),
                    None => (None, Vec::new()),
                };
                self.publish_completed(&request, cost, "primary", period_total).await;
                for crossing in crossings {
                    self.publish_crossing(&request, period, &crossing).await;
                }
                Ok(Served::Primary(value))
            }
            Ok(Served::Fallback(value)) => {
                drop(book);
                tracing::warn!(
                    tenant_id = %request.tenant_id,
                    service_kind = %kind,
                    "fallback served, usage not recorded"
                );
                self.publish_completed(&request, 0.0, "fallback", None).await;
                Ok(Served::Fallback(value))
            }
            Err(err) => {
                drop(book);
                let err = from_retry_error(err);
                if !matches!(err, GateError::Cancelled) {
                    tracing::warn!(
                        tenant_id = %request.tenant_id,
                        service_kind = %kind,
                        code = %err.code(),
                        error = %err,
                        "metered call failed"
                    );
                    self.publish_failed(&request, err.code(), &err.to_string()).await;
                } else {
                    tracing::debug!(
                        tenant_id = %request.tenant_id,
                        service_kind = %kind,
                        "metered call cancelled"
                    );
                }
                Err(err)
            }
        }
    }

    /// Checks the projection and reserves `cost` under the tenant lock.
    async fn reserve(
        &self,
        request: &MeteredRequest,
        cost: f64,
        period: BillingPeriod,
    ) -> Result<BudgetSetting, Rejection> {
        let kind = request.service_kind;
        let book = self.book(&request.tenant_id);
        let mut book = book.lock().await;

        let setting = self.load_setting(&request.tenant_id).await?;
        if !setting.is_enabled(kind) {
            return Err(Rejection::Disabled(kind));
        }

        let committed = self.committed_spend(&setting, kind, period).await?;
        let spend = PeriodSpend {
            tenant: committed.tenant + book.tenant,
            service: committed.service + book.reserved_for(kind),
        };
        check_projection(&setting, kind, spend, cost).map_err(Rejection::Budget)?;

        book.reserve(kind, cost);
        tracing::debug!(
            tenant_id = %request.tenant_id,
            service_kind = %kind,
            cost,
            projected = spend.tenant + cost,
            "cost reserved"
        );
        Ok(setting)
    }

    /// Records usage and detects crossings. Caller holds the tenant lock.
    ///
    /// A ledger failure here loses the usage but not the caller's result.
    async fn commit(
        &self,
        request: &MeteredRequest,
        setting: &BudgetSetting,
        cost: f64,
        period: BillingPeriod,
    ) -> Option<(f64, Vec<ThresholdCrossing>)> {
        let kind = request.service_kind;
        let before = match self.committed_spend(setting, kind, period).await {
            Ok(before) => before,
            Err(e) => {
                tracing::error!(
                    tenant_id = %request.tenant_id,
                    service_kind = %kind,
                    cost,
                    error = %e,
                    "usage not recorded"
                );
                return None;
            }
        };

        let key = UsageKey::new(request.tenant_id.clone(), kind, Timestamp::now().date());
        if let Err(e) = self.ledger.increment(&key, request.estimated_units, cost).await {
            tracing::error!(
                tenant_id = %request.tenant_id,
                service_kind = %kind,
                cost,
                error = %e,
                "usage not recorded"
            );
            return None;
        }

        let after = PeriodSpend {
            tenant: before.tenant + cost,
            service: before.service + cost,
        };
        let crossings = detect_crossings(setting, kind, before, after);
        Some((after.tenant, crossings))
    }

    async fn committed_spend(
        &self,
        setting: &BudgetSetting,
        kind: ServiceKind,
        period: BillingPeriod,
    ) -> Result<PeriodSpend, LedgerError> {
        let tenant = self.ledger.period_totals(&setting.tenant_id, None, period).await?.cost;
        let service = match setting.service_limit(kind) {
            Some(_) => {
                self.ledger
                    .period_totals(&setting.tenant_id, Some(kind), period)
                    .await?
                    .cost
            }
            None => 0.0,
        };
        Ok(PeriodSpend { tenant, service })
    }

    async fn load_setting(&self, tenant_id: &TenantId) -> Result<BudgetSetting, LedgerError> {
        if let Some(setting) = self.settings.find(tenant_id).await? {
            return Ok(setting);
        }
        let created = BudgetSetting::new(
            tenant_id.clone(),
            self.defaults.monthly_budget,
            self.defaults.alert_threshold_percent,
        );
        tracing::info!(
            tenant_id = %tenant_id,
            monthly_budget = created.monthly_budget,
            "budget setting created with defaults"
        );
        self.settings.insert_if_absent(created).await
    }

    fn book(&self, tenant_id: &TenantId) -> Arc<AsyncMutex<TenantBook>> {
        self.books
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(tenant_id.clone())
            .or_default()
            .clone()
    }

    // === Queries ===

    /// Where the tenant stands against its monthly budget this period.
    pub async fn usage_status(
        &self,
        tenant_id: &TenantId,
    ) -> Result<UsageLimitStatus, LedgerError> {
        let setting = self.load_setting(tenant_id).await?;
        let totals = self.ledger.period_totals(tenant_id, None, current_period()).await?;
        Ok(UsageLimitStatus::from_usage(
            totals.cost,
            setting.monthly_budget,
            setting.alert_threshold_percent,
        ))
    }

    /// Per-service breakdown of the tenant's usage this period.
    pub async fn usage_summary(&self, tenant_id: &TenantId) -> Result<UsageSummary, LedgerError> {
        let setting = self.load_setting(tenant_id).await?;
        let period = current_period();

        let mut by_service = Vec::with_capacity(ServiceKind::ALL.len());
        let mut total_cost = 0.0;
        for kind in ServiceKind::ALL {
            let totals = self.ledger.period_totals(tenant_id, Some(kind), period).await?;
            total_cost += totals.cost;
            by_service.push(ServiceUsage {
                service_kind: kind,
                units: totals.units,
                cost: totals.cost,
                limit: setting.service_limit(kind),
            });
        }

        Ok(UsageSummary {
            tenant_id: tenant_id.clone(),
            period,
            total_cost,
            monthly_budget: setting.monthly_budget,
            by_service,
        })
    }

    /// Drops the tenant's ledger rows from earlier periods.
    pub async fn roll_over(&self, tenant_id: &TenantId) -> Result<(), LedgerError> {
        self.ledger.roll_over(tenant_id, current_period()).await
    }

    // === Events ===

    async fn publish_completed(
        &self,
        request: &MeteredRequest,
        cost: f64,
        served: &str,
        period_total: Option<f64>,
    ) {
        let envelope = EventEnvelope::new(
            Channel::AnalysisProgress,
            METERED_CALL_COMPLETED,
            json!({
                "tenant_id": request.tenant_id,
                "service_kind": request.service_kind,
                "units": request.estimated_units,
                "cost": cost,
                "served": served,
                "period_total": period_total,
            }),
            request.event_target(),
        );
        self.publish(envelope).await;
    }

    async fn publish_failed(&self, request: &MeteredRequest, code: ErrorCode, message: &str) {
        let envelope = EventEnvelope::new(
            Channel::Notification,
            METERED_CALL_FAILED,
            json!({
                "tenant_id": request.tenant_id,
                "service_kind": request.service_kind,
                "code": code.to_string(),
                "message": message,
            }),
            request.event_target(),
        );
        self.publish(envelope).await;
    }

    async fn publish_crossing(
        &self,
        request: &MeteredRequest,
        period: BillingPeriod,
        crossing: &ThresholdCrossing,
    ) {
        tracing::info!(
            tenant_id = %request.tenant_id,
            event_type = crossing.event_type(),
            threshold = crossing.threshold,
            total = crossing.total,
            "budget threshold crossed"
        );
        let envelope = EventEnvelope::new(
            Channel::Notification,
            crossing.event_type(),
            json!({
                "tenant_id": request.tenant_id,
                "period": period.to_string(),
                "scope": crossing.scope,
                "threshold": crossing.threshold,
                "limit": crossing.limit,
                "total": crossing.total,
            }),
            request.event_target(),
        );
        self.publish(envelope).await;
    }

    async fn publish(&self, envelope: EventEnvelope) {
        let event_type = envelope.event_type.clone();
        if let Err(e) = self.publisher.publish(envelope).await {
            tracing::warn!(event_type = %event_type, error = %e, "budget event dropped");
        }
    }
}

/// Reservation failures, before they are typed by the operation's error.
enum Rejection {
    InvalidUnits(f64),
    Budget(BudgetViolation),
    Disabled(ServiceKind),
    Ledger(LedgerError),
}

impl From<LedgerError> for Rejection {
    fn from(err: LedgerError) -> Self {
        Rejection::Ledger(err)
    }
}

impl Rejection {
    fn is_rejection(&self) -> bool {
        !matches!(self, Rejection::Ledger(_))
    }

    fn code(&self) -> ErrorCode {
        match self {
            Rejection::InvalidUnits(_) => ErrorCode::ValidationFailed,
            Rejection::Budget(_) => ErrorCode::BudgetExceeded,
            Rejection::Disabled(_) => ErrorCode::ServiceDisabled,
            Rejection::Ledger(_) => ErrorCode::LedgerUnavailable,
        }
    }

    fn into_gate_error<E>(self) -> GateError<E> {
        match self {
            Rejection::InvalidUnits(units) => GateError::InvalidUnits(units),
            Rejection::Budget(violation) => GateError::BudgetExceeded(violation),
            Rejection::Disabled(kind) => GateError::ServiceDisabled(kind),
            Rejection::Ledger(err) => GateError::Ledger(err),
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::InvalidUnits(units) => {
                write!(f, "estimated units must be finite and non-negative, got {}", units)
            }
            Rejection::Budget(violation) => write!(f, "budget exceeded: {}", violation),
            Rejection::Disabled(kind) => write!(f, "service {} is disabled for this tenant", kind),
            Rejection::Ledger(err) => write!(f, "{}", err),
        }
    }
}

/// The gate's retry policy seen through the breaker: an open circuit or a
/// cancelled attempt is never retried, and the caller's predicate judges
/// the operation's own error.
fn gate_policy<E: Error + 'static>(base: &RetryPolicy) -> RetryPolicy {
    let judge = base.clone();
    base.clone()
        .with_predicate(move |error| match error.downcast_ref::<BreakerError<E>>() {
            Some(BreakerError::Inner(inner)) => judge.is_retryable(inner),
            Some(_) => false,
            None => judge.is_retryable(error),
        })
}

/// The ledger only grows within a period, and NaN would compare as under
/// every limit, so both are refused before any reservation.
fn validate_units(units: f64) -> Result<(), Rejection> {
    if units.is_finite() && units >= 0.0 {
        Ok(())
    } else {
        Err(Rejection::InvalidUnits(units))
    }
}

fn current_period() -> BillingPeriod {
    BillingPeriod::containing(Timestamp::now().date())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::budget::{InMemoryBudgetSettings, InMemoryUsageLedger};
    use crate::adapters::events::InMemoryBroker;
    use crate::domain::budget::UsageTotals;
    use crate::domain::resilience::CircuitBreakerConfig;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, thiserror::Error)]
    #[error("{0}")]
    struct CallError(&'static str);

    struct Fixture {
        gate: BudgetGate,
        ledger: Arc<InMemoryUsageLedger>,
        settings: Arc<InMemoryBudgetSettings>,
        broker: Arc<InMemoryBroker>,
    }

    fn fixture() -> Fixture {
        let ledger = Arc::new(InMemoryUsageLedger::new());
        let settings = Arc::new(InMemoryBudgetSettings::new());
        let broker = Arc::new(InMemoryBroker::new());
        let breakers = Arc::new(BreakerRegistry::new(CircuitBreakerConfig::new(
            2,
            Duration::from_secs(30),
            Duration::from_secs(120),
        )));
        let gate = BudgetGate::new(ledger.clone(), settings.clone(), breakers, broker.clone())
            .with_unit_rates(UnitRates::uniform(1.0))
            .with_retry_policy(RetryPolicy::new(
                2,
                Duration::from_millis(10),
                Duration::from_millis(50),
                2.0,
            ));
        Fixture {
            gate,
            ledger,
            settings,
            broker,
        }
    }

    fn tenant() -> TenantId {
        TenantId::new("acme").unwrap()
    }

    fn seed(f: &Fixture, kind: ServiceKind, cost: f64) {
        let key = UsageKey::new(tenant(), kind, Timestamp::now().date());
        f.ledger.seed(&key, UsageTotals::new(cost, cost));
    }

    fn request(units: f64) -> MeteredRequest {
        MeteredRequest::new(tenant(), ServiceKind::Analysis, units)
    }

    #[tokio::test]
    async fn creates_default_setting_on_first_call() {
        let f = fixture();
        let value: Result<u32, GateError<CallError>> =
            f.gate.execute_metered(request(1.0), || async { Ok(7) }).await;
        assert_eq!(value.unwrap(), 7);

        let setting = f.settings.find(&tenant()).await.unwrap().unwrap();
        assert_eq!(setting.monthly_budget, 1000.0);
        assert_eq!(setting.alert_threshold_percent, 80);
    }

    #[tokio::test]
    async fn disabled_service_is_rejected_without_invoking() {
        let f = fixture();
        let setting =
            BudgetSetting::new(tenant(), 1000.0, 80).with_service_disabled(ServiceKind::Analysis);
        f.settings.put(setting);
        let calls = AtomicU32::new(0);

        let result: Result<(), GateError<CallError>> = f
            .gate
            .execute_metered(request(1.0), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert!(matches!(result, Err(GateError::ServiceDisabled(ServiceKind::Analysis))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.broker.published_of_type(METERED_CALL_FAILED).len(), 1);
    }

    #[tokio::test]
    async fn service_sub_limit_rejects_independently() {
        let f = fixture();
        let setting = BudgetSetting::new(tenant(), 1000.0, 80)
            .with_service_limit(ServiceKind::Analysis, 50.0);
        f.settings.put(setting);
        seed(&f, ServiceKind::Analysis, 45.0);

        let result: Result<(), GateError<CallError>> =
            f.gate.execute_metered(request(10.0), || async { Ok(()) }).await;
        match result {
            Err(GateError::BudgetExceeded(violation)) => assert_eq!(violation.limit, 50.0),
            other => panic!("expected budget rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn unusable_unit_estimates_are_refused_before_reserving() {
        let f = fixture();
        seed(&f, ServiceKind::Analysis, 90.0);
        let calls = AtomicU32::new(0);

        for units in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, -500.0] {
            let result: Result<(), GateError<CallError>> = f
                .gate
                .execute_metered(request(units), || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(()) }
                })
                .await;
            let err = result.unwrap_err();
            assert!(matches!(err, GateError::InvalidUnits(_)), "{units} gave {err:?}");
            assert!(err.is_rejection());
            assert_eq!(err.into_domain_error().code, ErrorCode::ValidationFailed);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.broker.published_of_type(METERED_CALL_FAILED).len(), 4);
        let summary = f.gate.usage_summary(&tenant()).await.unwrap();
        assert_eq!(summary.total_cost, 90.0);
    }

    #[tokio::test]
    async fn budget_still_enforced_after_a_refused_estimate() {
        let f = fixture();
        f.settings.put(BudgetSetting::new(tenant(), 100.0, 80));

        let refused: Result<(), GateError<CallError>> =
            f.gate.execute_metered(request(f64::NAN), || async { Ok(()) }).await;
        assert!(matches!(refused, Err(GateError::InvalidUnits(_))));

        let oversized: Result<(), GateError<CallError>> =
            f.gate.execute_metered(request(1_000_000.0), || async { Ok(()) }).await;
        assert!(matches!(oversized, Err(GateError::BudgetExceeded(_))));
        assert!(f.ledger.is_empty());
    }

    #[tokio::test]
    async fn zero_units_are_allowed() {
        let f = fixture();
        let result: Result<u8, GateError<CallError>> =
            f.gate.execute_metered(request(0.0), || async { Ok(1) }).await;
        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test]
    async fn failure_records_no_usage() {
        let f = fixture();
        let result: Result<(), GateError<CallError>> = f
            .gate
            .execute_metered(request(5.0), || async { Err(CallError("invalid prompt")) })
            .await;

        assert!(matches!(result, Err(GateError::NonRetryable { attempts: 1, .. })));
        assert!(f.ledger.is_empty());
        assert_eq!(f.broker.published_of_type(METERED_CALL_FAILED).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_then_surface_last_error() {
        let f = fixture();
        let calls = AtomicU32::new(0);

        let result: Result<(), GateError<CallError>> = f
            .gate
            .execute_metered(request(1.0), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CallError("upstream timeout")) }
            })
            .await;

        // Two failures open the breaker, so the third attempt is refused.
        match result {
            Err(GateError::CircuitOpen { name, .. }) => assert_eq!(name, "analysis"),
            other => panic!("expected open circuit, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn reservation_released_after_failure() {
        let f = fixture();
        seed(&f, ServiceKind::Analysis, 900.0);

        let _: Result<(), GateError<CallError>> = f
            .gate
            .execute_metered(request(80.0), || async { Err(CallError("bad input")) })
            .await;
        let ok: Result<(), GateError<CallError>> =
            f.gate.execute_metered(request(80.0), || async { Ok(()) }).await;

        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn cancelled_call_records_nothing() {
        let f = fixture();
        let (handle, signal) = CancelSignal::pair();
        handle.cancel();

        let result: Result<(), GateError<CallError>> = f
            .gate
            .execute_metered(request(1.0).with_cancel(signal), || async { Ok(()) })
            .await;

        assert!(matches!(result, Err(GateError::Cancelled)));
        assert!(f.ledger.is_empty());
        assert!(f.broker.published_of_type(METERED_CALL_FAILED).is_empty());
    }

    #[tokio::test]
    async fn events_target_requesting_user_or_tenant_room() {
        let f = fixture();
        let user = UserId::new("tutor-1").unwrap();

        let _: Result<(), GateError<CallError>> = f
            .gate
            .execute_metered(request(1.0).requested_by(user.clone()), || async { Ok(()) })
            .await;
        let _: Result<(), GateError<CallError>> =
            f.gate.execute_metered(request(1.0), || async { Ok(()) }).await;

        let completed = f.broker.published_of_type(METERED_CALL_COMPLETED);
        assert_eq!(completed[0].target, Target::User(user));
        assert_eq!(completed[1].target, Target::Room(RoomId::new("tenant_acme").unwrap()));
        assert_eq!(completed[1].channel, Channel::AnalysisProgress);
    }

    #[tokio::test]
    async fn usage_summary_breaks_down_by_service() {
        let f = fixture();
        seed(&f, ServiceKind::Analysis, 30.0);
        seed(&f, ServiceKind::Transcription, 20.0);

        let summary = f.gate.usage_summary(&tenant()).await.unwrap();
        assert_eq!(summary.total_cost, 50.0);
        let analysis = summary
            .by_service
            .iter()
            .find(|s| s.service_kind == ServiceKind::Analysis)
            .unwrap();
        assert_eq!(analysis.cost, 30.0);

        let status = f.gate.usage_status(&tenant()).await.unwrap();
        assert_eq!(status, UsageLimitStatus::UnderLimit { remaining: 950.0 });
    }

    #[test]
    fn gate_errors_project_to_codes() {
        let err: GateError<CallError> = GateError::CircuitOpen {
            name: "transcription".into(),
            retry_after: Duration::from_millis(1500),
        };
        let domain = err.into_domain_error();
        assert_eq!(domain.code, ErrorCode::CircuitOpen);
        assert_eq!(domain.details.get("retry_after_ms"), Some(&"1500".to_string()));

        let err: GateError<CallError> = GateError::RetryExhausted {
            attempts: 3,
            source: CallError("timeout"),
        };
        assert_eq!(err.code(), ErrorCode::RetryExhausted);
        assert_eq!(err.into_source().map(|e| e.0), Some("timeout"));
    }
}
