//! Budget domain - metered services, tenant ceilings and usage accounting.
//!
//! Pure values and rules. Storage is behind the `UsageLedger` and
//! `BudgetSettingsRepository` ports; orchestration lives in the
//! application-layer `BudgetGate`.

mod limits;
mod period;
mod service_kind;
mod setting;
mod usage;

pub use limits::{
    check_projection, detect_crossings, BudgetScope, BudgetViolation, CrossingKind, PeriodSpend,
    ThresholdCrossing, UsageLimitStatus,
};
pub use period::BillingPeriod;
pub use service_kind::{ServiceKind, UnitRates};
pub use setting::{BudgetSetting, ServiceLimit, DEFAULT_ALERT_THRESHOLD_PERCENT};
pub use usage::{ServiceUsage, UsageKey, UsageLedgerEntry, UsageSummary, UsageTotals};
