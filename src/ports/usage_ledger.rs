//! UsageLedger port - Interface for recording and reading metered usage.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::domain::budget::{BillingPeriod, ServiceKind, UsageKey, UsageLedgerEntry, UsageTotals};
use crate::domain::foundation::{DomainError, ErrorCode, TenantId};

/// Errors from the usage ledger.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    /// Backing store unreachable or rejected the command.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    /// Stored value could not be read.
    #[error("corrupt ledger value for {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl From<LedgerError> for DomainError {
    fn from(err: LedgerError) -> Self {
        DomainError::new(ErrorCode::LedgerUnavailable, err.to_string())
    }
}

/// Port for the per-(tenant, service kind, day) usage ledger.
///
/// Rows only ever grow within a billing period; the only way down is
/// [`roll_over`](UsageLedger::roll_over).
#[async_trait]
pub trait UsageLedger: Send + Sync {
    /// Atomically adds to a row, creating it if needed. Returns the row's
    /// totals after the increment.
    async fn increment(
        &self,
        key: &UsageKey,
        units: f64,
        cost: f64,
    ) -> Result<UsageLedgerEntry, LedgerError>;

    /// Sum of rows for `tenant` with `from <= day <= to`, optionally
    /// restricted to one service kind.
    async fn aggregate(
        &self,
        tenant: &TenantId,
        service_kind: Option<ServiceKind>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<UsageTotals, LedgerError>;

    /// Discards `tenant`'s rows dated before `period` starts.
    async fn roll_over(&self, tenant: &TenantId, period: BillingPeriod) -> Result<(), LedgerError>;

    /// Sum over a whole billing period.
    async fn period_totals(
        &self,
        tenant: &TenantId,
        service_kind: Option<ServiceKind>,
        period: BillingPeriod,
    ) -> Result<UsageTotals, LedgerError> {
        self.aggregate(tenant, service_kind, period.start(), period.end()).await
    }
}
