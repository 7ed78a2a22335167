//! Usage ledger records and aggregates.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

use crate::domain::foundation::TenantId;

use super::{BillingPeriod, ServiceKind};

/// Identity of one ledger row: a tenant's use of one service on one day.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UsageKey {
    pub tenant_id: TenantId,
    pub service_kind: ServiceKind,
    pub day: NaiveDate,
}

impl UsageKey {
    pub fn new(tenant_id: TenantId, service_kind: ServiceKind, day: NaiveDate) -> Self {
        Self {
            tenant_id,
            service_kind,
            day,
        }
    }
}

/// Units and cost accumulated under some key or range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub units: f64,
    pub cost: f64,
}

impl UsageTotals {
    pub fn new(units: f64, cost: f64) -> Self {
        Self { units, cost }
    }
}

impl AddAssign for UsageTotals {
    fn add_assign(&mut self, other: Self) {
        self.units += other.units;
        self.cost += other.cost;
    }
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageLedgerEntry {
    pub key: UsageKey,
    pub totals: UsageTotals,
}

/// Current-period usage of one service kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceUsage {
    pub service_kind: ServiceKind,
    pub units: f64,
    pub cost: f64,
    /// Sub-limit for this kind, if one is configured.
    pub limit: Option<f64>,
}

/// A tenant's usage over one billing period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub tenant_id: TenantId,
    pub period: BillingPeriod,
    pub total_cost: f64,
    pub monthly_budget: f64,
    pub by_service: Vec<ServiceUsage>,
}
