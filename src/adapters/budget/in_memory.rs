//! In-memory usage ledger and budget settings.
//!
//! Useful for:
//! - Tests
//! - Single-instance deployments that can lose usage on restart
//!
//! Multi-instance deployments need a shared ledger (see `RedisUsageLedger`),
//! otherwise each instance enforces the budget against its own spend only.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::domain::budget::{
    BillingPeriod, BudgetSetting, ServiceKind, UsageKey, UsageLedgerEntry, UsageTotals,
};
use crate::domain::foundation::TenantId;
use crate::ports::{BudgetSettingsRepository, LedgerError, UsageLedger};

/// In-memory implementation of the UsageLedger port.
///
/// # Example
///
/// ```ignore
/// let ledger = InMemoryUsageLedger::new();
/// ledger.seed(&key, UsageTotals::new(0.0, 790.0));
/// let totals = ledger.period_totals(&tenant, None, period).await?;
/// ```
#[derive(Debug, Default)]
pub struct InMemoryUsageLedger {
    rows: Mutex<HashMap<UsageKey, UsageTotals>>,
}

impl InMemoryUsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a row directly, bypassing increment. Test setup only.
    pub fn seed(&self, key: &UsageKey, totals: UsageTotals) {
        self.lock().insert(key.clone(), totals);
    }

    /// Every row, sorted by key.
    pub fn entries(&self) -> Vec<UsageLedgerEntry> {
        let mut entries: Vec<_> = self
            .lock()
            .iter()
            .map(|(key, totals)| UsageLedgerEntry {
                key: key.clone(),
                totals: *totals,
            })
            .collect();
        entries.sort_by(|a, b| {
            let left = (&a.key.tenant_id, a.key.service_kind, a.key.day);
            left.cmp(&(&b.key.tenant_id, b.key.service_kind, b.key.day))
        });
        entries
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<UsageKey, UsageTotals>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl UsageLedger for InMemoryUsageLedger {
    async fn increment(
        &self,
        key: &UsageKey,
        units: f64,
        cost: f64,
    ) -> Result<UsageLedgerEntry, LedgerError> {
        let mut rows = self.lock();
        let totals = rows.entry(key.clone()).or_default();
        *totals += UsageTotals::new(units, cost);
        Ok(UsageLedgerEntry {
            key: key.clone(),
            totals: *totals,
        })
    }

    async fn aggregate(
        &self,
        tenant: &TenantId,
        service_kind: Option<ServiceKind>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<UsageTotals, LedgerError> {
        let rows = self.lock();
        let mut totals = UsageTotals::default();
        for (key, row) in rows.iter() {
            let kind_matches = service_kind.map_or(true, |kind| kind == key.service_kind);
            if &key.tenant_id == tenant && kind_matches && key.day >= from && key.day <= to {
                totals += *row;
            }
        }
        Ok(totals)
    }

    async fn roll_over(&self, tenant: &TenantId, period: BillingPeriod) -> Result<(), LedgerError> {
        self.lock()
            .retain(|key, _| &key.tenant_id != tenant || key.day >= period.start());
        Ok(())
    }
}

/// In-memory implementation of the BudgetSettingsRepository port.
#[derive(Debug, Default)]
pub struct InMemoryBudgetSettings {
    settings: Mutex<HashMap<TenantId, BudgetSetting>>,
}

impl InMemoryBudgetSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores or replaces a tenant's setting.
    pub fn put(&self, setting: BudgetSetting) {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(setting.tenant_id.clone(), setting);
    }
}

#[async_trait]
impl BudgetSettingsRepository for InMemoryBudgetSettings {
    async fn find(&self, tenant: &TenantId) -> Result<Option<BudgetSetting>, LedgerError> {
        Ok(self
            .settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tenant)
            .cloned())
    }

    async fn insert_if_absent(&self, setting: BudgetSetting) -> Result<BudgetSetting, LedgerError> {
        Ok(self
            .settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(setting.tenant_id.clone())
            .or_insert(setting)
            .clone())
    }
}
