//! Per-tenant budget settings.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::foundation::{TenantId, Timestamp};

use super::ServiceKind;

/// Default alert threshold as a percentage of the monthly budget.
pub const DEFAULT_ALERT_THRESHOLD_PERCENT: u8 = 80;

/// Per-service override within a tenant budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceLimit {
    /// Monthly cap for this service alone. `None` means only the tenant-wide
    /// budget applies.
    pub monthly_limit: Option<f64>,
    pub enabled: bool,
}

impl Default for ServiceLimit {
    fn default() -> Self {
        Self {
            monthly_limit: None,
            enabled: true,
        }
    }
}

/// A tenant's spending ceiling for metered calls.
///
/// Created lazily with defaults the first time a tenant makes a metered
/// call; edited elsewhere in the console.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetSetting {
    pub tenant_id: TenantId,
    pub monthly_budget: f64,
    pub alert_threshold_percent: u8,
    #[serde(default)]
    pub service_limits: HashMap<ServiceKind, ServiceLimit>,
    pub created_at: Timestamp,
}

impl BudgetSetting {
    pub fn new(tenant_id: TenantId, monthly_budget: f64, alert_threshold_percent: u8) -> Self {
        Self {
            tenant_id,
            monthly_budget,
            alert_threshold_percent: alert_threshold_percent.min(100),
            service_limits: HashMap::new(),
            created_at: Timestamp::now(),
        }
    }

    /// Cap a single service kind.
    pub fn with_service_limit(mut self, kind: ServiceKind, monthly_limit: f64) -> Self {
        self.service_limits.entry(kind).or_default().monthly_limit = Some(monthly_limit);
        self
    }

    /// Turn a service kind off for this tenant.
    pub fn with_service_disabled(mut self, kind: ServiceKind) -> Self {
        self.service_limits.entry(kind).or_default().enabled = false;
        self
    }

    pub fn is_enabled(&self, kind: ServiceKind) -> bool {
        self.service_limits.get(&kind).map_or(true, |limit| limit.enabled)
    }

    pub fn service_limit(&self, kind: ServiceKind) -> Option<f64> {
        self.service_limits.get(&kind).and_then(|limit| limit.monthly_limit)
    }

    /// Spend at which the alert threshold is reached for a given limit.
    pub fn alert_amount(&self, limit: f64) -> f64 {
        limit * f64::from(self.alert_threshold_percent) / 100.0
    }
}
