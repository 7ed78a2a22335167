//! Budget checks and threshold crossing detection.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{BudgetSetting, ServiceKind};

/// Which ceiling a check or crossing refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "service_kind", rename_all = "snake_case")]
pub enum BudgetScope {
    /// The tenant-wide monthly budget.
    Tenant,
    /// A per-service sub-limit.
    Service(ServiceKind),
}

impl fmt::Display for BudgetScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BudgetScope::Tenant => write!(f, "tenant budget"),
            BudgetScope::Service(kind) => write!(f, "{} limit", kind),
        }
    }
}

/// A call that would take usage past a ceiling.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetViolation {
    pub scope: BudgetScope,
    pub limit: f64,
    pub current: f64,
    pub projected: f64,
}

impl fmt::Display for BudgetViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} would be exceeded (current {}, projected {})",
            self.scope, self.limit, self.current, self.projected
        )
    }
}

/// Current-period spend the check is made against.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PeriodSpend {
    pub tenant: f64,
    pub service: f64,
}

/// Rejects the call if `cost` on top of `spend` passes the tenant budget or
/// the service sub-limit. Reaching a limit exactly is allowed.
pub fn check_projection(
    setting: &BudgetSetting,
    kind: ServiceKind,
    spend: PeriodSpend,
    cost: f64,
) -> Result<(), BudgetViolation> {
    let projected = spend.tenant + cost;
    if projected > setting.monthly_budget {
        return Err(BudgetViolation {
            scope: BudgetScope::Tenant,
            limit: setting.monthly_budget,
            current: spend.tenant,
            projected,
        });
    }

    if let Some(limit) = setting.service_limit(kind) {
        let projected = spend.service + cost;
        if projected > limit {
            return Err(BudgetViolation {
                scope: BudgetScope::Service(kind),
                limit,
                current: spend.service,
                projected,
            });
        }
    }

    Ok(())
}

/// Which threshold was crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossingKind {
    AlertThreshold,
    HardLimit,
}

/// Usage moved from below a threshold to at-or-above it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdCrossing {
    pub scope: BudgetScope,
    pub kind: CrossingKind,
    pub threshold: f64,
    pub limit: f64,
    pub total: f64,
}

impl ThresholdCrossing {
    pub fn event_type(&self) -> &'static str {
        match self.kind {
            CrossingKind::AlertThreshold => "budget.alert_threshold_crossed",
            CrossingKind::HardLimit => "budget.limit_reached",
        }
    }
}

/// Thresholds crossed by moving from `before` to `after`.
///
/// Only a move from strictly below to at-or-above counts, so a given
/// threshold yields at most one crossing per period as long as `before` is
/// read under the same serialization as the increment.
pub fn detect_crossings(
    setting: &BudgetSetting,
    kind: ServiceKind,
    before: PeriodSpend,
    after: PeriodSpend,
) -> Vec<ThresholdCrossing> {
    let mut crossings = Vec::new();
    let mut check = |scope: BudgetScope, limit: f64, before: f64, after: f64| {
        let alert = setting.alert_amount(limit);
        for (crossing_kind, threshold) in [
            (CrossingKind::AlertThreshold, alert),
            (CrossingKind::HardLimit, limit),
        ] {
            if before < threshold && after >= threshold {
                crossings.push(ThresholdCrossing {
                    scope,
                    kind: crossing_kind,
                    threshold,
                    limit,
                    total: after,
                });
            }
        }
    };

    check(BudgetScope::Tenant, setting.monthly_budget, before.tenant, after.tenant);
    if let Some(limit) = setting.service_limit(kind) {
        check(BudgetScope::Service(kind), limit, before.service, after.service);
    }
    crossings
}

/// Status of usage relative to a limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UsageLimitStatus {
    /// Under the alert threshold.
    UnderLimit { remaining: f64 },
    /// At or past the alert threshold but below the limit.
    Warning { remaining: f64, percent_used: u8 },
    /// At or over the limit.
    AtLimit,
}

impl UsageLimitStatus {
    /// Calculates limit status from current usage, the limit and the alert
    /// threshold percentage.
    pub fn from_usage(current: f64, limit: f64, alert_threshold_percent: u8) -> Self {
        if limit <= 0.0 || current >= limit {
            return Self::AtLimit;
        }

        let remaining = limit - current;
        let percent_used = ((current / limit) * 100.0) as u8;
        if percent_used >= alert_threshold_percent {
            Self::Warning {
                remaining,
                percent_used,
            }
        } else {
            Self::UnderLimit { remaining }
        }
    }

    /// Returns true if further spend is blocked.
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::AtLimit)
    }

    /// Returns true if the tenant should be warned.
    pub fn should_warn(&self) -> bool {
        matches!(self, Self::Warning { .. })
    }
}
