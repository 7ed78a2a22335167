//! Budget defaults and unit pricing

use serde::Deserialize;
use std::collections::HashMap;

use crate::application::BudgetDefaults;
use crate::domain::budget::{ServiceKind, UnitRates, DEFAULT_ALERT_THRESHOLD_PERCENT};

use super::error::ValidationError;

/// Budget configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BudgetConfig {
    /// Monthly budget given to a tenant on its first metered call
    #[serde(default = "default_monthly_budget")]
    pub default_monthly_budget: f64,

    #[serde(default = "default_alert_threshold")]
    pub alert_threshold_percent: u8,

    /// Per-unit price overrides keyed by service kind
    /// (`LESSON_RELAY__BUDGET__UNIT_RATES__ANALYSIS=0.02`)
    #[serde(default)]
    pub unit_rates: HashMap<String, f64>,
}

impl BudgetConfig {
    pub fn defaults(&self) -> BudgetDefaults {
        BudgetDefaults {
            monthly_budget: self.default_monthly_budget,
            alert_threshold_percent: self.alert_threshold_percent,
        }
    }

    /// Default rates with the configured overrides applied.
    pub fn unit_rates(&self) -> Result<UnitRates, ValidationError> {
        let mut rates = UnitRates::default();
        for (name, rate) in &self.unit_rates {
            let kind: ServiceKind = name
                .parse()
                .map_err(|_| ValidationError::UnknownServiceKind(name.clone()))?;
            if !rate.is_finite() || *rate < 0.0 {
                return Err(ValidationError::InvalidUnitRate(name.clone()));
            }
            rates = rates.with_rate(kind, *rate);
        }
        Ok(rates)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.default_monthly_budget.is_finite() || self.default_monthly_budget < 0.0 {
            return Err(ValidationError::InvalidBudget);
        }
        if self.alert_threshold_percent == 0 || self.alert_threshold_percent > 100 {
            return Err(ValidationError::InvalidAlertThreshold);
        }
        self.unit_rates()?;
        Ok(())
    }
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            default_monthly_budget: default_monthly_budget(),
            alert_threshold_percent: default_alert_threshold(),
            unit_rates: HashMap::new(),
        }
    }
}

fn default_monthly_budget() -> f64 {
    1000.0
}

fn default_alert_threshold() -> u8 {
    DEFAULT_ALERT_THRESHOLD_PERCENT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_defaults() {
        let config = BudgetConfig::default();
        assert_eq!(config.defaults(), BudgetDefaults::default());
        assert_eq!(config.unit_rates().unwrap(), UnitRates::default());
    }

    #[test]
    fn test_unit_rate_override() {
        let config = BudgetConfig {
            unit_rates: HashMap::from([("analysis".to_string(), 0.5)]),
            ..Default::default()
        };
        assert_eq!(config.unit_rates().unwrap().rate(ServiceKind::Analysis), 0.5);
    }

    #[test]
    fn test_unknown_service_kind_rejected() {
        let config = BudgetConfig {
            unit_rates: HashMap::from([("fax".to_string(), 1.0)]),
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ValidationError::UnknownServiceKind("fax".to_string()))
        );
    }

    #[test]
    fn test_validation_alert_threshold_range() {
        let config = BudgetConfig {
            alert_threshold_percent: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ValidationError::InvalidAlertThreshold));
    }

    #[test]
    fn test_validation_negative_budget() {
        let config = BudgetConfig {
            default_monthly_budget: -1.0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ValidationError::InvalidBudget));
    }
}
