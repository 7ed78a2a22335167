//! Metered external dependencies and their unit pricing.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::domain::foundation::ValidationError;

/// An external service whose calls are metered against a tenant budget.
///
/// Each kind also names the circuit breaker guarding that dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Transcription,
    SpeechSynthesis,
    LlmCompletion,
    Analysis,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 4] = [
        ServiceKind::Transcription,
        ServiceKind::SpeechSynthesis,
        ServiceKind::LlmCompletion,
        ServiceKind::Analysis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Transcription => "transcription",
            ServiceKind::SpeechSynthesis => "speech_synthesis",
            ServiceKind::LlmCompletion => "llm_completion",
            ServiceKind::Analysis => "analysis",
        }
    }

    /// Cost per unit when no override is configured.
    pub fn default_unit_rate(&self) -> f64 {
        match self {
            // per second of audio
            ServiceKind::Transcription => 0.0001,
            // per character
            ServiceKind::SpeechSynthesis => 0.000015,
            // per token
            ServiceKind::LlmCompletion => 0.000002,
            // per analysed submission
            ServiceKind::Analysis => 0.05,
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServiceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| {
                ValidationError::invalid_format("service_kind", format!("unknown kind '{}'", s))
            })
    }
}

/// Fixed per-unit rate for each service kind.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitRates {
    rates: HashMap<ServiceKind, f64>,
}

impl Default for UnitRates {
    fn default() -> Self {
        Self {
            rates: ServiceKind::ALL
                .into_iter()
                .map(|kind| (kind, kind.default_unit_rate()))
                .collect(),
        }
    }
}

impl UnitRates {
    /// Override the rate for one kind.
    pub fn with_rate(mut self, kind: ServiceKind, rate: f64) -> Self {
        self.rates.insert(kind, rate);
        self
    }

    /// Every kind priced at the same rate.
    pub fn uniform(rate: f64) -> Self {
        Self {
            rates: ServiceKind::ALL.into_iter().map(|kind| (kind, rate)).collect(),
        }
    }

    pub fn rate(&self, kind: ServiceKind) -> f64 {
        self.rates
            .get(&kind)
            .copied()
            .unwrap_or_else(|| kind.default_unit_rate())
    }

    /// Cost of `units` of `kind`. No rounding is applied.
    pub fn cost(&self, kind: ServiceKind, units: f64) -> f64 {
        units * self.rate(kind)
    }
}
