//! Named breaker cache so every call site for one dependency shares state.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics};

/// Process-wide map of dependency name to breaker.
///
/// Construct one per process and inject it; creation is idempotent and the
/// first caller's configuration wins. A later call with a different config
/// gets the existing breaker unchanged.
#[derive(Debug)]
pub struct BreakerRegistry {
    default_config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl BreakerRegistry {
    /// Creates a registry whose breakers use `default_config` unless the
    /// first caller for a name supplies its own.
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            default_config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the breaker for `name`, creating it on first use.
    pub fn get_breaker(
        &self,
        name: &str,
        config: Option<CircuitBreakerConfig>,
    ) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.read().get(name) {
            warn_if_ignored(existing, config.as_ref());
            return existing.clone();
        }

        let mut breakers = self.breakers.write().unwrap_or_else(PoisonError::into_inner);
        let breaker = breakers.entry(name.to_string()).or_insert_with(|| {
            let config = config.clone().unwrap_or_else(|| self.default_config.clone());
            tracing::debug!(
                breaker = %name,
                threshold = config.failure_threshold,
                "breaker created"
            );
            Arc::new(CircuitBreaker::new(name, config))
        });
        warn_if_ignored(breaker, config.as_ref());
        breaker.clone()
    }

    /// Looks up an existing breaker without creating one.
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.read().get(name).cloned()
    }

    /// Forces every breaker to closed with zero failures.
    pub fn reset_all(&self) {
        for breaker in self.read().values() {
            breaker.reset();
        }
    }

    /// Snapshot of every breaker, sorted by name.
    pub fn metrics(&self) -> Vec<(String, CircuitBreakerMetrics)> {
        let mut snapshot: Vec<_> = self
            .read()
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.metrics()))
            .collect();
        snapshot.sort_by(|a, b| a.0.cmp(&b.0));
        snapshot
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<CircuitBreaker>>> {
        self.breakers.read().unwrap_or_else(PoisonError::into_inner)
    }
}

fn warn_if_ignored(breaker: &CircuitBreaker, requested: Option<&CircuitBreakerConfig>) {
    if ignores_requested_config(breaker, requested) {
        tracing::warn!(
            breaker = %breaker.name(),
            threshold = breaker.config().failure_threshold,
            "breaker already exists; requested config ignored"
        );
    }
}

/// True when a caller asked for a config the existing breaker does not have.
fn ignores_requested_config(
    breaker: &CircuitBreaker,
    requested: Option<&CircuitBreakerConfig>,
) -> bool {
    requested.is_some_and(|requested| requested != breaker.config())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::resilience::CircuitState;
    use std::time::Duration;

    #[derive(Debug, thiserror::Error)]
    #[error("down")]
    struct Down;

    #[test]
    fn same_name_returns_same_instance() {
        let registry = BreakerRegistry::default();
        let a = registry.get_breaker("transcription", None);
        let b = registry.get_breaker("transcription", None);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn first_config_wins() {
        let registry = BreakerRegistry::default();
        let first = CircuitBreakerConfig::new(2, Duration::from_secs(5), Duration::from_secs(60));
        let second = CircuitBreakerConfig::new(
            9,
            Duration::from_secs(90),
            Duration::from_secs(600),
        );

        registry.get_breaker("llm", Some(first.clone()));
        let breaker = registry.get_breaker("llm", Some(second));

        assert_eq!(breaker.config(), &first);
    }

    #[test]
    fn only_a_differing_request_counts_as_ignored() {
        let registry = BreakerRegistry::default();
        let first = CircuitBreakerConfig::new(2, Duration::from_secs(5), Duration::from_secs(60));
        let other = CircuitBreakerConfig::new(9, Duration::from_secs(90), Duration::from_secs(600));
        let breaker = registry.get_breaker("speech", Some(first.clone()));

        assert!(ignores_requested_config(&breaker, Some(&other)));
        assert!(!ignores_requested_config(&breaker, Some(&first)));
        assert!(!ignores_requested_config(&breaker, None));
    }

    #[test]
    fn default_config_applies_when_none_given() {
        let registry = BreakerRegistry::default();
        let breaker = registry.get_breaker("analysis", None);
        assert_eq!(breaker.config(), &CircuitBreakerConfig::default());
    }

    #[tokio::test]
    async fn reset_all_closes_every_breaker() {
        let registry = BreakerRegistry::new(CircuitBreakerConfig::new(
            1,
            Duration::from_secs(30),
            Duration::from_secs(120),
        ));
        for name in ["a", "b"] {
            let breaker = registry.get_breaker(name, None);
            let _ = breaker.execute(|| async { Err::<(), _>(Down) }).await;
            assert_eq!(breaker.state(), CircuitState::Open);
        }

        registry.reset_all();

        assert!(registry
            .metrics()
            .iter()
            .all(|(_, m)| m.state == CircuitState::Closed && m.current_failures == 0));
    }

    #[test]
    fn metrics_sorted_by_name() {
        let registry = BreakerRegistry::default();
        registry.get_breaker("zeta", None);
        registry.get_breaker("alpha", None);
        let names: Vec<_> = registry.metrics().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert!(registry.get("missing").is_none());
    }
}
