//! The tunable parameter set and its published store.

use decision_core::config::{ArbitrationConfig, EngineConfig, ParameterKey};
use decision_core::{ConfigError, LockName, LockTimeout};
use decision_risk::QualityScorer;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Everything the adaptive layer may influence, and nothing else.
///
/// Hard risk caps, exposure limits, and breaker thresholds are not part of
/// this type, so no accepted change can reach them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunableParameters {
    pub scorer: QualityScorer,
    pub arbitration: ArbitrationConfig,
    #[serde(default)]
    pub disabled_strategies: BTreeSet<String>,
}

impl TunableParameters {
    /// Baseline parameters from the configuration bundle.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the scoring or arbitration section is invalid.
    pub fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        config.arbitration.validate()?;
        Ok(Self {
            scorer: QualityScorer::new(config.scoring.clone())?,
            arbitration: config.arbitration.clone(),
            disabled_strategies: BTreeSet::new(),
        })
    }

    #[must_use]
    pub fn value(&self, key: &ParameterKey) -> f64 {
        match key {
            ParameterKey::ScoringWeight(component) => {
                self.scorer.config().weights.get(*component)
            }
            ParameterKey::ArbitrationWeight(strategy) => {
                self.arbitration.strategy_weight(strategy)
            }
        }
    }

    #[must_use]
    pub fn is_disabled(&self, strategy_id: &str) -> bool {
        self.disabled_strategies.contains(strategy_id)
    }
}

/// Read-mostly handle on the live parameters.
///
/// Readers clone the `Arc` and never hold the lock while scoring. Only the
/// governance guard can publish a new set.
#[derive(Debug)]
pub struct ParameterStore {
    current: RwLock<Arc<TunableParameters>>,
    lock_timeout: Duration,
}

impl ParameterStore {
    #[must_use]
    pub fn new(parameters: TunableParameters, lock_timeout: Duration) -> Self {
        Self {
            current: RwLock::new(Arc::new(parameters)),
            lock_timeout,
        }
    }

    /// # Errors
    /// Returns [`LockTimeout`] if a publish is holding the lock past the timeout.
    pub fn current(&self) -> Result<Arc<TunableParameters>, LockTimeout> {
        self.current
            .try_read_for(self.lock_timeout)
            .map(|guard| Arc::clone(&guard))
            .ok_or(LockTimeout::new(LockName::Parameters, self.lock_timeout))
    }

    /// Publishes `next` and returns the set it replaced.
    pub(crate) fn replace(
        &self,
        next: TunableParameters,
    ) -> Result<Arc<TunableParameters>, LockTimeout> {
        let mut guard = self
            .current
            .try_write_for(self.lock_timeout)
            .ok_or(LockTimeout::new(LockName::Parameters, self.lock_timeout))?;
        Ok(std::mem::replace(&mut *guard, Arc::new(next)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use decision_core::config::QualityComponent;

    #[test]
    fn baseline_reads_weights_from_bundle() {
        let mut config = EngineConfig::default();
        config
            .arbitration
            .strategy_weights
            .insert("breakout".to_string(), 1.2);
        let params = TunableParameters::from_config(&config).unwrap();

        let key = ParameterKey::ScoringWeight(QualityComponent::SignalStrength);
        assert!((params.value(&key) - 0.30).abs() < 1e-12);
        let key = ParameterKey::ArbitrationWeight("breakout".to_string());
        assert!((params.value(&key) - 1.2).abs() < 1e-12);
        let key = ParameterKey::ArbitrationWeight("unlisted".to_string());
        assert!((params.value(&key) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn replace_publishes_and_returns_previous() {
        let params = TunableParameters::from_config(&EngineConfig::default()).unwrap();
        let store = ParameterStore::new(params.clone(), Duration::from_millis(50));
        let reader = store.current().unwrap();

        let mut next = params.clone();
        next.disabled_strategies.insert("mean-revert".to_string());
        let previous = store.replace(next).unwrap();

        assert_eq!(*previous, params);
        assert!(!reader.is_disabled("mean-revert"));
        assert!(store.current().unwrap().is_disabled("mean-revert"));
    }
}
