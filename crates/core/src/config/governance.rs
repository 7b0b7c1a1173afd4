use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use super::scoring::QualityComponent;
use crate::error::ConfigError;

/// A parameter an adaptive component may propose to change.
///
/// Serialized as `scoring.<component>` or `arbitration.<strategy_id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ParameterKey {
    ScoringWeight(QualityComponent),
    ArbitrationWeight(String),
}

impl fmt::Display for ParameterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ScoringWeight(component) => write!(f, "scoring.{component}"),
            Self::ArbitrationWeight(strategy) => write!(f, "arbitration.{strategy}"),
        }
    }
}

impl FromStr for ParameterKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some(("scoring", component)) => Ok(Self::ScoringWeight(component.parse()?)),
            Some(("arbitration", strategy)) if !strategy.is_empty() => {
                Ok(Self::ArbitrationWeight(strategy.to_string()))
            }
            _ => Err(format!(
                "unknown parameter '{s}', expected scoring.<component> or arbitration.<strategy>"
            )),
        }
    }
}

impl TryFrom<String> for ParameterKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ParameterKey> for String {
    fn from(key: ParameterKey) -> Self {
        key.to_string()
    }
}

/// Allowed movement for one parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterBound {
    pub key: ParameterKey,
    /// Maximum absolute distance from the baseline value
    pub max_delta: f64,
    pub min: f64,
    pub max: f64,
}

/// Lifecycle state of a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyState {
    #[default]
    Research,
    Paper,
    Production,
}

/// Settings for the performance degradation detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DegradationConfig {
    pub enabled: bool,
    /// Roll back when the recent mean drops below this fraction of the baseline
    pub min_fraction_of_baseline: f64,
    pub baseline_window: usize,
    pub recent_window: usize,
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_fraction_of_baseline: 0.5,
            baseline_window: 50,
            recent_window: 10,
        }
    }
}

/// Bounds on what an adaptive component may change. Loaded at startup,
/// never mutated by the real-time path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernancePolicy {
    pub bounds: Vec<ParameterBound>,
    pub strategies: HashMap<String, StrategyState>,
    pub degradation: DegradationConfig,
    /// Directory for persisted snapshots; in-memory when unset
    pub snapshot_dir: Option<PathBuf>,
}

impl Default for GovernancePolicy {
    fn default() -> Self {
        let bounds = QualityComponent::ALL
            .into_iter()
            .map(|component| ParameterBound {
                key: ParameterKey::ScoringWeight(component),
                max_delta: 0.10,
                min: 0.0,
                max: 1.0,
            })
            .collect();
        Self {
            bounds,
            strategies: HashMap::new(),
            degradation: DegradationConfig::default(),
            snapshot_dir: None,
        }
    }
}

impl GovernancePolicy {
    #[must_use]
    pub fn bound(&self, key: &ParameterKey) -> Option<&ParameterBound> {
        self.bounds.iter().find(|b| &b.key == key)
    }

    #[must_use]
    pub fn strategy_state(&self, strategy_id: &str) -> StrategyState {
        self.strategies
            .get(strategy_id)
            .copied()
            .unwrap_or_default()
    }

    /// # Errors
    /// Fails on duplicate or inverted bounds and invalid detector settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (i, bound) in self.bounds.iter().enumerate() {
            let field = format!("governance.bounds.{}", bound.key);
            if self.bounds[..i].iter().any(|b| b.key == bound.key) {
                return Err(ConfigError::invalid(field, "duplicate bound"));
            }
            if !bound.max_delta.is_finite() || bound.max_delta < 0.0 {
                return Err(ConfigError::invalid(field, "max_delta must be >= 0"));
            }
            if !(bound.min.is_finite() && bound.max.is_finite()) || bound.min > bound.max {
                return Err(ConfigError::invalid(field, "min must be <= max"));
            }
            if matches!(bound.key, ParameterKey::ScoringWeight(_))
                && (bound.min < 0.0 || bound.max > 1.0)
            {
                return Err(ConfigError::invalid(
                    field,
                    "scoring weight bounds must lie within [0, 1]",
                ));
            }
            if matches!(bound.key, ParameterKey::ArbitrationWeight(_)) && bound.min <= 0.0 {
                return Err(ConfigError::invalid(
                    field,
                    "arbitration weight bounds must be positive",
                ));
            }
        }

        let d = &self.degradation;
        if !d.min_fraction_of_baseline.is_finite()
            || d.min_fraction_of_baseline <= 0.0
            || d.min_fraction_of_baseline > 1.0
        {
            return Err(ConfigError::invalid(
                "governance.degradation.min_fraction_of_baseline",
                "must be in (0, 1]",
            ));
        }
        if d.recent_window == 0 || d.baseline_window == 0 {
            return Err(ConfigError::invalid(
                "governance.degradation",
                "windows must be non-empty",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_keys_parse_and_display() {
        let key: ParameterKey = "scoring.regime_fit".parse().unwrap();
        assert_eq!(key, ParameterKey::ScoringWeight(QualityComponent::RegimeFit));
        assert_eq!(key.to_string(), "scoring.regime_fit");

        let key: ParameterKey = "arbitration.momentum".parse().unwrap();
        assert_eq!(key, ParameterKey::ArbitrationWeight("momentum".to_string()));

        assert!("risk.max_risk_pct".parse::<ParameterKey>().is_err());
        assert!("arbitration.".parse::<ParameterKey>().is_err());
    }

    #[test]
    fn default_policy_bounds_every_scoring_weight() {
        let policy = GovernancePolicy::default();
        assert!(policy.validate().is_ok());
        for component in QualityComponent::ALL {
            let bound = policy.bound(&ParameterKey::ScoringWeight(component)).unwrap();
            assert!((bound.max_delta - 0.10).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn duplicate_bounds_are_rejected() {
        let mut policy = GovernancePolicy::default();
        let first = policy.bounds[0].clone();
        policy.bounds.push(first);
        assert!(policy.validate().is_err());
    }

    #[test]
    fn unknown_strategy_defaults_to_research() {
        let policy = GovernancePolicy::default();
        assert_eq!(policy.strategy_state("new-idea"), StrategyState::Research);
    }
}
