use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Tolerance for the weights-sum-to-one invariant.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// The sub-scores combined into a quality score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityComponent {
    SignalStrength,
    StructuralAlignment,
    OrderFlowQuality,
    RegimeFit,
    HistoricalPerformance,
}

impl QualityComponent {
    pub const ALL: [Self; 5] = [
        Self::SignalStrength,
        Self::StructuralAlignment,
        Self::OrderFlowQuality,
        Self::RegimeFit,
        Self::HistoricalPerformance,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::SignalStrength => "signal_strength",
            Self::StructuralAlignment => "structural_alignment",
            Self::OrderFlowQuality => "order_flow_quality",
            Self::RegimeFit => "regime_fit",
            Self::HistoricalPerformance => "historical_performance",
        }
    }
}

impl fmt::Display for QualityComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for QualityComponent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| format!("unknown quality component '{s}'"))
    }
}

/// Weight per quality component. Must sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityWeights {
    pub signal_strength: f64,
    pub structural_alignment: f64,
    pub order_flow_quality: f64,
    pub regime_fit: f64,
    pub historical_performance: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            signal_strength: 0.30,
            structural_alignment: 0.20,
            order_flow_quality: 0.20,
            regime_fit: 0.15,
            historical_performance: 0.15,
        }
    }
}

impl QualityWeights {
    #[must_use]
    pub const fn get(&self, component: QualityComponent) -> f64 {
        match component {
            QualityComponent::SignalStrength => self.signal_strength,
            QualityComponent::StructuralAlignment => self.structural_alignment,
            QualityComponent::OrderFlowQuality => self.order_flow_quality,
            QualityComponent::RegimeFit => self.regime_fit,
            QualityComponent::HistoricalPerformance => self.historical_performance,
        }
    }

    pub fn set(&mut self, component: QualityComponent, value: f64) {
        let slot = match component {
            QualityComponent::SignalStrength => &mut self.signal_strength,
            QualityComponent::StructuralAlignment => &mut self.structural_alignment,
            QualityComponent::OrderFlowQuality => &mut self.order_flow_quality,
            QualityComponent::RegimeFit => &mut self.regime_fit,
            QualityComponent::HistoricalPerformance => &mut self.historical_performance,
        };
        *slot = value;
    }

    #[must_use]
    pub fn sum(&self) -> f64 {
        QualityComponent::ALL.iter().map(|c| self.get(*c)).sum()
    }
}

/// Quality scorer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: QualityWeights,
    /// Value used for any sub-score nobody supplied
    pub neutral_value: f64,
    /// Multiplier on regime fit when the signal's assumed regime differs
    /// from the current one
    pub regime_mismatch_penalty: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: QualityWeights::default(),
            neutral_value: 0.5,
            regime_mismatch_penalty: 0.5,
        }
    }
}

fn unit_interval(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("{value} is outside [0, 1]")))
    }
}

impl ScoringConfig {
    /// # Errors
    /// Fails if any weight or bound is outside [0, 1] or the weights do not
    /// sum to 1.0.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for component in QualityComponent::ALL {
            unit_interval(
                &format!("scoring.weights.{component}"),
                self.weights.get(component),
            )?;
        }
        let sum = self.weights.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::invalid(
                "scoring.weights",
                format!("weights sum to {sum}, expected 1.0"),
            ));
        }
        unit_interval("scoring.neutral_value", self.neutral_value)?;
        unit_interval(
            "scoring.regime_mismatch_penalty",
            self.regime_mismatch_penalty,
        )?;
        Ok(())
    }
}

/// Conflict arbitration tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbitrationConfig {
    /// Multiplier on a strategy's quality when ranking; unlisted strategies use 1.0
    pub strategy_weights: BTreeMap<String, f64>,
    /// Weighted qualities closer than this are ranked as equal
    pub tie_epsilon: f64,
    /// How long the first signal for a conflict key waits for competitors
    /// from other producers before the group is decided (milliseconds)
    #[serde(with = "super::duration_millis")]
    pub window: Duration,
}

const MAX_ARBITRATION_WINDOW: Duration = Duration::from_secs(5);

impl Default for ArbitrationConfig {
    fn default() -> Self {
        Self {
            strategy_weights: BTreeMap::new(),
            tie_epsilon: 1e-9,
            window: Duration::from_millis(20),
        }
    }
}

impl ArbitrationConfig {
    #[must_use]
    pub fn strategy_weight(&self, strategy_id: &str) -> f64 {
        self.strategy_weights.get(strategy_id).copied().unwrap_or(1.0)
    }

    /// # Errors
    /// Fails on non-positive weights, an epsilon outside [0, 1), or a window
    /// longer than five seconds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (strategy, weight) in &self.strategy_weights {
            if !weight.is_finite() || *weight <= 0.0 {
                return Err(ConfigError::invalid(
                    format!("arbitration.strategy_weights.{strategy}"),
                    format!("{weight} must be positive"),
                ));
            }
        }
        if !self.tie_epsilon.is_finite() || !(0.0..1.0).contains(&self.tie_epsilon) {
            return Err(ConfigError::invalid(
                "arbitration.tie_epsilon",
                format!("{} is outside [0, 1)", self.tie_epsilon),
            ));
        }
        if self.window > MAX_ARBITRATION_WINDOW {
            return Err(ConfigError::invalid(
                "arbitration.window",
                format!(
                    "{}ms exceeds {}ms",
                    self.window.as_millis(),
                    MAX_ARBITRATION_WINDOW.as_millis()
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_scoring_config_is_valid() {
        assert!(ScoringConfig::default().validate().is_ok());
    }

    #[test]
    fn weights_not_summing_to_one_are_rejected() {
        let mut config = ScoringConfig::default();
        config.weights.signal_strength = 0.40;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sum to"));
    }

    #[test]
    fn weight_outside_unit_interval_is_rejected() {
        let mut config = ScoringConfig::default();
        config.weights.signal_strength = 1.2;
        config.weights.structural_alignment = -0.1;
        config.weights.order_flow_quality = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn component_names_round_trip() {
        for component in QualityComponent::ALL {
            assert_eq!(component.name().parse::<QualityComponent>(), Ok(component));
        }
        assert!("momentum".parse::<QualityComponent>().is_err());
    }

    #[test]
    fn arbitration_rejects_zero_weight() {
        let mut config = ArbitrationConfig::default();
        config.strategy_weights.insert("momentum".to_string(), 0.0);
        assert!(config.validate().is_err());
        assert_eq!(ArbitrationConfig::default().strategy_weight("anything"), 1.0);
    }

    #[test]
    fn arbitration_window_is_bounded() {
        let mut config = ArbitrationConfig::default();
        assert_eq!(config.window, Duration::from_millis(20));
        config.window = Duration::from_secs(6);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("arbitration.window"), "{err}");
        config.window = Duration::ZERO;
        assert!(config.validate().is_ok());
    }
}
