//! Quality scoring: weighted combination of normalized sub-scores.

use decision_core::config::{QualityComponent, ScoringConfig};
use decision_core::{ConfigError, MarketContext, MarketRegime, Signal};
use serde::{Deserialize, Serialize};

/// Where a component's value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreSource {
    Signal,
    FeatureLayer,
    PerformanceBook,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentScore {
    pub component: QualityComponent,
    /// Value after clamping to [0, 1] and any regime penalty
    pub value: f64,
    pub weight: f64,
    pub contribution: f64,
    pub source: ScoreSource,
}

/// Weighted components and their bounded total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityScoreBreakdown {
    pub components: Vec<ComponentScore>,
    /// Always within [0, 1]
    pub total: f64,
    pub regime: MarketRegime,
    pub regime_mismatch: bool,
}

impl QualityScoreBreakdown {
    #[must_use]
    pub fn component(&self, component: QualityComponent) -> Option<&ComponentScore> {
        self.components.iter().find(|c| c.component == component)
    }
}

/// Stateless scorer over a validated [`ScoringConfig`].
///
/// A `QualityScorer` can only exist for a configuration that passed
/// validation, so [`QualityScorer::score`] has no failure path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ScoringConfig", into = "ScoringConfig")]
pub struct QualityScorer {
    config: ScoringConfig,
}

impl TryFrom<ScoringConfig> for QualityScorer {
    type Error = ConfigError;

    fn try_from(config: ScoringConfig) -> Result<Self, Self::Error> {
        Self::new(config)
    }
}

impl From<QualityScorer> for ScoringConfig {
    fn from(scorer: QualityScorer) -> Self {
        scorer.config
    }
}

impl QualityScorer {
    /// # Errors
    /// Returns [`ConfigError`] if the weights do not sum to 1.0 or any
    /// bound lies outside [0, 1].
    pub fn new(config: ScoringConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Scores a signal in its market context.
    ///
    /// Each component resolves from the signal's own sub-score first, then
    /// the feature layer (or the performance book for historical
    /// performance), then the neutral value. Out-of-range inputs are clamped.
    #[must_use]
    pub fn score(&self, signal: &Signal, ctx: &MarketContext) -> QualityScoreBreakdown {
        let inputs = &signal.inputs;
        let features = &ctx.features;
        let regime_mismatch = matches!(
            signal.tags.regime,
            Some(assumed) if assumed.is_known() && ctx.regime.is_known() && assumed != ctx.regime
        );

        let components: Vec<ComponentScore> = QualityComponent::ALL
            .into_iter()
            .map(|component| {
                let (raw, source) = match component {
                    QualityComponent::SignalStrength => {
                        pick(&[(inputs.signal_strength, ScoreSource::Signal)])
                    }
                    QualityComponent::StructuralAlignment => pick(&[
                        (inputs.structural_alignment, ScoreSource::Signal),
                        (features.structural_alignment, ScoreSource::FeatureLayer),
                    ]),
                    QualityComponent::OrderFlowQuality => pick(&[
                        (inputs.order_flow_quality, ScoreSource::Signal),
                        (features.order_flow_quality, ScoreSource::FeatureLayer),
                    ]),
                    QualityComponent::RegimeFit => pick(&[
                        (inputs.regime_fit, ScoreSource::Signal),
                        (features.regime_fit, ScoreSource::FeatureLayer),
                    ]),
                    QualityComponent::HistoricalPerformance => pick(&[
                        (inputs.historical_performance, ScoreSource::Signal),
                        (ctx.strategy_performance, ScoreSource::PerformanceBook),
                    ]),
                };

                let mut value = raw.map_or(self.config.neutral_value, |v| v.clamp(0.0, 1.0));
                if component == QualityComponent::RegimeFit && regime_mismatch {
                    value *= self.config.regime_mismatch_penalty;
                }

                let weight = self.config.weights.get(component);
                ComponentScore {
                    component,
                    value,
                    weight,
                    contribution: value * weight,
                    source,
                }
            })
            .collect();

        let total = components
            .iter()
            .map(|c| c.contribution)
            .sum::<f64>()
            .clamp(0.0, 1.0);

        QualityScoreBreakdown {
            components,
            total,
            regime: ctx.regime,
            regime_mismatch,
        }
    }
}

fn pick(candidates: &[(Option<f64>, ScoreSource)]) -> (Option<f64>, ScoreSource) {
    candidates
        .iter()
        .find_map(|(value, source)| value.map(|v| (Some(v), *source)))
        .unwrap_or((None, ScoreSource::Neutral))
}
