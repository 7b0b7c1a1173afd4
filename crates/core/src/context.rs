//! Read-only accessors for the feature/microstructure layer.
//!
//! The core only pulls from this layer at evaluation time. Missing data is
//! represented as `None` and resolved to a neutral fallback by the scorer.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::signal::MarketRegime;

/// Per-symbol features published by the feature layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    #[serde(default)]
    pub structural_alignment: Option<f64>,
    #[serde(default)]
    pub order_flow_quality: Option<f64>,
    #[serde(default)]
    pub regime_fit: Option<f64>,
    #[serde(default)]
    pub regime: Option<MarketRegime>,
    /// Current structural reference distance (e.g. ATR) for stop validation
    #[serde(default)]
    pub reference_stop_distance: Option<Decimal>,
}

/// Read-only accessor into the feature layer.
pub trait FeatureSource: Send + Sync {
    /// Returns the latest features for `symbol`, if any.
    fn features(&self, symbol: &str) -> Option<FeatureSnapshot>;
}

/// Feature source that never has data. Everything resolves to neutral.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFeatures;

impl FeatureSource for NoFeatures {
    fn features(&self, _symbol: &str) -> Option<FeatureSnapshot> {
        None
    }
}

/// Feature source backed by a fixed map, loaded from a file or built in tests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StaticFeatures {
    by_symbol: HashMap<String, FeatureSnapshot>,
}

impl StaticFeatures {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, symbol: impl Into<String>, snapshot: FeatureSnapshot) -> Self {
        self.by_symbol.insert(symbol.into(), snapshot);
        self
    }
}

impl FeatureSource for StaticFeatures {
    fn features(&self, symbol: &str) -> Option<FeatureSnapshot> {
        self.by_symbol.get(symbol).cloned()
    }
}

/// Everything the scorer and sizer see besides the signal itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketContext {
    /// Active regime for the symbol; `Unknown` when the feature layer is silent
    pub regime: MarketRegime,
    pub features: FeatureSnapshot,
    /// Historical performance of the originating strategy in [0, 1]
    pub strategy_performance: Option<f64>,
}

impl MarketContext {
    /// Builds the context for `symbol` from a feature source.
    #[must_use]
    pub fn from_source(source: &dyn FeatureSource, symbol: &str) -> Self {
        let features = source.features(symbol).unwrap_or_default();
        Self {
            regime: features.regime.unwrap_or_default(),
            features,
            strategy_performance: None,
        }
    }

    #[must_use]
    pub fn with_strategy_performance(mut self, performance: Option<f64>) -> Self {
        self.strategy_performance = performance;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_features_give_unknown_regime() {
        let ctx = MarketContext::from_source(&NoFeatures, "EURUSD");
        assert_eq!(ctx.regime, MarketRegime::Unknown);
        assert_eq!(ctx.features, FeatureSnapshot::default());
    }

    #[test]
    fn static_features_are_looked_up_by_symbol() {
        let source = StaticFeatures::new().with(
            "EURUSD",
            FeatureSnapshot {
                regime: Some(MarketRegime::Ranging),
                order_flow_quality: Some(0.7),
                ..FeatureSnapshot::default()
            },
        );
        let ctx = MarketContext::from_source(&source, "EURUSD");
        assert_eq!(ctx.regime, MarketRegime::Ranging);
        assert_eq!(ctx.features.order_flow_quality, Some(0.7));

        let other = MarketContext::from_source(&source, "GBPUSD");
        assert_eq!(other.regime, MarketRegime::Unknown);
    }
}
