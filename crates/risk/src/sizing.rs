//! Quality-weighted, instrument-aware position sizing.

use decision_core::config::SizingConfig;
use decision_core::{ConfigError, InstrumentSpec, RejectReason};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Decimal places kept on risk percentages (hundredths of a basis point).
const RISK_PCT_DP: u32 = 4;

/// Candidate produced by the sizer, before exposure and breaker checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizedPosition {
    /// Target risk, within `[min_risk_pct, max_risk_pct]`
    pub risk_pct: Decimal,
    /// Lots after rounding down to the instrument's lot step
    pub position_size: Decimal,
    /// Risk actually taken after lot rounding; never above `risk_pct`
    pub effective_risk_pct: Decimal,
}

/// Maps a quality score to a risk percentage and a lot size.
#[derive(Debug, Clone)]
pub struct PositionSizer {
    config: SizingConfig,
}

impl PositionSizer {
    /// # Errors
    /// Returns [`ConfigError`] if `min_quality_score >= 1.0` or the risk band
    /// is inconsistent, so the hot path never divides by zero.
    pub fn new(config: SizingConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub fn config(&self) -> &SizingConfig {
        &self.config
    }

    /// Linear map from quality to risk:
    /// `min_risk + (q - min_q) / (1 - min_q) * (max_risk - min_risk)`.
    ///
    /// # Errors
    /// Returns `QualityTooLow` when `quality < min_quality_score`.
    pub fn risk_pct_for(&self, quality: f64) -> Result<Decimal, RejectReason> {
        let min_q = self.config.min_quality_score;
        if !quality.is_finite() || quality < min_q {
            return Err(RejectReason::QualityTooLow {
                score: quality,
                min: min_q,
            });
        }

        // 1 - min_q > 0 is guaranteed by SizingConfig::validate.
        let fraction = ((quality - min_q) / (1.0 - min_q)).clamp(0.0, 1.0);
        let fraction = Decimal::from_f64(fraction).unwrap_or(Decimal::ONE);

        let min_risk = self.config.min_risk_pct;
        let max_risk = self.config.max_risk_pct;
        let risk = (min_risk + fraction * (max_risk - min_risk))
            .round_dp_with_strategy(RISK_PCT_DP, RoundingStrategy::ToZero);

        Ok(risk
            .clamp(min_risk, max_risk)
            .min(self.config.max_risk_per_idea_pct))
    }

    /// Checks the stop distance against `[min_multiple, max_multiple] x reference`.
    ///
    /// `reference` is the feature layer's current structural distance; the
    /// instrument's configured reference is used when it is missing.
    ///
    /// # Errors
    /// Returns `StopDistanceUnreasonable` for too-tight or too-wide stops.
    pub fn validate_stop(
        &self,
        instrument: &InstrumentSpec,
        stop_distance: Decimal,
        reference: Option<Decimal>,
    ) -> Result<(), RejectReason> {
        let reference = reference
            .filter(|r| *r > Decimal::ZERO)
            .unwrap_or(instrument.reference_stop_distance);
        let min = reference * instrument.min_stop_multiple;
        let max = reference * instrument.max_stop_multiple;
        if stop_distance < min || stop_distance > max {
            return Err(RejectReason::StopDistanceUnreasonable {
                distance: stop_distance,
                min,
                max,
            });
        }
        Ok(())
    }

    /// Sizes a position.
    ///
    /// # Errors
    /// Returns `QualityTooLow`, `StopDistanceUnreasonable`, or
    /// `PositionTooSmall`.
    pub fn size(
        &self,
        quality: f64,
        instrument: &InstrumentSpec,
        stop_distance: Decimal,
        reference: Option<Decimal>,
        equity: Decimal,
    ) -> Result<SizedPosition, RejectReason> {
        let risk_pct = self.risk_pct_for(quality)?;
        self.validate_stop(instrument, stop_distance, reference)?;

        let risk_amount = equity.max(Decimal::ZERO) * risk_pct / Decimal::ONE_HUNDRED;
        let risk_per_lot = stop_distance * instrument.value_per_point;
        let lots = instrument
            .round_down_lots(risk_amount / risk_per_lot)
            .min(instrument.max_lot);

        if lots < instrument.min_lot {
            return Err(RejectReason::PositionTooSmall {
                lots,
                min_lot: instrument.min_lot,
            });
        }

        let effective_risk_pct = if equity > Decimal::ZERO {
            (lots * risk_per_lot * Decimal::ONE_HUNDRED / equity)
                .round_dp_with_strategy(RISK_PCT_DP, RoundingStrategy::ToZero)
        } else {
            Decimal::ZERO
        };

        Ok(SizedPosition {
            risk_pct,
            position_size: lots,
            effective_risk_pct,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use decision_core::AssetClass;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn scenario_a() -> PositionSizer {
        PositionSizer::new(SizingConfig {
            min_quality_score: 0.60,
            min_risk_pct: dec!(0.60),
            max_risk_pct: dec!(1.0),
            max_risk_per_idea_pct: dec!(2.0),
        })
        .unwrap()
    }

    fn eurusd() -> InstrumentSpec {
        InstrumentSpec::new(AssetClass::Fx, dec!(100000), dec!(0.0040))
    }

    #[test]
    fn quality_maps_linearly_to_risk() {
        let sizer = scenario_a();
        assert_eq!(sizer.risk_pct_for(0.80).unwrap(), dec!(0.80));
        assert_eq!(sizer.risk_pct_for(0.60).unwrap(), dec!(0.60));
        assert_eq!(sizer.risk_pct_for(1.0).unwrap(), dec!(1.0));
    }

    #[test]
    fn quality_below_minimum_is_rejected() {
        let err = scenario_a().risk_pct_for(0.59).unwrap_err();
        assert_eq!(err.code(), "quality_too_low");
    }

    #[test]
    fn min_quality_of_one_never_reaches_sizing() {
        let result = PositionSizer::new(SizingConfig {
            min_quality_score: 1.0,
            ..SizingConfig::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn fx_position_uses_value_per_point() {
        // $100k equity, 0.80% risk = $800. Stop 0.0050 x $100k/pt = $500 per lot.
        let sized = scenario_a()
            .size(0.80, &eurusd(), dec!(0.0050), None, dec!(100000))
            .unwrap();
        assert_eq!(sized.risk_pct, dec!(0.80));
        assert_eq!(sized.position_size, dec!(1.6));
        assert_eq!(sized.effective_risk_pct, dec!(0.80));
    }

    #[test]
    fn index_futures_size_in_whole_contracts() {
        // ES: $50 per point, whole contracts.
        let es = InstrumentSpec::new(AssetClass::Index, dec!(50), dec!(10))
            .with_lots(Decimal::ONE, Decimal::ONE, dec!(50));
        // $250k x 1.0% = $2500; 20pt stop x $50 = $1000 per contract -> 2.5 -> 2.
        let sized = scenario_a()
            .size(1.0, &es, dec!(20), None, dec!(250000))
            .unwrap();
        assert_eq!(sized.position_size, dec!(2));
        assert_eq!(sized.effective_risk_pct, dec!(0.8));
        assert!(sized.effective_risk_pct <= sized.risk_pct);
    }

    #[test]
    fn stops_outside_reference_band_are_rejected() {
        let sizer = scenario_a();
        let tight = sizer
            .size(0.80, &eurusd(), dec!(0.0010), None, dec!(100000))
            .unwrap_err();
        assert_eq!(tight.code(), "stop_distance_unreasonable");

        let wide = sizer
            .size(0.80, &eurusd(), dec!(0.0300), None, dec!(100000))
            .unwrap_err();
        assert_eq!(wide.code(), "stop_distance_unreasonable");
    }

    #[test]
    fn feature_reference_overrides_configured_reference() {
        let sizer = scenario_a();
        // 0.0100 is 2.5x the configured 0.0040 but 10x a live 0.0010 ATR.
        assert!(sizer.validate_stop(&eurusd(), dec!(0.0100), None).is_ok());
        assert!(sizer
            .validate_stop(&eurusd(), dec!(0.0100), Some(dec!(0.0010)))
            .is_err());
    }

    #[test]
    fn tiny_account_is_position_too_small() {
        let err = scenario_a()
            .size(0.80, &eurusd(), dec!(0.0050), None, dec!(500))
            .unwrap_err();
        assert_eq!(err.code(), "position_too_small");
    }

    #[test]
    fn max_lot_caps_size() {
        let capped = eurusd().with_lots(dec!(0.01), dec!(0.01), dec!(1.0));
        let sized = scenario_a()
            .size(1.0, &capped, dec!(0.0040), None, dec!(10000000))
            .unwrap();
        assert_eq!(sized.position_size, dec!(1.0));
    }

    proptest! {
        #[test]
        fn approved_risk_stays_within_band(quality in 0.0f64..=1.0) {
            let sizer = PositionSizer::new(SizingConfig::default()).unwrap();
            let config = sizer.config().clone();
            if let Ok(risk) = sizer.risk_pct_for(quality) {
                prop_assert!(risk >= config.min_risk_pct);
                prop_assert!(risk <= config.max_risk_pct);
                prop_assert!(risk <= config.max_risk_per_idea_pct);
            } else {
                prop_assert!(quality < config.min_quality_score);
            }
        }

        #[test]
        fn risk_is_monotonic_in_quality(a in 0.6f64..=1.0, b in 0.6f64..=1.0) {
            let sizer = scenario_a();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(sizer.risk_pct_for(lo).unwrap() <= sizer.risk_pct_for(hi).unwrap());
        }
    }
}
