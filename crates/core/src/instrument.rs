//! Instrument specifications used for stop validation and lot sizing.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ConfigError;

/// Asset class an instrument belongs to. Used as an exposure dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    Fx,
    Equity,
    Index,
    Commodity,
    Crypto,
    Rates,
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fx => "fx",
            Self::Equity => "equity",
            Self::Index => "index",
            Self::Commodity => "commodity",
            Self::Crypto => "crypto",
            Self::Rates => "rates",
        };
        f.write_str(name)
    }
}

/// Per-instrument contract details.
///
/// `value_per_point` is the account-currency P&L of one lot moving one
/// price unit, so FX, index CFDs, and futures all size through the same
/// formula without a hardcoded pip value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    pub asset_class: AssetClass,
    /// Account-currency value of a one-unit price move for one lot
    pub value_per_point: Decimal,
    /// Smallest lot increment
    #[serde(default = "default_lot_step")]
    pub lot_step: Decimal,
    #[serde(default = "default_lot_step")]
    pub min_lot: Decimal,
    #[serde(default = "default_max_lot")]
    pub max_lot: Decimal,
    /// Structural reference distance (e.g. an ATR) used when the feature
    /// layer has no fresher value
    pub reference_stop_distance: Decimal,
    #[serde(default = "default_min_stop_multiple")]
    pub min_stop_multiple: Decimal,
    #[serde(default = "default_max_stop_multiple")]
    pub max_stop_multiple: Decimal,
}

fn default_lot_step() -> Decimal {
    dec!(0.01)
}

fn default_max_lot() -> Decimal {
    dec!(100)
}

fn default_min_stop_multiple() -> Decimal {
    Decimal::ONE
}

fn default_max_stop_multiple() -> Decimal {
    dec!(5)
}

impl InstrumentSpec {
    /// Creates a spec with default lot and stop-multiple settings.
    #[must_use]
    pub fn new(
        asset_class: AssetClass,
        value_per_point: Decimal,
        reference_stop_distance: Decimal,
    ) -> Self {
        Self {
            asset_class,
            value_per_point,
            lot_step: default_lot_step(),
            min_lot: default_lot_step(),
            max_lot: default_max_lot(),
            reference_stop_distance,
            min_stop_multiple: default_min_stop_multiple(),
            max_stop_multiple: default_max_stop_multiple(),
        }
    }

    #[must_use]
    pub fn with_lots(mut self, lot_step: Decimal, min_lot: Decimal, max_lot: Decimal) -> Self {
        self.lot_step = lot_step;
        self.min_lot = min_lot;
        self.max_lot = max_lot;
        self
    }

    #[must_use]
    pub fn with_stop_multiples(mut self, min: Decimal, max: Decimal) -> Self {
        self.min_stop_multiple = min;
        self.max_stop_multiple = max;
        self
    }

    /// Validates the spec for `symbol`.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] for non-positive values or inverted ranges.
    pub fn validate(&self, symbol: &str) -> Result<(), ConfigError> {
        let field = |name: &str| format!("instruments.{symbol}.{name}");
        for (name, value) in [
            ("value_per_point", self.value_per_point),
            ("lot_step", self.lot_step),
            ("min_lot", self.min_lot),
            ("reference_stop_distance", self.reference_stop_distance),
            ("min_stop_multiple", self.min_stop_multiple),
        ] {
            if value <= Decimal::ZERO {
                return Err(ConfigError::invalid(field(name), "must be positive"));
            }
        }
        if self.max_lot < self.min_lot {
            return Err(ConfigError::invalid(field("max_lot"), "must be >= min_lot"));
        }
        if self.max_stop_multiple <= self.min_stop_multiple {
            return Err(ConfigError::invalid(
                field("max_stop_multiple"),
                "must be greater than min_stop_multiple",
            ));
        }
        Ok(())
    }

    /// Rounds a raw lot count down to the lot step.
    #[must_use]
    pub fn round_down_lots(&self, lots: Decimal) -> Decimal {
        ((lots / self.lot_step).floor() * self.lot_step).normalize()
    }
}
