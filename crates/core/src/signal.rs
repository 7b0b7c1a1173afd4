//! Signal contract consumed from strategy producers.
//!
//! Producers hand the core a [`Signal`]. The pipeline never operates on a raw
//! signal: [`Signal::validate`] is the single validation entry point and turns
//! it into a [`ValidatedSignal`] (or a [`SignalInvalid`] rejection).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Direction of a candidate trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Buy / go long
    Long,
    /// Sell / go short
    Short,
}

impl Direction {
    /// Returns the opposite direction.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }

    /// +1 for long, -1 for short.
    #[must_use]
    pub const fn sign(self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

/// Market regime tag published by the feature layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketRegime {
    TrendingUp,
    TrendingDown,
    Ranging,
    Volatile,
    #[default]
    Unknown,
}

impl MarketRegime {
    /// Returns true unless the regime is `Unknown`.
    #[must_use]
    pub const fn is_known(self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Optional sub-scores attached by the producer. Each is expected in [0, 1];
/// out-of-range values are clamped by the scorer, missing ones fall back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityInputs {
    #[serde(default)]
    pub signal_strength: Option<f64>,
    #[serde(default)]
    pub structural_alignment: Option<f64>,
    #[serde(default)]
    pub order_flow_quality: Option<f64>,
    #[serde(default)]
    pub regime_fit: Option<f64>,
    #[serde(default)]
    pub historical_performance: Option<f64>,
}

impl QualityInputs {
    fn values(&self) -> [(&'static str, Option<f64>); 5] {
        [
            ("signal_strength", self.signal_strength),
            ("structural_alignment", self.structural_alignment),
            ("order_flow_quality", self.order_flow_quality),
            ("regime_fit", self.regime_fit),
            ("historical_performance", self.historical_performance),
        ]
    }
}

/// Contextual tags attached by the producer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalTags {
    /// Regime the strategy assumed when it fired
    #[serde(default)]
    pub regime: Option<MarketRegime>,
    /// Mutually-exclusive resource this signal competes for, overriding the
    /// default (symbol, direction) conflict slot
    #[serde(default)]
    pub resource: Option<String>,
}

/// A candidate trade proposal from a strategy producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub direction: Direction,
    pub entry: Decimal,
    pub stop: Decimal,
    #[serde(default)]
    pub target: Option<Decimal>,
    pub strategy_id: String,
    #[serde(default)]
    pub inputs: QualityInputs,
    #[serde(default)]
    pub tags: SignalTags,
    pub timestamp: DateTime<Utc>,
}

/// Deterministic identity of a decision, derived from the signal identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DecisionUid(String);

impl DecisionUid {
    /// Derives the uid from `(strategy_id, symbol, signal_timestamp)`.
    ///
    /// Fields are length-prefixed so that `("ab", "c")` and `("a", "bc")`
    /// never collide.
    #[must_use]
    pub fn derive(strategy_id: &str, symbol: &str, timestamp: DateTime<Utc>) -> Self {
        let mut hasher = Sha256::new();
        for part in [strategy_id.as_bytes(), symbol.as_bytes()] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        hasher.update(timestamp.timestamp().to_le_bytes());
        hasher.update(timestamp.timestamp_subsec_nanos().to_le_bytes());
        let digest = hasher.finalize();
        Self(hex::encode(&digest[..16]))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DecisionUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reasons a signal fails validation.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", rename_all = "snake_case")]
pub enum SignalInvalid {
    #[error("symbol is empty")]
    EmptySymbol,

    #[error("strategy id is empty")]
    EmptyStrategy,

    #[error("{name} price must be positive, got {value}")]
    NonPositivePrice { name: String, value: Decimal },

    #[error("stop {stop} is on the wrong side of entry {entry} for a {direction} signal")]
    StopWrongSide {
        direction: Direction,
        entry: Decimal,
        stop: Decimal,
    },

    #[error("target {target} is on the wrong side of entry {entry} for a {direction} signal")]
    TargetWrongSide {
        direction: Direction,
        entry: Decimal,
        target: Decimal,
    },

    #[error("sub-score {name} is not a finite number")]
    NonFiniteScore { name: String },
}

impl Signal {
    /// Returns the deterministic decision uid for this signal.
    #[must_use]
    pub fn decision_uid(&self) -> DecisionUid {
        DecisionUid::derive(&self.strategy_id, &self.symbol, self.timestamp)
    }

    /// Validates the signal once, producing the form the pipeline works on.
    ///
    /// # Errors
    /// Returns [`SignalInvalid`] describing the first malformed field.
    pub fn validate(self) -> Result<ValidatedSignal, SignalInvalid> {
        if self.symbol.trim().is_empty() {
            return Err(SignalInvalid::EmptySymbol);
        }
        if self.strategy_id.trim().is_empty() {
            return Err(SignalInvalid::EmptyStrategy);
        }

        let mut prices = vec![("entry", self.entry), ("stop", self.stop)];
        if let Some(target) = self.target {
            prices.push(("target", target));
        }
        for (name, value) in prices {
            if value <= Decimal::ZERO {
                return Err(SignalInvalid::NonPositivePrice {
                    name: name.to_string(),
                    value,
                });
            }
        }

        let stop_ok = match self.direction {
            Direction::Long => self.stop < self.entry,
            Direction::Short => self.stop > self.entry,
        };
        if !stop_ok {
            return Err(SignalInvalid::StopWrongSide {
                direction: self.direction,
                entry: self.entry,
                stop: self.stop,
            });
        }

        if let Some(target) = self.target {
            let target_ok = match self.direction {
                Direction::Long => target > self.entry,
                Direction::Short => target < self.entry,
            };
            if !target_ok {
                return Err(SignalInvalid::TargetWrongSide {
                    direction: self.direction,
                    entry: self.entry,
                    target,
                });
            }
        }

        for (name, value) in self.inputs.values() {
            if value.is_some_and(|v| !v.is_finite()) {
                return Err(SignalInvalid::NonFiniteScore {
                    name: name.to_string(),
                });
            }
        }

        let uid = self.decision_uid();
        let stop_distance = (self.entry - self.stop).abs();
        Ok(ValidatedSignal {
            signal: self,
            uid,
            stop_distance,
        })
    }
}

/// A signal that passed [`Signal::validate`].
///
/// Only constructible through validation, so every downstream component can
/// rely on well-formed prices and a precomputed uid.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedSignal {
    signal: Signal,
    uid: DecisionUid,
    stop_distance: Decimal,
}

impl ValidatedSignal {
    #[must_use]
    pub fn signal(&self) -> &Signal {
        &self.signal
    }

    #[must_use]
    pub fn uid(&self) -> &DecisionUid {
        &self.uid
    }

    /// Absolute distance between entry and stop, always positive.
    #[must_use]
    pub fn stop_distance(&self) -> Decimal {
        self.stop_distance
    }

    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.signal.symbol
    }

    #[must_use]
    pub fn strategy_id(&self) -> &str {
        &self.signal.strategy_id
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        self.signal.direction
    }

    #[must_use]
    pub fn into_inner(self) -> Signal {
        self.signal
    }
}
