//! Decision types: the typed outcome of evaluating one signal.
//!
//! Business rejections are values, never errors that unwind a batch.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{LockName, LockTimeout};
use crate::signal::{DecisionUid, Direction, SignalInvalid};

/// Exposure dimension a limit applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExposureDimension {
    Symbol,
    Strategy,
    AssetClass,
    Cluster,
    Portfolio,
}

impl fmt::Display for ExposureDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Symbol => "symbol",
            Self::Strategy => "strategy",
            Self::AssetClass => "asset_class",
            Self::Cluster => "cluster",
            Self::Portfolio => "portfolio",
        };
        f.write_str(name)
    }
}

/// Machine-readable rejection reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum RejectReason {
    SignalInvalid {
        detail: SignalInvalid,
    },
    UnknownInstrument {
        symbol: String,
    },
    StrategyDisabled {
        strategy_id: String,
    },
    QualityTooLow {
        score: f64,
        min: f64,
    },
    StopDistanceUnreasonable {
        distance: Decimal,
        min: Decimal,
        max: Decimal,
    },
    PositionTooSmall {
        lots: Decimal,
        min_lot: Decimal,
    },
    ExposureLimitExceeded {
        dimension: ExposureDimension,
        key: String,
        committed: Decimal,
        requested: Decimal,
        effective_limit: Decimal,
    },
    CorrelationLimitExceeded {
        symbol: String,
        correlated: Decimal,
        effective_limit: Decimal,
        stale_snapshot: bool,
    },
    CircuitBreakerActive {
        state: String,
    },
    LockTimeout {
        lock: LockName,
    },
    ConflictLost {
        winner: DecisionUid,
    },
    SlotOccupied {
        holder: DecisionUid,
    },
    Withdrawn,
}

impl RejectReason {
    /// Stable code for monitoring consumers.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::SignalInvalid { .. } => "signal_invalid",
            Self::UnknownInstrument { .. } => "unknown_instrument",
            Self::StrategyDisabled { .. } => "strategy_disabled",
            Self::QualityTooLow { .. } => "quality_too_low",
            Self::StopDistanceUnreasonable { .. } => "stop_distance_unreasonable",
            Self::PositionTooSmall { .. } => "position_too_small",
            Self::ExposureLimitExceeded { .. } => "exposure_limit_exceeded",
            Self::CorrelationLimitExceeded { .. } => "correlation_limit_exceeded",
            Self::CircuitBreakerActive { .. } => "circuit_breaker_active",
            Self::LockTimeout { .. } => "lock_timeout",
            Self::ConflictLost { .. } => "conflict_lost",
            Self::SlotOccupied { .. } => "slot_occupied",
            Self::Withdrawn => "withdrawn",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SignalInvalid { detail } => write!(f, "signal invalid: {detail}"),
            Self::UnknownInstrument { symbol } => write!(f, "no instrument spec for {symbol}"),
            Self::StrategyDisabled { strategy_id } => {
                write!(f, "strategy {strategy_id} is disabled")
            }
            Self::QualityTooLow { score, min } => {
                write!(f, "quality {score:.4} below minimum {min:.4}")
            }
            Self::StopDistanceUnreasonable { distance, min, max } => {
                write!(f, "stop distance {distance} outside [{min}, {max}]")
            }
            Self::PositionTooSmall { lots, min_lot } => {
                write!(f, "position {lots} lots below minimum {min_lot}")
            }
            Self::ExposureLimitExceeded {
                dimension,
                key,
                committed,
                requested,
                effective_limit,
            } => write!(
                f,
                "{dimension} {key}: {committed}% + {requested}% exceeds {effective_limit}%"
            ),
            Self::CorrelationLimitExceeded {
                symbol,
                correlated,
                effective_limit,
                stale_snapshot,
            } => write!(
                f,
                "correlated exposure for {symbol} {correlated}% exceeds {effective_limit}% (stale snapshot: {stale_snapshot})"
            ),
            Self::CircuitBreakerActive { state } => write!(f, "circuit breaker {state}"),
            Self::LockTimeout { lock } => write!(f, "timed out acquiring {lock} lock"),
            Self::ConflictLost { winner } => write!(f, "lost conflict to {winner}"),
            Self::SlotOccupied { holder } => write!(f, "slot held by {holder}"),
            Self::Withdrawn => write!(f, "withdrawn by producer"),
        }
    }
}

impl std::error::Error for RejectReason {}

impl From<SignalInvalid> for RejectReason {
    fn from(detail: SignalInvalid) -> Self {
        Self::SignalInvalid { detail }
    }
}

impl From<LockTimeout> for RejectReason {
    fn from(timeout: LockTimeout) -> Self {
        Self::LockTimeout { lock: timeout.lock }
    }
}

/// Outcome of evaluating one signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RiskDecision {
    Approved {
        risk_pct: Decimal,
        position_size: Decimal,
    },
    Rejected {
        reason: RejectReason,
    },
}

impl RiskDecision {
    #[must_use]
    pub fn rejected(reason: RejectReason) -> Self {
        Self::Rejected { reason }
    }

    #[must_use]
    pub const fn is_approved(&self) -> bool {
        matches!(self, Self::Approved { .. })
    }

    #[must_use]
    pub fn reject_reason(&self) -> Option<&RejectReason> {
        match self {
            Self::Approved { .. } => None,
            Self::Rejected { reason } => Some(reason),
        }
    }
}

/// Approved decision handed to the execution boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovedDecision {
    pub decision_uid: DecisionUid,
    pub symbol: String,
    pub direction: Direction,
    pub strategy_id: String,
    pub position_size: Decimal,
    pub risk_pct: Decimal,
    pub approved_at: DateTime<Utc>,
}

/// Rejection published to monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedDecision {
    pub decision_uid: DecisionUid,
    pub symbol: String,
    pub strategy_id: String,
    pub reason: RejectReason,
    pub rejected_at: DateTime<Utc>,
}

/// Close event for a previously approved decision (external).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub decision_uid: DecisionUid,
    pub strategy_id: String,
    pub symbol: String,
    /// Realized P&L as a percentage of account equity (negative for losses)
    pub pnl_pct: Decimal,
    pub closed_at: DateTime<Utc>,
}

impl TradeOutcome {
    #[must_use]
    pub fn is_loss(&self) -> bool {
        self.pnl_pct < Decimal::ZERO
    }
}
