//! Proposals from the adaptive layer and the reasons they are refused.

use decision_core::config::ParameterKey;
use decision_core::{ConfigError, LockTimeout};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::snapshot::SnapshotError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterChange {
    pub key: ParameterKey,
    pub value: f64,
}

/// What the adaptive layer asks for. Only `Adjust`, `DisableStrategy`, and
/// `EnableStrategy` can ever pass validation; the remaining variants exist
/// so refusals are explicit and logged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeRequest {
    /// Applied atomically: all changes or none
    Adjust { changes: Vec<ParameterChange> },
    ModifyRiskCap { field: String, value: String },
    BypassExposureLimits { strategy_id: Option<String> },
    ModifyCircuitBreaker { field: String, value: String },
    DisableStrategy { strategy_id: String },
    EnableStrategy { strategy_id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedChange {
    pub proposer: String,
    pub reason: String,
    pub request: ChangeRequest,
}

impl ProposedChange {
    pub fn new(proposer: impl Into<String>, reason: impl Into<String>, request: ChangeRequest) -> Self {
        Self {
            proposer: proposer.into(),
            reason: reason.into(),
            request,
        }
    }

    /// Shorthand for a single-parameter adjustment.
    pub fn adjust(proposer: impl Into<String>, changes: Vec<ParameterChange>) -> Self {
        Self::new(proposer, "adjust", ChangeRequest::Adjust { changes })
    }
}

/// Why a proposal was refused. The live parameters are unchanged.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum GovernanceForbidden {
    #[error("{area} is never adjustable by the adaptive layer")]
    DenyListed { area: String },

    #[error("{key} is not on the allow-list")]
    NotAllowListed { key: ParameterKey },

    #[error("adjustment contains no changes")]
    EmptyAdjustment,

    #[error("{key} appears more than once")]
    DuplicateKey { key: ParameterKey },

    #[error("{key} = {value} is outside [{min}, {max}]")]
    OutOfBounds {
        key: ParameterKey,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{key} = {value} moves {delta:.4} from baseline {baseline}, max {max_delta}")]
    DeltaExceeded {
        key: ParameterKey,
        value: f64,
        baseline: f64,
        delta: f64,
        max_delta: f64,
    },

    #[error("strategy {strategy_id} is in production and cannot be disabled")]
    ProductionStrategy { strategy_id: String },

    #[error("resulting parameters are invalid: {detail}")]
    InvalidResult { detail: String },
}

impl From<ConfigError> for GovernanceForbidden {
    fn from(err: ConfigError) -> Self {
        Self::InvalidResult {
            detail: err.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum GovernanceError {
    #[error("proposal forbidden: {0}")]
    Forbidden(#[from] GovernanceForbidden),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    LockTimeout(#[from] LockTimeout),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
