//! Error types shared across the workspace.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Boot-time configuration failure. Always fatal: the engine is never built
/// from a configuration that produced one of these.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value violates a configuration invariant.
    #[error("invalid configuration: {field}: {reason}")]
    Invalid { field: String, reason: String },

    /// The configuration sources could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Named locks in the core. The first three are the ordered locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockName {
    Ledger,
    Arbiter,
    Exposure,
    ExposureTotals,
    CircuitBreaker,
    Parameters,
    Performance,
    Closes,
}

impl fmt::Display for LockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ledger => "ledger",
            Self::Arbiter => "arbiter",
            Self::Exposure => "exposure",
            Self::ExposureTotals => "exposure_totals",
            Self::CircuitBreaker => "circuit_breaker",
            Self::Parameters => "parameters",
            Self::Performance => "performance",
            Self::Closes => "closes",
        };
        f.write_str(name)
    }
}

/// A bounded lock acquisition gave up.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("timed out after {timeout:?} waiting for the {lock} lock")]
pub struct LockTimeout {
    pub lock: LockName,
    pub timeout: Duration,
}

impl LockTimeout {
    #[must_use]
    pub const fn new(lock: LockName, timeout: Duration) -> Self {
        Self { lock, timeout }
    }
}
