//! Versioned configuration bundle.
//!
//! The bundle is produced by the offline pipeline, loaded once at startup,
//! and validated completely before any signal is accepted. A validation
//! failure is fatal.

mod governance;
mod risk;
mod scoring;

pub use governance::{
    DegradationConfig, GovernancePolicy, ParameterBound, ParameterKey, StrategyState,
};
pub use risk::{CircuitBreakerConfig, ExposureConfig, SizingConfig, StaleCorrelationPolicy};
pub use scoring::{
    ArbitrationConfig, QualityComponent, QualityWeights, ScoringConfig, WEIGHT_SUM_TOLERANCE,
};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::ConfigError;
use crate::instrument::InstrumentSpec;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    /// Starting account equity in account currency
    pub equity: Decimal,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            equity: dec!(100000),
        }
    }
}

/// Timeout applied to every lock acquisition in the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
        }
    }
}

/// The complete configuration bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bundle version stamped by the offline pipeline
    pub version: String,
    pub account: AccountConfig,
    pub scoring: ScoringConfig,
    pub arbitration: ArbitrationConfig,
    pub sizing: SizingConfig,
    pub exposure: ExposureConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub locks: LockConfig,
    pub governance: GovernancePolicy,
    pub instruments: BTreeMap<String, InstrumentSpec>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: "unversioned".to_string(),
            account: AccountConfig::default(),
            scoring: ScoringConfig::default(),
            arbitration: ArbitrationConfig::default(),
            sizing: SizingConfig::default(),
            exposure: ExposureConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            locks: LockConfig::default(),
            governance: GovernancePolicy::default(),
            instruments: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    /// Validates every section of the bundle.
    ///
    /// # Errors
    /// Returns the first [`ConfigError::Invalid`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version.trim().is_empty() {
            return Err(ConfigError::invalid("version", "must not be empty"));
        }
        if self.account.equity <= Decimal::ZERO {
            return Err(ConfigError::invalid("account.equity", "must be positive"));
        }
        if self.locks.timeout.is_zero() {
            return Err(ConfigError::invalid("locks.timeout", "must be positive"));
        }
        self.scoring.validate()?;
        self.arbitration.validate()?;
        self.sizing.validate()?;
        self.exposure.validate()?;
        self.circuit_breaker.validate()?;
        self.governance.validate()?;
        for (symbol, spec) in &self.instruments {
            spec.validate(symbol)?;
        }
        self.validate_baselines()?;
        Ok(())
    }

    /// Every governance bound must admit its own baseline, otherwise no
    /// proposal could ever be accepted and the bound is a typo.
    fn validate_baselines(&self) -> Result<(), ConfigError> {
        for bound in &self.governance.bounds {
            let baseline = match &bound.key {
                ParameterKey::ScoringWeight(component) => self.scoring.weights.get(*component),
                ParameterKey::ArbitrationWeight(strategy) => {
                    self.arbitration.strategy_weight(strategy)
                }
            };
            if baseline < bound.min || baseline > bound.max {
                return Err(ConfigError::invalid(
                    format!("governance.bounds.{}", bound.key),
                    format!(
                        "baseline {baseline} lies outside [{}, {}]",
                        bound.min, bound.max
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// Serde helper: `Duration` as whole seconds.
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serde helper: `Duration` as whole milliseconds.
pub mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
