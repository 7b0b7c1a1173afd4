use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::duration_secs;
use crate::error::ConfigError;

fn positive(field: &str, value: Decimal) -> Result<(), ConfigError> {
    if value > Decimal::ZERO {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("{value} must be positive")))
    }
}

/// Position sizer configuration. Risk figures are percent of equity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    /// Signals below this quality are rejected; must be < 1.0
    pub min_quality_score: f64,
    pub min_risk_pct: Decimal,
    pub max_risk_pct: Decimal,
    /// Hard per-idea cap no configuration may exceed
    pub max_risk_per_idea_pct: Decimal,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            min_quality_score: 0.60,
            min_risk_pct: dec!(0.25),
            max_risk_pct: dec!(1.0),
            max_risk_per_idea_pct: dec!(2.0),
        }
    }
}

impl SizingConfig {
    /// # Errors
    /// Fails when `min_quality_score` is outside [0, 1) (so the sizing
    /// denominator is strictly positive) or the risk band is inconsistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let q = self.min_quality_score;
        if !q.is_finite() || !(0.0..1.0).contains(&q) {
            return Err(ConfigError::invalid(
                "sizing.min_quality_score",
                format!("{q} must be in [0, 1)"),
            ));
        }
        positive("sizing.min_risk_pct", self.min_risk_pct)?;
        if self.max_risk_pct < self.min_risk_pct {
            return Err(ConfigError::invalid(
                "sizing.max_risk_pct",
                "must be >= min_risk_pct",
            ));
        }
        if self.max_risk_pct > self.max_risk_per_idea_pct {
            return Err(ConfigError::invalid(
                "sizing.max_risk_pct",
                format!(
                    "{} exceeds the per-idea cap {}",
                    self.max_risk_pct, self.max_risk_per_idea_pct
                ),
            ));
        }
        if self.max_risk_per_idea_pct > dec!(100) {
            return Err(ConfigError::invalid(
                "sizing.max_risk_per_idea_pct",
                "cannot exceed 100",
            ));
        }
        Ok(())
    }
}

/// What to do when the correlation snapshot is older than the allowed age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleCorrelationPolicy {
    /// Treat every pair as unknown and use the conservative default
    #[default]
    ConservativeDefault,
    /// Reject new risk until a fresh snapshot arrives
    Reject,
}

/// Exposure limits. All limits are percent of equity before the buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExposureConfig {
    /// Fraction of each limit held back for slippage and gaps
    pub buffer: Decimal,
    pub max_symbol_risk_pct: Decimal,
    pub max_strategy_risk_pct: Decimal,
    pub max_asset_class_risk_pct: Decimal,
    pub max_cluster_risk_pct: Decimal,
    pub max_portfolio_risk_pct: Decimal,
    pub max_correlated_risk_pct: Decimal,
    pub symbol_limits: HashMap<String, Decimal>,
    pub strategy_limits: HashMap<String, Decimal>,
    /// Correlation assumed for pairs missing from (or stale in) the snapshot
    pub unknown_correlation: f64,
    #[serde(with = "duration_secs")]
    pub max_correlation_age: Duration,
    pub stale_correlation_policy: StaleCorrelationPolicy,
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            buffer: dec!(0.10),
            max_symbol_risk_pct: dec!(2.0),
            max_strategy_risk_pct: dec!(4.0),
            max_asset_class_risk_pct: dec!(6.0),
            max_cluster_risk_pct: dec!(4.0),
            max_portfolio_risk_pct: dec!(10.0),
            max_correlated_risk_pct: dec!(3.0),
            symbol_limits: HashMap::new(),
            strategy_limits: HashMap::new(),
            unknown_correlation: 0.8,
            max_correlation_age: Duration::from_secs(4 * 60 * 60),
            stale_correlation_policy: StaleCorrelationPolicy::default(),
        }
    }
}

impl ExposureConfig {
    /// Limit after the safety buffer: `limit * (1 - buffer)`.
    #[must_use]
    pub fn effective(&self, limit: Decimal) -> Decimal {
        limit * (Decimal::ONE - self.buffer)
    }

    #[must_use]
    pub fn symbol_limit(&self, symbol: &str) -> Decimal {
        self.symbol_limits
            .get(symbol)
            .copied()
            .unwrap_or(self.max_symbol_risk_pct)
    }

    #[must_use]
    pub fn strategy_limit(&self, strategy_id: &str) -> Decimal {
        self.strategy_limits
            .get(strategy_id)
            .copied()
            .unwrap_or(self.max_strategy_risk_pct)
    }

    /// # Errors
    /// Fails on a buffer outside [0, 1), non-positive limits, or an unknown
    /// correlation default outside (0, 1].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer < Decimal::ZERO || self.buffer >= Decimal::ONE {
            return Err(ConfigError::invalid(
                "exposure.buffer",
                format!("{} must be in [0, 1)", self.buffer),
            ));
        }
        positive("exposure.max_symbol_risk_pct", self.max_symbol_risk_pct)?;
        positive("exposure.max_strategy_risk_pct", self.max_strategy_risk_pct)?;
        positive(
            "exposure.max_asset_class_risk_pct",
            self.max_asset_class_risk_pct,
        )?;
        positive("exposure.max_cluster_risk_pct", self.max_cluster_risk_pct)?;
        positive("exposure.max_portfolio_risk_pct", self.max_portfolio_risk_pct)?;
        positive(
            "exposure.max_correlated_risk_pct",
            self.max_correlated_risk_pct,
        )?;
        for (symbol, limit) in &self.symbol_limits {
            positive(&format!("exposure.symbol_limits.{symbol}"), *limit)?;
        }
        for (strategy, limit) in &self.strategy_limits {
            positive(&format!("exposure.strategy_limits.{strategy}"), *limit)?;
        }
        let rho = self.unknown_correlation;
        if !rho.is_finite() || rho <= 0.0 || rho > 1.0 {
            return Err(ConfigError::invalid(
                "exposure.unknown_correlation",
                format!("{rho} must be in (0, 1]; unknown is never zero"),
            ));
        }
        if self.max_correlation_age.is_zero() {
            return Err(ConfigError::invalid(
                "exposure.max_correlation_age",
                "must be positive",
            ));
        }
        Ok(())
    }
}

/// Circuit breaker thresholds and timings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub max_consecutive_losses: u32,
    /// Realized loss for the trading day, percent of equity
    pub max_daily_loss_pct: Decimal,
    /// Trip when the latest outcome's z-score is at or below `-zscore_threshold`
    pub zscore_threshold: f64,
    pub zscore_window: usize,
    pub zscore_min_samples: usize,
    /// How long the breaker stays `Open` before entering `Cooldown`
    #[serde(with = "duration_secs")]
    pub open_duration: Duration,
    #[serde(with = "duration_secs")]
    pub cooldown: Duration,
    /// Hours added to UTC before taking the calendar date as the trading day
    pub trading_day_offset_hours: i32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_consecutive_losses: 5,
            max_daily_loss_pct: dec!(3.0),
            zscore_threshold: 3.0,
            zscore_window: 50,
            zscore_min_samples: 20,
            open_duration: Duration::from_secs(15 * 60),
            cooldown: Duration::from_secs(30 * 60),
            trading_day_offset_hours: 0,
        }
    }
}

impl CircuitBreakerConfig {
    #[must_use]
    pub fn with_max_consecutive_losses(mut self, losses: u32) -> Self {
        self.max_consecutive_losses = losses;
        self
    }

    #[must_use]
    pub fn with_max_daily_loss_pct(mut self, pct: Decimal) -> Self {
        self.max_daily_loss_pct = pct;
        self
    }

    #[must_use]
    pub fn with_timings(mut self, open_duration: Duration, cooldown: Duration) -> Self {
        self.open_duration = open_duration;
        self.cooldown = cooldown;
        self
    }

    /// # Errors
    /// Fails on zero thresholds, an inconsistent z-score window, or an
    /// offset outside ±23 hours.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_consecutive_losses == 0 {
            return Err(ConfigError::invalid(
                "circuit_breaker.max_consecutive_losses",
                "must be at least 1",
            ));
        }
        positive(
            "circuit_breaker.max_daily_loss_pct",
            self.max_daily_loss_pct,
        )?;
        if !self.zscore_threshold.is_finite() || self.zscore_threshold <= 0.0 {
            return Err(ConfigError::invalid(
                "circuit_breaker.zscore_threshold",
                "must be positive",
            ));
        }
        if self.zscore_min_samples < 3 || self.zscore_min_samples > self.zscore_window {
            return Err(ConfigError::invalid(
                "circuit_breaker.zscore_min_samples",
                "must be in [3, zscore_window]",
            ));
        }
        if self.cooldown.is_zero() {
            return Err(ConfigError::invalid(
                "circuit_breaker.cooldown",
                "must be positive",
            ));
        }
        if self.trading_day_offset_hours.abs() > 23 {
            return Err(ConfigError::invalid(
                "circuit_breaker.trading_day_offset_hours",
                "must be within +/-23",
            ));
        }
        Ok(())
    }
}
