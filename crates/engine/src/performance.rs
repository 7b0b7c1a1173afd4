//! Per-strategy win/loss book feeding quality scoring and arbitration.

use decision_core::{LockName, LockTimeout, TradeOutcome};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::error;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyRecord {
    pub wins: u32,
    pub losses: u32,
}

impl StrategyRecord {
    /// Laplace-smoothed win rate, `(wins + 1) / (trades + 2)`.
    #[must_use]
    pub fn win_rate(&self) -> f64 {
        let trades = f64::from(self.wins) + f64::from(self.losses);
        (f64::from(self.wins) + 1.0) / (trades + 2.0)
    }
}

#[derive(Debug)]
pub struct PerformanceBook {
    records: RwLock<HashMap<String, StrategyRecord>>,
    lock_timeout: Duration,
}

impl PerformanceBook {
    #[must_use]
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            lock_timeout,
        }
    }

    /// Smoothed win rate in (0, 1), or `None` without history. A busy book
    /// also reads as no history, which scores neutral.
    #[must_use]
    pub fn performance(&self, strategy_id: &str) -> Option<f64> {
        self.records
            .try_read_for(self.lock_timeout)?
            .get(strategy_id)
            .map(StrategyRecord::win_rate)
    }

    /// Books a closed trade. Break-even trades are ignored.
    ///
    /// # Errors
    /// Returns [`LockTimeout`] if the book is busy; the outcome is not booked.
    pub fn record(&self, outcome: &TradeOutcome) -> Result<(), LockTimeout> {
        let Some(mut records) = self.records.try_write_for(self.lock_timeout) else {
            error!(
                strategy = %outcome.strategy_id,
                uid = %outcome.decision_uid,
                "performance book busy; outcome not booked"
            );
            return Err(LockTimeout::new(LockName::Performance, self.lock_timeout));
        };
        let record = records.entry(outcome.strategy_id.clone()).or_default();
        if outcome.pnl_pct > Decimal::ZERO {
            record.wins += 1;
        } else if outcome.pnl_pct < Decimal::ZERO {
            record.losses += 1;
        }
        Ok(())
    }

    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, StrategyRecord> {
        self.records
            .try_read_for(self.lock_timeout)
            .map(|records| records.iter().map(|(k, v)| (k.clone(), *v)).collect())
            .unwrap_or_default()
    }
}
