//! Statistical circuit breaker.
//!
//! Halts all approvals under abnormal loss patterns:
//! - the latest outcome's z-score against the trailing window is at or
//!   below `-zscore_threshold`
//! - `max_consecutive_losses` losses in a row
//! - the current trading day's realized loss reaches `max_daily_loss_pct`
//!
//! ```text
//! Closed --trigger--> Open --open_duration--> Cooldown --until, no trigger--> Closed
//!                      ^                          |
//!                      +-------trigger------------+
//! ```
//!
//! A manual trip stays `Open` until [`CircuitBreaker::reset`].

use chrono::{DateTime, Days, NaiveDate, Utc};
use decision_core::config::CircuitBreakerConfig;
use decision_core::{Clock, LockName, LockTimeout, RejectReason, TradeOutcome};
use parking_lot::RwLock;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::stats::RollingWindow;

/// Trading days of daily P&L kept for late outcomes and monitoring.
const DAILY_HISTORY_DAYS: u64 = 7;

/// Why the breaker opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "trigger", rename_all = "snake_case")]
pub enum TripReason {
    ZScore { zscore: f64 },
    ConsecutiveLosses { count: u32 },
    DailyLoss { loss_pct: Decimal },
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open {
        reason: TripReason,
        opened_at: DateTime<Utc>,
    },
    Cooldown {
        until: DateTime<Utc>,
    },
}

impl BreakerState {
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("closed"),
            Self::Open { .. } => f.write_str("open"),
            Self::Cooldown { .. } => f.write_str("cooldown"),
        }
    }
}

/// Point-in-time view for monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub consecutive_losses: u32,
    pub trading_day: Option<NaiveDate>,
    /// Realized loss for the current trading day, positive percent
    pub daily_loss_pct: Decimal,
    pub window_len: usize,
}

#[derive(Debug)]
struct BreakerBook {
    state: BreakerState,
    consecutive_losses: u32,
    outcomes: RollingWindow,
    /// Realized P&L percent per trading day
    daily_pnl: BTreeMap<NaiveDate, Decimal>,
    trading_day: Option<NaiveDate>,
}

impl BreakerBook {
    fn new(window: usize) -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_losses: 0,
            outcomes: RollingWindow::new(window),
            daily_pnl: BTreeMap::new(),
            trading_day: None,
        }
    }

    /// Moves to `today` and drops history older than the retention window.
    fn roll_day(&mut self, today: NaiveDate) {
        if self.trading_day.is_some_and(|day| day >= today) {
            return;
        }
        self.trading_day = Some(today);
        if let Some(cutoff) = today.checked_sub_days(Days::new(DAILY_HISTORY_DAYS)) {
            self.daily_pnl = self.daily_pnl.split_off(&cutoff);
        }
    }

    fn daily_loss_pct(&self) -> Decimal {
        self.trading_day
            .and_then(|day| self.daily_pnl.get(&day))
            .map_or(Decimal::ZERO, |pnl| (-*pnl).max(Decimal::ZERO))
    }
}

/// Thread-safe breaker; every lock acquisition is bounded and fails closed.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    lock_timeout: Duration,
    book: RwLock<BreakerBook>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("lock_timeout", &self.lock_timeout)
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>, lock_timeout: Duration) -> Self {
        let book = BreakerBook::new(config.zscore_window);
        Self {
            config,
            clock,
            lock_timeout,
            book: RwLock::new(book),
        }
    }

    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Gate for new approvals. Applies any due timed transition first.
    ///
    /// # Errors
    /// `CircuitBreakerActive` while `Open` or `Cooldown`; `LockTimeout` if
    /// the state lock could not be taken in time.
    pub fn check(&self) -> Result<(), RejectReason> {
        let now = self.clock.now();
        let mut book = self.write_book().map_err(RejectReason::from)?;
        self.advance(&mut book, now);
        if book.state.is_closed() {
            Ok(())
        } else {
            Err(RejectReason::CircuitBreakerActive {
                state: book.state.to_string(),
            })
        }
    }

    /// Books a closed trade and evaluates every trigger.
    ///
    /// The trading-day rollover and the loss accumulation happen under the
    /// same write guard. An outcome for an earlier trading day is booked to
    /// that day and does not count toward today's loss.
    ///
    /// # Errors
    /// Returns [`LockTimeout`] if the state lock could not be taken in time.
    pub fn record_outcome(&self, outcome: &TradeOutcome) -> Result<BreakerState, LockTimeout> {
        let now = self.clock.now();
        let mut book = self.write_book()?;
        self.advance(&mut book, now);

        let today = self.trading_day(now);
        let day = self.trading_day(outcome.closed_at).min(today);
        *book.daily_pnl.entry(day).or_default() += outcome.pnl_pct;

        let pnl = outcome.pnl_pct.to_f64().unwrap_or(0.0);
        let zscore = book
            .outcomes
            .zscore(pnl, self.config.zscore_min_samples);
        book.outcomes.push(pnl);

        if outcome.is_loss() {
            book.consecutive_losses += 1;
        } else {
            book.consecutive_losses = 0;
        }

        if !matches!(book.state, BreakerState::Open { .. }) {
            let trigger = zscore
                .filter(|z| *z <= -self.config.zscore_threshold)
                .map(|zscore| TripReason::ZScore { zscore })
                .or_else(|| {
                    (book.consecutive_losses >= self.config.max_consecutive_losses).then_some(
                        TripReason::ConsecutiveLosses {
                            count: book.consecutive_losses,
                        },
                    )
                })
                .or_else(|| self.daily_trigger(&book));
            if let Some(reason) = trigger {
                Self::open(&mut book, reason, now);
            }
        }

        Ok(book.state.clone())
    }

    /// Operator emergency stop. Stays open until [`CircuitBreaker::reset`].
    ///
    /// # Errors
    /// Returns [`LockTimeout`] if the state lock could not be taken in time.
    pub fn trip(&self) -> Result<(), LockTimeout> {
        let now = self.clock.now();
        let mut book = self.write_book()?;
        Self::open(&mut book, TripReason::Manual, now);
        Ok(())
    }

    /// Operator reset: closes the breaker and clears the streak and window.
    /// Today's realized loss is kept; it is a fact, not a breaker state.
    ///
    /// # Errors
    /// Returns [`LockTimeout`] if the state lock could not be taken in time.
    pub fn reset(&self) -> Result<(), LockTimeout> {
        let mut book = self.write_book()?;
        book.state = BreakerState::Closed;
        book.consecutive_losses = 0;
        book.outcomes.clear();
        info!("circuit breaker manually reset to closed");
        Ok(())
    }

    /// # Errors
    /// Returns [`LockTimeout`] if the state lock could not be taken in time.
    pub fn snapshot(&self) -> Result<BreakerSnapshot, LockTimeout> {
        let book = self
            .book
            .try_read_for(self.lock_timeout)
            .ok_or_else(|| self.timeout())?;
        Ok(BreakerSnapshot {
            state: book.state.clone(),
            consecutive_losses: book.consecutive_losses,
            trading_day: book.trading_day,
            daily_loss_pct: book.daily_loss_pct(),
            window_len: book.outcomes.len(),
        })
    }

    fn write_book(&self) -> Result<parking_lot::RwLockWriteGuard<'_, BreakerBook>, LockTimeout> {
        self.book.try_write_for(self.lock_timeout).ok_or_else(|| {
            let timeout = self.timeout();
            error!(
                lock = %timeout.lock,
                timeout_ms = timeout.timeout.as_millis() as u64,
                "circuit breaker lock timed out"
            );
            timeout
        })
    }

    fn timeout(&self) -> LockTimeout {
        LockTimeout::new(LockName::CircuitBreaker, self.lock_timeout)
    }

    fn trading_day(&self, at: DateTime<Utc>) -> NaiveDate {
        (at + chrono::Duration::hours(i64::from(self.config.trading_day_offset_hours))).date_naive()
    }

    fn daily_trigger(&self, book: &BreakerBook) -> Option<TripReason> {
        let loss_pct = book.daily_loss_pct();
        (loss_pct >= self.config.max_daily_loss_pct).then_some(TripReason::DailyLoss { loss_pct })
    }

    /// Applies the day rollover and any due timed transition.
    fn advance(&self, book: &mut BreakerBook, now: DateTime<Utc>) {
        book.roll_day(self.trading_day(now));

        if let BreakerState::Open { reason, opened_at } = &book.state {
            let manual = matches!(reason, TripReason::Manual);
            let open_until = *opened_at + span(self.config.open_duration);
            if !manual && now >= open_until {
                let until = open_until + span(self.config.cooldown);
                book.consecutive_losses = 0;
                book.outcomes.clear();
                book.state = BreakerState::Cooldown { until };
                warn!(%until, "circuit breaker entering cooldown");
            }
        }

        if let BreakerState::Cooldown { until } = book.state {
            if now >= until {
                if let Some(reason) = self.daily_trigger(book) {
                    Self::open(book, reason, now);
                } else {
                    book.state = BreakerState::Closed;
                    info!("circuit breaker closed");
                }
            }
        }
    }

    fn open(book: &mut BreakerBook, reason: TripReason, now: DateTime<Utc>) {
        error!(
            ?reason,
            consecutive_losses = book.consecutive_losses,
            daily_loss_pct = %book.daily_loss_pct(),
            "circuit breaker opened"
        );
        book.state = BreakerState::Open {
            reason,
            opened_at: now,
        };
    }
}

fn span(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::weeks(52))
}
