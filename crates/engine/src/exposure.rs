//! Multi-dimensional exposure control.
//!
//! Committed risk is tracked per symbol (split by side), strategy, asset
//! class, correlation cluster, and portfolio. Every limit is applied after
//! the safety buffer: `limit * (1 - buffer)`.
//!
//! Each configured symbol owns a partition lock; cross-symbol totals live
//! behind one exclusive lock taken after the partition. Commits re-validate
//! against the totals under that exclusive lock, so two symbols sharing a
//! strategy can never jointly exceed its limit.

use chrono::{DateTime, Utc};
use decision_core::config::{ExposureConfig, StaleCorrelationPolicy};
use decision_core::{
    AssetClass, Clock, CorrelationSnapshot, DecisionUid, Direction, ExposureDimension,
    InstrumentSpec, LockName, RejectReason,
};
use parking_lot::{Mutex, MutexGuard, RwLock};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Risk a decision wants to add.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureRequest {
    pub decision_uid: DecisionUid,
    pub symbol: String,
    pub strategy_id: String,
    pub direction: Direction,
    pub risk_pct: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// The uid was already committed; nothing changed
    AlreadyCommitted,
}

/// One open commitment. Dimension keys are frozen at commit time so a
/// later cluster remap releases from the right bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commitment {
    pub decision_uid: DecisionUid,
    pub strategy_id: String,
    pub direction: Direction,
    pub risk_pct: Decimal,
    pub asset_class: AssetClass,
    pub cluster: Option<String>,
}

/// Per-symbol commitments in arrival order.
#[derive(Debug, Default)]
pub(crate) struct SymbolBook {
    commitments: VecDeque<Commitment>,
}

/// Committed risk on each side of one symbol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideRisk {
    pub long: Decimal,
    pub short: Decimal,
}

impl SideRisk {
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.long + self.short
    }

    fn side_mut(&mut self, direction: Direction) -> &mut Decimal {
        match direction {
            Direction::Long => &mut self.long,
            Direction::Short => &mut self.short,
        }
    }
}

#[derive(Debug, Default)]
struct Totals {
    symbols: HashMap<String, SideRisk>,
    strategies: HashMap<String, Decimal>,
    asset_classes: HashMap<AssetClass, Decimal>,
    clusters: HashMap<String, Decimal>,
    portfolio: Decimal,
    /// Open decision uid -> symbol
    open: HashMap<DecisionUid, String>,
}

impl Totals {
    fn add(&mut self, symbol: &str, c: &Commitment) {
        *self
            .symbols
            .entry(symbol.to_string())
            .or_default()
            .side_mut(c.direction) += c.risk_pct;
        *self.strategies.entry(c.strategy_id.clone()).or_default() += c.risk_pct;
        *self.asset_classes.entry(c.asset_class).or_default() += c.risk_pct;
        if let Some(cluster) = &c.cluster {
            *self.clusters.entry(cluster.clone()).or_default() += c.risk_pct;
        }
        self.portfolio += c.risk_pct;
    }

    fn remove(&mut self, symbol: &str, c: &Commitment, amount: Decimal) {
        if let Some(side) = self.symbols.get_mut(symbol) {
            let slot = side.side_mut(c.direction);
            *slot = (*slot - amount).max(Decimal::ZERO);
            if side.total().is_zero() {
                self.symbols.remove(symbol);
            }
        }
        subtract(&mut self.strategies, &c.strategy_id, amount);
        subtract(&mut self.asset_classes, &c.asset_class, amount);
        if let Some(cluster) = &c.cluster {
            subtract(&mut self.clusters, cluster, amount);
        }
        self.portfolio = (self.portfolio - amount).max(Decimal::ZERO);
    }
}

fn subtract<K, Q>(map: &mut HashMap<K, Decimal>, key: &Q, amount: Decimal)
where
    K: std::borrow::Borrow<Q> + std::hash::Hash + Eq,
    Q: std::hash::Hash + Eq + ?Sized,
{
    if let Some(value) = map.get_mut(key) {
        *value = (*value - amount).max(Decimal::ZERO);
        if value.is_zero() {
            map.remove(key);
        }
    }
}

/// Point-in-time exposure for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExposureSnapshot {
    pub symbols: BTreeMap<String, SideRisk>,
    pub strategies: BTreeMap<String, Decimal>,
    pub asset_classes: BTreeMap<AssetClass, Decimal>,
    pub clusters: BTreeMap<String, Decimal>,
    pub portfolio: Decimal,
    pub open_decisions: usize,
    pub correlation_as_of: Option<DateTime<Utc>>,
}

pub struct ExposureTracker {
    config: ExposureConfig,
    instruments: BTreeMap<String, InstrumentSpec>,
    /// Fixed at construction; one per configured instrument
    partitions: HashMap<String, Mutex<SymbolBook>>,
    totals: RwLock<Totals>,
    correlations: RwLock<Option<Arc<CorrelationSnapshot>>>,
    clock: Arc<dyn Clock>,
    lock_timeout: Duration,
}

impl std::fmt::Debug for ExposureTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExposureTracker")
            .field("config", &self.config)
            .field("symbols", &self.partitions.len())
            .finish_non_exhaustive()
    }
}

impl ExposureTracker {
    #[must_use]
    pub fn new(
        config: ExposureConfig,
        instruments: BTreeMap<String, InstrumentSpec>,
        clock: Arc<dyn Clock>,
        lock_timeout: Duration,
    ) -> Self {
        let partitions = instruments
            .keys()
            .map(|symbol| (symbol.clone(), Mutex::new(SymbolBook::default())))
            .collect();
        Self {
            config,
            instruments,
            partitions,
            totals: RwLock::new(Totals::default()),
            correlations: RwLock::new(None),
            clock,
            lock_timeout,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ExposureConfig {
        &self.config
    }

    #[must_use]
    pub fn instrument(&self, symbol: &str) -> Option<&InstrumentSpec> {
        self.instruments.get(symbol)
    }

    /// Read-only limit check against current totals.
    ///
    /// # Errors
    /// Returns the first limit the request would breach, or a lock timeout.
    pub fn check(&self, request: &ExposureRequest) -> Result<(), RejectReason> {
        let asset_class = self.asset_class(&request.symbol)?;
        let snapshot = self.correlation_snapshot()?;
        let totals = self
            .totals
            .try_read_for(self.lock_timeout)
            .ok_or_else(|| self.timeout(LockName::ExposureTotals))?;
        self.evaluate(&totals, request, asset_class, snapshot.as_deref(), self.clock.now())
    }

    /// Validates and commits. Idempotent by decision uid.
    ///
    /// # Errors
    /// Returns the first limit the request would breach, an unknown
    /// instrument, or a lock timeout.
    pub fn commit(&self, request: &ExposureRequest) -> Result<CommitOutcome, RejectReason> {
        let mut book = self.partition(&request.symbol)?;
        self.commit_locked(&mut book, request)
    }

    /// Books an already-open position at boot without limit checks.
    /// Idempotent by decision uid.
    ///
    /// # Errors
    /// Returns an unknown instrument or a lock timeout.
    pub fn restore(&self, request: &ExposureRequest) -> Result<CommitOutcome, RejectReason> {
        let mut book = self.partition(&request.symbol)?;
        self.restore_locked(&mut book, request)
    }

    /// Restore with the symbol's partition already held.
    pub(crate) fn restore_locked(
        &self,
        book: &mut SymbolBook,
        request: &ExposureRequest,
    ) -> Result<CommitOutcome, RejectReason> {
        let asset_class = self.asset_class(&request.symbol)?;
        let snapshot = self.correlation_snapshot()?;
        let mut totals = self
            .totals
            .try_write_for(self.lock_timeout)
            .ok_or_else(|| self.timeout(LockName::ExposureTotals))?;
        if totals.open.contains_key(&request.decision_uid) {
            return Ok(CommitOutcome::AlreadyCommitted);
        }
        let commitment = Self::commitment(request, asset_class, snapshot.as_deref());
        totals.add(&request.symbol, &commitment);
        totals
            .open
            .insert(request.decision_uid.clone(), request.symbol.clone());
        book.commitments.push_back(commitment);
        info!(
            uid = %request.decision_uid,
            symbol = %request.symbol,
            risk_pct = %request.risk_pct,
            portfolio = %totals.portfolio,
            "restored open position"
        );
        Ok(CommitOutcome::Committed)
    }

    /// Releases up to `risk_pct` from `symbol`, oldest commitments first.
    /// Returns the amount actually released.
    ///
    /// # Errors
    /// Returns an unknown instrument or a lock timeout.
    pub fn release(&self, symbol: &str, risk_pct: Decimal) -> Result<Decimal, RejectReason> {
        let mut book = self.partition(symbol)?;
        let mut totals = self
            .totals
            .try_write_for(self.lock_timeout)
            .ok_or_else(|| self.timeout(LockName::ExposureTotals))?;

        let mut remaining = risk_pct.max(Decimal::ZERO);
        while remaining > Decimal::ZERO {
            let Some(front) = book.commitments.front_mut() else {
                break;
            };
            let take = remaining.min(front.risk_pct);
            totals.remove(symbol, front, take);
            front.risk_pct -= take;
            remaining -= take;
            if front.risk_pct.is_zero() {
                if let Some(done) = book.commitments.pop_front() {
                    totals.open.remove(&done.decision_uid);
                }
            }
        }

        let released = risk_pct.max(Decimal::ZERO) - remaining;
        debug!(%symbol, %released, "exposure released");
        Ok(released)
    }

    /// Releases everything committed under `uid`. Returns the released risk,
    /// or `None` if the uid holds nothing.
    ///
    /// # Errors
    /// Returns a lock timeout.
    pub fn release_decision(&self, uid: &DecisionUid) -> Result<Option<Decimal>, RejectReason> {
        let symbol = {
            let totals = self
                .totals
                .try_read_for(self.lock_timeout)
                .ok_or_else(|| self.timeout(LockName::ExposureTotals))?;
            totals.open.get(uid).cloned()
        };
        let Some(symbol) = symbol else {
            return Ok(None);
        };
        let mut book = self.partition(&symbol)?;
        self.release_locked(&mut book, &symbol, uid)
    }

    /// Replaces the correlation snapshot.
    ///
    /// # Errors
    /// Returns a lock timeout.
    pub fn update_correlations(&self, snapshot: Arc<CorrelationSnapshot>) -> Result<(), RejectReason> {
        let as_of = snapshot.as_of();
        *self
            .correlations
            .try_write_for(self.lock_timeout)
            .ok_or_else(|| self.timeout(LockName::Exposure))? = Some(snapshot);
        info!(%as_of, "correlation snapshot updated");
        Ok(())
    }

    /// # Errors
    /// Returns a lock timeout.
    pub fn correlation_snapshot(&self) -> Result<Option<Arc<CorrelationSnapshot>>, RejectReason> {
        self.correlations
            .try_read_for(self.lock_timeout)
            .map(|guard| guard.clone())
            .ok_or_else(|| self.timeout(LockName::Exposure))
    }

    /// # Errors
    /// Returns a lock timeout.
    pub fn snapshot(&self) -> Result<ExposureSnapshot, RejectReason> {
        let correlation_as_of = self.correlation_snapshot()?.map(|s| s.as_of());
        let totals = self
            .totals
            .try_read_for(self.lock_timeout)
            .ok_or_else(|| self.timeout(LockName::ExposureTotals))?;
        Ok(ExposureSnapshot {
            symbols: totals.symbols.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            strategies: totals.strategies.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            asset_classes: totals.asset_classes.iter().map(|(k, v)| (*k, *v)).collect(),
            clusters: totals.clusters.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            portfolio: totals.portfolio,
            open_decisions: totals.open.len(),
            correlation_as_of,
        })
    }

    /// Takes the partition lock for `symbol`.
    pub(crate) fn partition(&self, symbol: &str) -> Result<MutexGuard<'_, SymbolBook>, RejectReason> {
        let partition = self
            .partitions
            .get(symbol)
            .ok_or_else(|| RejectReason::UnknownInstrument {
                symbol: symbol.to_string(),
            })?;
        partition
            .try_lock_for(self.lock_timeout)
            .ok_or_else(|| self.timeout(LockName::Exposure))
    }

    /// Commit with the symbol's partition already held.
    pub(crate) fn commit_locked(
        &self,
        book: &mut SymbolBook,
        request: &ExposureRequest,
    ) -> Result<CommitOutcome, RejectReason> {
        let asset_class = self.asset_class(&request.symbol)?;
        let snapshot = self.correlation_snapshot()?;
        let mut totals = self
            .totals
            .try_write_for(self.lock_timeout)
            .ok_or_else(|| self.timeout(LockName::ExposureTotals))?;

        if totals.open.contains_key(&request.decision_uid) {
            return Ok(CommitOutcome::AlreadyCommitted);
        }
        self.evaluate(&totals, request, asset_class, snapshot.as_deref(), self.clock.now())?;

        let commitment = Self::commitment(request, asset_class, snapshot.as_deref());
        totals.add(&request.symbol, &commitment);
        totals
            .open
            .insert(request.decision_uid.clone(), request.symbol.clone());
        book.commitments.push_back(commitment);
        debug!(
            uid = %request.decision_uid,
            symbol = %request.symbol,
            risk_pct = %request.risk_pct,
            portfolio = %totals.portfolio,
            "exposure committed"
        );
        Ok(CommitOutcome::Committed)
    }

    /// Release with the symbol's partition already held.
    pub(crate) fn release_locked(
        &self,
        book: &mut SymbolBook,
        symbol: &str,
        uid: &DecisionUid,
    ) -> Result<Option<Decimal>, RejectReason> {
        let mut totals = self
            .totals
            .try_write_for(self.lock_timeout)
            .ok_or_else(|| self.timeout(LockName::ExposureTotals))?;
        let Some(index) = book
            .commitments
            .iter()
            .position(|c| &c.decision_uid == uid)
        else {
            return Ok(None);
        };
        let Some(commitment) = book.commitments.remove(index) else {
            return Ok(None);
        };
        totals.remove(symbol, &commitment, commitment.risk_pct);
        totals.open.remove(uid);
        debug!(%uid, %symbol, risk_pct = %commitment.risk_pct, "decision exposure released");
        Ok(Some(commitment.risk_pct))
    }

    fn commitment(
        request: &ExposureRequest,
        asset_class: AssetClass,
        snapshot: Option<&CorrelationSnapshot>,
    ) -> Commitment {
        Commitment {
            decision_uid: request.decision_uid.clone(),
            strategy_id: request.strategy_id.clone(),
            direction: request.direction,
            risk_pct: request.risk_pct,
            asset_class,
            cluster: snapshot
                .and_then(|s| s.cluster_of(&request.symbol))
                .map(str::to_string),
        }
    }

    fn asset_class(&self, symbol: &str) -> Result<AssetClass, RejectReason> {
        self.instruments
            .get(symbol)
            .map(|spec| spec.asset_class)
            .ok_or_else(|| RejectReason::UnknownInstrument {
                symbol: symbol.to_string(),
            })
    }

    fn timeout(&self, lock: LockName) -> RejectReason {
        error!(%lock, timeout_ms = self.lock_timeout.as_millis() as u64, "exposure lock timed out");
        RejectReason::LockTimeout { lock }
    }

    fn evaluate(
        &self,
        totals: &Totals,
        request: &ExposureRequest,
        asset_class: AssetClass,
        snapshot: Option<&CorrelationSnapshot>,
        now: DateTime<Utc>,
    ) -> Result<(), RejectReason> {
        let cfg = &self.config;
        let requested = request.risk_pct;
        let within = |dimension: ExposureDimension,
                      key: String,
                      committed: Decimal,
                      limit: Decimal|
         -> Result<(), RejectReason> {
            let effective_limit = cfg.effective(limit);
            if committed + requested > effective_limit {
                return Err(RejectReason::ExposureLimitExceeded {
                    dimension,
                    key,
                    committed,
                    requested,
                    effective_limit,
                });
            }
            Ok(())
        };

        let same_symbol = totals
            .symbols
            .get(&request.symbol)
            .map_or(Decimal::ZERO, SideRisk::total);
        within(
            ExposureDimension::Symbol,
            request.symbol.clone(),
            same_symbol,
            cfg.symbol_limit(&request.symbol),
        )?;
        within(
            ExposureDimension::Strategy,
            request.strategy_id.clone(),
            totals
                .strategies
                .get(&request.strategy_id)
                .copied()
                .unwrap_or_default(),
            cfg.strategy_limit(&request.strategy_id),
        )?;
        within(
            ExposureDimension::AssetClass,
            asset_class.to_string(),
            totals
                .asset_classes
                .get(&asset_class)
                .copied()
                .unwrap_or_default(),
            cfg.max_asset_class_risk_pct,
        )?;
        if let Some(cluster) = snapshot.and_then(|s| s.cluster_of(&request.symbol)) {
            within(
                ExposureDimension::Cluster,
                cluster.to_string(),
                totals.clusters.get(cluster).copied().unwrap_or_default(),
                cfg.max_cluster_risk_pct,
            )?;
        }
        within(
            ExposureDimension::Portfolio,
            "portfolio".to_string(),
            totals.portfolio,
            cfg.max_portfolio_risk_pct,
        )?;

        self.check_correlated(totals, request, same_symbol, snapshot, now)
    }

    /// Correlated exposure = own risk + same-symbol risk + sum over other
    /// symbols of `max(0, rho * sign) * risk`. Unknown or stale pairs use
    /// the conservative default on both sides.
    fn check_correlated(
        &self,
        totals: &Totals,
        request: &ExposureRequest,
        same_symbol: Decimal,
        snapshot: Option<&CorrelationSnapshot>,
        now: DateTime<Utc>,
    ) -> Result<(), RejectReason> {
        let cfg = &self.config;
        let effective_limit = cfg.effective(cfg.max_correlated_risk_pct);
        let max_age = chrono::Duration::from_std(cfg.max_correlation_age)
            .unwrap_or_else(|_| chrono::Duration::hours(4));
        let fresh = snapshot.filter(|s| s.age(now) <= max_age);
        let stale = fresh.is_none();

        if stale && cfg.stale_correlation_policy == StaleCorrelationPolicy::Reject {
            return Err(RejectReason::CorrelationLimitExceeded {
                symbol: request.symbol.clone(),
                correlated: request.risk_pct + same_symbol,
                effective_limit,
                stale_snapshot: true,
            });
        }

        let unknown = to_decimal(cfg.unknown_correlation);
        let sign = request.direction.sign();
        let mut correlated = request.risk_pct + same_symbol;
        for (other, side) in &totals.symbols {
            if other == &request.symbol {
                continue;
            }
            correlated += match fresh.and_then(|s| s.correlation(&request.symbol, other)) {
                Some(rho) => {
                    to_decimal((rho * sign).max(0.0)) * side.long
                        + to_decimal((-rho * sign).max(0.0)) * side.short
                }
                None => unknown * side.total(),
            };
        }

        if correlated > effective_limit {
            return Err(RejectReason::CorrelationLimitExceeded {
                symbol: request.symbol.clone(),
                correlated,
                effective_limit,
                stale_snapshot: stale,
            });
        }
        Ok(())
    }
}

fn to_decimal(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or(Decimal::ONE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use decision_core::ManualClock;
    use rust_decimal_macros::dec;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn instruments() -> BTreeMap<String, InstrumentSpec> {
        [
            ("EURUSD", AssetClass::Fx),
            ("GBPUSD", AssetClass::Fx),
            ("USDJPY", AssetClass::Fx),
            ("AUDUSD", AssetClass::Fx),
            ("XAUUSD", AssetClass::Commodity),
        ]
        .into_iter()
        .map(|(symbol, class)| {
            (
                symbol.to_string(),
                InstrumentSpec::new(class, dec!(100000), dec!(0.0040)),
            )
        })
        .collect()
    }

    fn build(config: ExposureConfig) -> (ExposureTracker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start()));
        let tracker = ExposureTracker::new(
            config,
            instruments(),
            clock.clone(),
            Duration::from_millis(100),
        );
        (tracker, clock)
    }

    fn request(uid: &str, symbol: &str, strategy: &str, direction: Direction, risk: Decimal) -> ExposureRequest {
        ExposureRequest {
            decision_uid: DecisionUid::derive(strategy, uid, start()),
            symbol: symbol.to_string(),
            strategy_id: strategy.to_string(),
            direction,
            risk_pct: risk,
        }
    }

    fn loose() -> ExposureConfig {
        ExposureConfig {
            max_correlated_risk_pct: dec!(100),
            ..ExposureConfig::default()
        }
    }

    #[test]
    fn buffer_applies_to_asset_class_limit() {
        let (tracker, _) = build(loose());
        // 5.9% FX restored across symbols, above the 5.4% effective limit.
        for (i, symbol) in ["EURUSD", "GBPUSD", "USDJPY"].into_iter().enumerate() {
            let risk = if i == 2 { dec!(1.9) } else { dec!(2.0) };
            tracker
                .restore(&request(symbol, symbol, &format!("s{i}"), Direction::Long, risk))
                .unwrap();
        }

        let err = tracker
            .check(&request("a", "AUDUSD", "s9", Direction::Long, dec!(0.5)))
            .unwrap_err();
        match err {
            RejectReason::ExposureLimitExceeded {
                dimension,
                committed,
                effective_limit,
                ..
            } => {
                assert_eq!(dimension, ExposureDimension::AssetClass);
                assert_eq!(committed, dec!(5.9));
                assert_eq!(effective_limit, dec!(5.4));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn symbol_override_is_respected() {
        let mut config = loose();
        config.symbol_limits.insert("XAUUSD".to_string(), dec!(1.0));
        let (tracker, _) = build(config);
        let err = tracker
            .commit(&request("g", "XAUUSD", "gold", Direction::Long, dec!(0.95)))
            .unwrap_err();
        assert_eq!(err.code(), "exposure_limit_exceeded");
        assert!(tracker
            .commit(&request("g", "XAUUSD", "gold", Direction::Long, dec!(0.9)))
            .is_ok());
    }

    #[test]
    fn commit_is_idempotent() {
        let (tracker, _) = build(loose());
        let req = request("e1", "EURUSD", "momentum", Direction::Long, dec!(0.8));
        assert_eq!(tracker.commit(&req).unwrap(), CommitOutcome::Committed);
        assert_eq!(tracker.commit(&req).unwrap(), CommitOutcome::AlreadyCommitted);
        assert_eq!(tracker.snapshot().unwrap().portfolio, dec!(0.8));
    }

    #[test]
    fn release_is_fifo_across_commitments() {
        let (tracker, _) = build(loose());
        let first = request("e1", "EURUSD", "momentum", Direction::Long, dec!(0.5));
        let second = request("e2", "EURUSD", "breakout", Direction::Long, dec!(0.7));
        tracker.commit(&first).unwrap();
        tracker.commit(&second).unwrap();

        assert_eq!(tracker.release("EURUSD", dec!(0.6)).unwrap(), dec!(0.6));
        let snapshot = tracker.snapshot().unwrap();
        assert!(!snapshot.strategies.contains_key("momentum"));
        assert_eq!(snapshot.strategies["breakout"], dec!(0.6));
        assert_eq!(snapshot.open_decisions, 1);

        // Releasing more than is open releases what is there.
        assert_eq!(tracker.release("EURUSD", dec!(5)).unwrap(), dec!(0.6));
        assert_eq!(tracker.snapshot().unwrap(), ExposureSnapshot::default());
    }

    #[test]
    fn release_decision_removes_only_that_uid() {
        let (tracker, _) = build(loose());
        let first = request("e1", "EURUSD", "momentum", Direction::Long, dec!(0.5));
        let second = request("e2", "EURUSD", "momentum", Direction::Short, dec!(0.3));
        tracker.commit(&first).unwrap();
        tracker.commit(&second).unwrap();

        assert_eq!(
            tracker.release_decision(&second.decision_uid).unwrap(),
            Some(dec!(0.3))
        );
        assert_eq!(tracker.release_decision(&second.decision_uid).unwrap(), None);
        let side = tracker.snapshot().unwrap().symbols["EURUSD"];
        assert_eq!(side, SideRisk { long: dec!(0.5), short: Decimal::ZERO });
    }

    #[test]
    fn unknown_correlation_is_conservative() {
        let config = ExposureConfig {
            max_correlated_risk_pct: dec!(2.0),
            ..ExposureConfig::default()
        };
        let (tracker, _) = build(config);
        tracker
            .commit(&request("e1", "EURUSD", "a", Direction::Long, dec!(1.0)))
            .unwrap();
        // No snapshot: the other side of a pair counts at 0.8 regardless of
        // direction, so 0.95 + 0.8 fits under 1.8 and 1.05 + 0.8 does not.
        assert!(tracker
            .check(&request("g1", "GBPUSD", "b", Direction::Short, dec!(0.95)))
            .is_ok());
        let err = tracker
            .check(&request("g1", "GBPUSD", "b", Direction::Short, dec!(1.05)))
            .unwrap_err();
        assert!(matches!(
            err,
            RejectReason::CorrelationLimitExceeded { stale_snapshot: true, .. }
        ));
    }

    #[test]
    fn hedged_direction_reduces_correlated_exposure() {
        let config = ExposureConfig {
            max_correlated_risk_pct: dec!(2.0),
            ..ExposureConfig::default()
        };
        let (tracker, clock) = build(config);
        tracker
            .update_correlations(Arc::new(
                CorrelationSnapshot::new(clock.now()).with_correlation("EURUSD", "GBPUSD", 0.9),
            ))
            .unwrap();
        tracker
            .commit(&request("e1", "EURUSD", "a", Direction::Long, dec!(1.0)))
            .unwrap();

        // Same direction: 1.0 + 0.9 = 1.9 > 1.8.
        assert!(tracker
            .check(&request("g1", "GBPUSD", "b", Direction::Long, dec!(1.0)))
            .is_err());
        // Opposite direction on a positive correlation is a hedge.
        assert!(tracker
            .check(&request("g2", "GBPUSD", "b", Direction::Short, dec!(1.0)))
            .is_ok());
    }

    #[test]
    fn stale_snapshot_falls_back_or_rejects() {
        let config = ExposureConfig {
            max_correlated_risk_pct: dec!(2.0),
            ..ExposureConfig::default()
        };
        let (tracker, clock) = build(config.clone());
        tracker
            .update_correlations(Arc::new(
                CorrelationSnapshot::new(clock.now()).with_correlation("EURUSD", "GBPUSD", -0.9),
            ))
            .unwrap();
        tracker
            .commit(&request("e1", "EURUSD", "a", Direction::Long, dec!(1.0)))
            .unwrap();
        let hedge = request("g1", "GBPUSD", "b", Direction::Long, dec!(1.5));
        assert!(tracker.check(&hedge).is_ok(), "fresh negative correlation");

        clock.advance(chrono::Duration::hours(5));
        assert!(tracker.check(&hedge).is_err(), "stale uses +0.8");

        let reject = ExposureConfig {
            stale_correlation_policy: StaleCorrelationPolicy::Reject,
            ..config
        };
        let (strict, _) = build(reject);
        let err = strict
            .check(&request("x", "XAUUSD", "c", Direction::Long, dec!(0.1)))
            .unwrap_err();
        assert!(matches!(
            err,
            RejectReason::CorrelationLimitExceeded { stale_snapshot: true, .. }
        ));
    }

    #[test]
    fn cluster_limit_uses_snapshot_membership() {
        let config = ExposureConfig {
            max_cluster_risk_pct: dec!(2.0),
            ..loose()
        };
        let (tracker, clock) = build(config);
        tracker
            .update_correlations(Arc::new(
                CorrelationSnapshot::new(clock.now())
                    .with_cluster("EURUSD", "usd-majors")
                    .with_cluster("GBPUSD", "usd-majors"),
            ))
            .unwrap();
        tracker
            .commit(&request("e1", "EURUSD", "a", Direction::Long, dec!(1.0)))
            .unwrap();
        let err = tracker
            .commit(&request("g1", "GBPUSD", "b", Direction::Long, dec!(1.0)))
            .unwrap_err();
        assert!(matches!(
            err,
            RejectReason::ExposureLimitExceeded { dimension: ExposureDimension::Cluster, .. }
        ));
        assert!(tracker
            .commit(&request("x1", "XAUUSD", "b", Direction::Long, dec!(1.0)))
            .is_ok());
    }

    #[test]
    fn unknown_symbol_is_rejected() {
        let (tracker, _) = build(loose());
        let err = tracker
            .commit(&request("z", "ZARJPY", "a", Direction::Long, dec!(0.1)))
            .unwrap_err();
        assert_eq!(err.code(), "unknown_instrument");
    }
}
