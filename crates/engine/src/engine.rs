//! The decision pipeline shared by all producers.
//!
//! Per signal: validate, gate on governance and instrument, score, stage
//! in the arbitration round for its conflict key, size the round's winner,
//! check the breaker, then take the ordered locks to commit exposure, claim
//! the slot, and record the decision. Scoring and sizing happen before any
//! ordered lock is taken; decisions are broadcast after the locks are
//! released.

use chrono::{DateTime, Utc};
use decision_core::{
    ApprovedDecision, Clock, ConfigError, CorrelationSnapshot, DecisionUid, EngineConfig,
    FeatureSource, LockName, LockTimeout, MarketContext, RejectReason, RejectedDecision,
    RiskDecision, Signal, SnapshotReceiver, TradeOutcome, ValidatedSignal,
};
use decision_governance::{AutoRollback, GovernanceError, GovernanceGuard, TunableParameters};
use decision_risk::{BreakerSnapshot, BreakerState, CircuitBreaker, PositionSizer};
use parking_lot::{Mutex, RwLock};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::arbiter::{
    select_winner, ArbitrationRounds, Candidate, Claim, ConflictArbiter, ConflictKey, Joined,
};
use crate::exposure::{CommitOutcome, ExposureRequest, ExposureSnapshot, ExposureTracker};
use crate::ledger::{DecisionLedger, LedgerDraft, LedgerEntry};
use crate::locks::LockOrder;
use crate::performance::PerformanceBook;

/// Buffered events per subscriber before slow receivers start lagging.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Lock timeouts a round follower waits past the round's close.
const ROUND_PATIENCE_TIMEOUTS: u32 = 8;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Governance(#[from] GovernanceError),

    #[error(transparent)]
    LockTimeout(#[from] LockTimeout),

    #[error("operation blocked: {0}")]
    Blocked(#[from] RejectReason),
}

/// The answer for one signal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub decision_uid: DecisionUid,
    pub symbol: String,
    pub strategy_id: String,
    pub quality: Option<f64>,
    pub decision: RiskDecision,
    /// Ledger sequence; `None` only when the ledger itself timed out
    pub seq: Option<u64>,
    /// The uid had already been decided; this is the recorded outcome
    pub replayed: bool,
}

impl Evaluation {
    fn from_entry(entry: &LedgerEntry, replayed: bool) -> Self {
        Self {
            decision_uid: entry.decision_uid.clone(),
            symbol: entry.symbol.clone(),
            strategy_id: entry.strategy_id.clone(),
            quality: entry.quality,
            decision: entry.decision.clone(),
            seq: Some(entry.seq),
            replayed,
        }
    }

    fn unrecorded(draft: LedgerDraft, reason: RejectReason) -> Self {
        Self {
            decision_uid: draft.decision_uid,
            symbol: draft.symbol,
            strategy_id: draft.strategy_id,
            quality: draft.quality,
            decision: RiskDecision::rejected(reason),
            seq: None,
            replayed: false,
        }
    }
}

/// Monitoring view. Built from published views only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSnapshot {
    pub version: String,
    pub taken_at: DateTime<Utc>,
    pub equity: Decimal,
    pub exposure: ExposureSnapshot,
    pub breaker: BreakerSnapshot,
    pub ledger_len: usize,
    pub open_claims: usize,
}

/// What a trade close released and booked.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseReport {
    pub decision_uid: DecisionUid,
    pub released_risk_pct: Option<Decimal>,
    pub claim_released: bool,
    /// Breaker state after booking; `None` if not booked by this call
    pub breaker: Option<BreakerState>,
    pub rollback: Option<AutoRollback>,
    /// Books that timed out; a retried close books them
    pub unbooked: Vec<LockTimeout>,
    /// The close had already been fully processed
    pub duplicate: bool,
}

impl CloseReport {
    fn blank(decision_uid: DecisionUid, duplicate: bool) -> Self {
        Self {
            decision_uid,
            released_risk_pct: None,
            claim_released: false,
            breaker: None,
            rollback: None,
            unbooked: Vec::new(),
            duplicate,
        }
    }
}

/// Which close steps have run for one decision.
#[derive(Debug, Clone, Copy, Default)]
struct CloseProgress {
    released: bool,
    breaker: bool,
    performance: bool,
    governance: bool,
}

impl CloseProgress {
    fn is_complete(self) -> bool {
        self.released && self.breaker && self.performance && self.governance
    }
}

/// A signal that passed the pre-lock gates.
#[derive(Debug)]
struct Scored {
    index: usize,
    signal: ValidatedSignal,
    quality: f64,
    reference_stop: Option<Decimal>,
}

impl Scored {
    fn draft(&self, decision: RiskDecision) -> LedgerDraft {
        draft_for(self.signal.signal(), self.signal.uid().clone(), Some(self.quality), decision)
    }
}

enum Prepared {
    Done(Evaluation),
    Scored(Candidate<Scored>),
}

/// A staged candidate's place in the caller's batch.
struct Member {
    index: usize,
    uid: DecisionUid,
    /// Recorded if the round's outcome never arrives
    fallback: LedgerDraft,
}

impl Member {
    fn of(candidate: &Candidate<Scored>) -> Self {
        Self {
            index: candidate.item.index,
            uid: candidate.uid.clone(),
            fallback: candidate.item.draft(RiskDecision::rejected(RejectReason::LockTimeout {
                lock: LockName::Arbiter,
            })),
        }
    }
}

fn draft_for(
    signal: &Signal,
    decision_uid: DecisionUid,
    quality: Option<f64>,
    decision: RiskDecision,
) -> LedgerDraft {
    LedgerDraft {
        decision_uid,
        symbol: signal.symbol.clone(),
        direction: signal.direction,
        strategy_id: signal.strategy_id.clone(),
        signal_timestamp: signal.timestamp,
        quality,
        decision,
    }
}

pub struct DecisionEngine {
    version: String,
    sizer: PositionSizer,
    breaker: CircuitBreaker,
    exposure: ExposureTracker,
    arbiter: ConflictArbiter,
    rounds: ArbitrationRounds<Scored, Evaluation>,
    ledger: DecisionLedger,
    performance: PerformanceBook,
    governance: Arc<GovernanceGuard>,
    features: Arc<dyn FeatureSource>,
    clock: Arc<dyn Clock>,
    equity: RwLock<Decimal>,
    closes: Mutex<HashMap<DecisionUid, CloseProgress>>,
    lock_timeout: Duration,
    arrivals: AtomicU64,
    approved_tx: broadcast::Sender<ApprovedDecision>,
    rejected_tx: broadcast::Sender<RejectedDecision>,
}

impl std::fmt::Debug for DecisionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionEngine")
            .field("version", &self.version)
            .field("equity", &*self.equity.read())
            .finish_non_exhaustive()
    }
}

impl DecisionEngine {
    /// Builds an engine with governance from the bundle's policy.
    ///
    /// # Errors
    /// Returns [`EngineError::Config`] for an invalid bundle, or a
    /// governance error if the baseline snapshot cannot be stored.
    pub fn new(
        config: EngineConfig,
        features: Arc<dyn FeatureSource>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let governance = Arc::new(GovernanceGuard::from_config(&config, Arc::clone(&clock))?);
        Self::with_governance(config, features, clock, governance)
    }

    /// Builds an engine around an existing guard, e.g. one shared with the
    /// adaptive layer.
    ///
    /// # Errors
    /// Returns [`EngineError::Config`] for an invalid bundle.
    pub fn with_governance(
        config: EngineConfig,
        features: Arc<dyn FeatureSource>,
        clock: Arc<dyn Clock>,
        governance: Arc<GovernanceGuard>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let timeout = config.locks.timeout;
        let (approved_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (rejected_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        info!(
            version = %config.version,
            equity = %config.account.equity,
            instruments = config.instruments.len(),
            lock_timeout_ms = timeout.as_millis() as u64,
            arbitration_window_ms = config.arbitration.window.as_millis() as u64,
            "decision engine ready"
        );

        Ok(Self {
            version: config.version,
            sizer: PositionSizer::new(config.sizing)?,
            breaker: CircuitBreaker::new(config.circuit_breaker, Arc::clone(&clock), timeout),
            exposure: ExposureTracker::new(
                config.exposure,
                config.instruments,
                Arc::clone(&clock),
                timeout,
            ),
            arbiter: ConflictArbiter::new(timeout),
            rounds: ArbitrationRounds::new(
                config.arbitration.window,
                timeout * ROUND_PATIENCE_TIMEOUTS,
                timeout,
            ),
            ledger: DecisionLedger::new(timeout),
            performance: PerformanceBook::new(timeout),
            governance,
            features,
            clock,
            equity: RwLock::new(config.account.equity),
            closes: Mutex::new(HashMap::new()),
            lock_timeout: timeout,
            arrivals: AtomicU64::new(0),
            approved_tx,
            rejected_tx,
        })
    }

    #[must_use]
    pub fn governance(&self) -> &Arc<GovernanceGuard> {
        &self.governance
    }

    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    #[must_use]
    pub fn ledger(&self) -> &DecisionLedger {
        &self.ledger
    }

    #[must_use]
    pub fn exposure(&self) -> &ExposureTracker {
        &self.exposure
    }

    #[must_use]
    pub fn arbiter(&self) -> &ConflictArbiter {
        &self.arbiter
    }

    #[must_use]
    pub fn performance(&self) -> &PerformanceBook {
        &self.performance
    }

    #[must_use]
    pub fn subscribe_approved(&self) -> broadcast::Receiver<ApprovedDecision> {
        self.approved_tx.subscribe()
    }

    #[must_use]
    pub fn subscribe_rejected(&self) -> broadcast::Receiver<RejectedDecision> {
        self.rejected_tx.subscribe()
    }

    pub fn update_equity(&self, equity: Decimal) {
        *self.equity.write() = equity;
        info!(%equity, "account equity updated");
    }

    #[must_use]
    pub fn equity(&self) -> Decimal {
        *self.equity.read()
    }

    /// Evaluates a batch. Returns one evaluation per input signal, in input
    /// order. Signals sharing a decision uid share one outcome.
    ///
    /// Blocks for up to the arbitration window so that conflicting signals
    /// submitted concurrently by other producers are ranked together with
    /// this batch's.
    pub fn evaluate_batch(&self, signals: Vec<Signal>) -> Vec<Evaluation> {
        let params = match self.governance.parameters() {
            Ok(params) => Some(params),
            Err(timeout) => {
                error!(%timeout, "parameter store unavailable; rejecting batch");
                None
            }
        };
        let tie_epsilon = params
            .as_ref()
            .map_or(0.0, |p| p.arbitration.tie_epsilon);

        let mut results: Vec<Option<Evaluation>> = vec![None; signals.len()];
        let mut first_seen: HashMap<DecisionUid, usize> = HashMap::new();
        let mut aliases: Vec<(usize, usize)> = Vec::new();
        let mut groups: Vec<(ConflictKey, Vec<Candidate<Scored>>)> = Vec::new();
        let mut group_of: HashMap<ConflictKey, usize> = HashMap::new();

        for (index, signal) in signals.into_iter().enumerate() {
            let uid = signal.decision_uid();
            if let Some(&first) = first_seen.get(&uid) {
                aliases.push((index, first));
                continue;
            }
            first_seen.insert(uid.clone(), index);

            match self.prepare(index, signal, uid, params.as_deref()) {
                Prepared::Done(evaluation) => results[index] = Some(evaluation),
                Prepared::Scored(candidate) => {
                    let key = ConflictKey::of(candidate.item.signal.signal());
                    let slot = *group_of.entry(key.clone()).or_insert_with(|| {
                        groups.push((key, Vec::new()));
                        groups.len() - 1
                    });
                    groups[slot].1.push(candidate);
                }
            }
        }

        let mut leading = Vec::new();
        let mut following = Vec::new();
        for (key, candidates) in groups {
            let members: Vec<Member> = candidates.iter().map(Member::of).collect();
            match self.rounds.join(key, candidates) {
                Ok(Joined::Leader(ticket)) => leading.push((ticket, members)),
                Ok(Joined::Follower(ticket)) => following.push((ticket, members)),
                Err(timeout) => {
                    warn!(%timeout, staged = members.len(), "arbitration round unavailable");
                    for member in members {
                        results[member.index] = Some(self.finish(member.fallback));
                    }
                }
            }
        }

        // Leaders decide before anyone waits, so no caller waits on a round
        // whose leader is itself waiting.
        for (ticket, members) in leading {
            let decided = match self.rounds.close(&ticket) {
                Some(candidates) => self.resolve(ticket.key(), candidates, tie_epsilon),
                None => HashMap::new(),
            };
            for member in members {
                results[member.index] = Some(match decided.get(&member.uid) {
                    Some(evaluation) => evaluation.clone(),
                    None => self.finish(member.fallback),
                });
            }
            self.rounds.settle(decided);
        }

        for (ticket, members) in following {
            for member in members {
                let mut evaluation = match self.rounds.wait(&ticket, &member.uid) {
                    Some(evaluation) => evaluation,
                    None => {
                        warn!(uid = %member.uid, key = %ticket.key(), "arbitration outcome not received");
                        self.finish(member.fallback)
                    }
                };
                evaluation.replayed |= ticket.is_duplicate(&member.uid);
                results[member.index] = Some(evaluation);
            }
        }

        for (index, first) in aliases {
            results[index] = results[first].clone().map(|mut evaluation| {
                evaluation.replayed = true;
                evaluation
            });
        }

        results.into_iter().flatten().collect()
    }

    /// Withdraws a signal before it is decided. Withdrawing an already
    /// decided uid returns the recorded decision.
    pub fn withdraw(&self, signal: &Signal) -> Evaluation {
        let uid = signal.decision_uid();
        info!(%uid, symbol = %signal.symbol, strategy = %signal.strategy_id, "withdrawal requested");
        self.finish(draft_for(
            signal,
            uid,
            None,
            RiskDecision::rejected(RejectReason::Withdrawn),
        ))
    }

    /// Processes an external close: releases the decision's exposure and
    /// slot, books the outcome with the breaker and performance book, and
    /// feeds governance degradation detection.
    ///
    /// Each step runs at most once per decision uid. A re-delivered close
    /// is reported as a duplicate, and a retry after a partial failure only
    /// runs the steps that did not complete.
    ///
    /// # Errors
    /// Returns [`EngineError::Blocked`] if the release locks time out,
    /// [`EngineError::LockTimeout`] if another close holds the close book
    /// past the lock timeout, or a governance error from an automatic
    /// rollback.
    pub fn on_trade_closed(&self, outcome: &TradeOutcome) -> Result<CloseReport, EngineError> {
        let uid = &outcome.decision_uid;
        let mut closes = self
            .closes
            .try_lock_for(self.lock_timeout)
            .ok_or(LockTimeout::new(LockName::Closes, self.lock_timeout))?;
        let mut progress = closes.get(uid).copied().unwrap_or_default();
        if progress.is_complete() {
            warn!(%uid, symbol = %outcome.symbol, "duplicate close ignored");
            return Ok(CloseReport::blank(uid.clone(), true));
        }

        let mut report = CloseReport::blank(uid.clone(), false);
        if !progress.released {
            let mut held = self
                .lock_order()
                .arbiter()?
                .exposure(&outcome.symbol)
                .map_err(|stalled| stalled.reason)?;
            report.released_risk_pct = held.release_decision(uid)?;
            report.claim_released = held.above().release(uid).is_some();
            progress.released = true;
        }

        if !progress.breaker {
            match self.breaker.record_outcome(outcome) {
                Ok(state) => {
                    report.breaker = Some(state);
                    progress.breaker = true;
                }
                Err(timeout) => {
                    error!(%uid, %timeout, "outcome not booked with the circuit breaker");
                    report.unbooked.push(timeout);
                }
            }
        }
        if !progress.performance {
            match self.performance.record(outcome) {
                Ok(()) => progress.performance = true,
                Err(timeout) => report.unbooked.push(timeout),
            }
        }

        let rollback = if progress.governance {
            Ok(None)
        } else {
            self.governance
                .record_performance(outcome.pnl_pct.to_f64().unwrap_or(0.0))
        };
        progress.governance = rollback.is_ok();
        closes.insert(uid.clone(), progress);
        drop(closes);
        report.rollback = rollback?;

        info!(
            %uid,
            symbol = %outcome.symbol,
            pnl_pct = %outcome.pnl_pct,
            released = ?report.released_risk_pct,
            claim_released = report.claim_released,
            unbooked = report.unbooked.len(),
            "trade closed"
        );
        Ok(report)
    }

    /// Books a position that is already open (e.g. after a restart) and
    /// claims its slot, bypassing limits.
    ///
    /// # Errors
    /// Returns [`EngineError::Blocked`] for an invalid signal, an unknown
    /// instrument, or a lock timeout.
    pub fn restore_open_position(
        &self,
        signal: Signal,
        risk_pct: Decimal,
    ) -> Result<CommitOutcome, EngineError> {
        let signal = signal.validate().map_err(RejectReason::from)?;
        let key = ConflictKey::of(signal.signal());
        let request = ExposureRequest {
            decision_uid: signal.uid().clone(),
            symbol: signal.symbol().to_string(),
            strategy_id: signal.strategy_id().to_string(),
            direction: signal.direction(),
            risk_pct,
        };

        let mut held = self
            .lock_order()
            .arbiter()?
            .exposure(&request.symbol)
            .map_err(|stalled| stalled.reason)?;
        let outcome = held.restore(&request)?;
        if outcome == CommitOutcome::Committed {
            held.above().claim(Claim {
                key,
                holder: request.decision_uid.clone(),
                strategy_id: request.strategy_id.clone(),
                claimed_at: self.clock.now(),
            });
        }
        Ok(outcome)
    }

    /// Replaces the correlation snapshot used by the exposure tracker.
    ///
    /// # Errors
    /// Returns [`EngineError::Blocked`] on a lock timeout.
    pub fn apply_correlations(&self, snapshot: Arc<CorrelationSnapshot>) -> Result<(), EngineError> {
        Ok(self.exposure.update_correlations(snapshot)?)
    }

    /// Forwards every snapshot published on `rx` into the tracker until the
    /// sending side is dropped.
    pub fn spawn_correlation_listener(self: &Arc<Self>, mut rx: SnapshotReceiver) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let latest = rx.borrow_and_update().clone();
                if let Some(snapshot) = latest {
                    if let Err(e) = engine.apply_correlations(snapshot) {
                        warn!(error = %e, "correlation snapshot not applied");
                    }
                }
                if rx.changed().await.is_err() {
                    debug!("correlation channel closed");
                    break;
                }
            }
        })
    }

    /// Point-in-time view for monitoring.
    ///
    /// # Errors
    /// Returns a lock timeout from one of the published views.
    pub fn snapshot(&self) -> Result<EngineSnapshot, EngineError> {
        Ok(EngineSnapshot {
            version: self.version.clone(),
            taken_at: self.clock.now(),
            equity: self.equity(),
            exposure: self.exposure.snapshot()?,
            breaker: self.breaker.snapshot()?,
            ledger_len: self.ledger.len()?,
            open_claims: self.arbiter.claims()?.len(),
        })
    }

    fn lock_order(&self) -> LockOrder<'_> {
        LockOrder::new(&self.ledger, &self.arbiter, &self.exposure)
    }

    /// Everything that happens before the ordered locks.
    fn prepare(
        &self,
        index: usize,
        signal: Signal,
        uid: DecisionUid,
        params: Option<&TunableParameters>,
    ) -> Prepared {
        let arrival = self.arrivals.fetch_add(1, Ordering::Relaxed);

        if let Ok(Some(entry)) = self.ledger.get(&uid) {
            return Prepared::Done(Evaluation::from_entry(&entry, true));
        }
        let reject = |reason: RejectReason| {
            Prepared::Done(self.finish(draft_for(
                &signal,
                uid.clone(),
                None,
                RiskDecision::rejected(reason),
            )))
        };

        let Some(params) = params else {
            return reject(RejectReason::LockTimeout {
                lock: LockName::Parameters,
            });
        };
        let validated = match signal.clone().validate() {
            Ok(validated) => validated,
            Err(detail) => return reject(RejectReason::SignalInvalid { detail }),
        };
        if params.is_disabled(validated.strategy_id()) {
            return reject(RejectReason::StrategyDisabled {
                strategy_id: validated.strategy_id().to_string(),
            });
        }
        if self.exposure.instrument(validated.symbol()).is_none() {
            return reject(RejectReason::UnknownInstrument {
                symbol: validated.symbol().to_string(),
            });
        }

        let performance = self.performance.performance(validated.strategy_id());
        let ctx = MarketContext::from_source(self.features.as_ref(), validated.symbol())
            .with_strategy_performance(performance);
        let breakdown = params.scorer.score(validated.signal(), &ctx);
        let weight = params.arbitration.strategy_weight(validated.strategy_id());
        debug!(
            %uid,
            quality = breakdown.total,
            weight,
            regime_mismatch = breakdown.regime_mismatch,
            "signal scored"
        );

        Prepared::Scored(Candidate {
            uid,
            weighted_quality: breakdown.total * weight,
            performance,
            arrival,
            item: Scored {
                index,
                signal: validated,
                quality: breakdown.total,
                reference_stop: ctx.features.reference_stop_distance,
            },
        })
    }

    /// Ranks one closed round: losers are recorded as conflict losses, the
    /// winner goes through sizing and the ordered locks.
    fn resolve(
        &self,
        key: &ConflictKey,
        candidates: Vec<Candidate<Scored>>,
        tie_epsilon: f64,
    ) -> HashMap<DecisionUid, Evaluation> {
        let mut decided = HashMap::with_capacity(candidates.len());
        let Some((winner, losers)) = select_winner(candidates, tie_epsilon) else {
            return decided;
        };
        for loser in losers {
            debug!(
                %key,
                loser = %loser.uid,
                winner = %winner.uid,
                "conflict lost"
            );
            let decision = RiskDecision::rejected(RejectReason::ConflictLost {
                winner: winner.uid.clone(),
            });
            decided.insert(loser.uid, self.finish(loser.item.draft(decision)));
        }
        decided.insert(winner.uid, self.decide(winner.item, key.clone()));
        decided
    }

    /// Sizes the arbitration winner and runs the ordered critical section.
    fn decide(&self, scored: Scored, key: ConflictKey) -> Evaluation {
        let uid = scored.signal.uid().clone();
        let Some(instrument) = self.exposure.instrument(scored.signal.symbol()) else {
            return self.finish(scored.draft(RiskDecision::rejected(
                RejectReason::UnknownInstrument {
                    symbol: scored.signal.symbol().to_string(),
                },
            )));
        };
        let sized = match self.sizer.size(
            scored.quality,
            instrument,
            scored.signal.stop_distance(),
            scored.reference_stop,
            self.equity(),
        ) {
            Ok(sized) => sized,
            Err(reason) => return self.finish(scored.draft(RiskDecision::rejected(reason))),
        };
        if let Err(reason) = self.breaker.check() {
            return self.finish(scored.draft(RiskDecision::rejected(reason)));
        }

        let request = ExposureRequest {
            decision_uid: uid.clone(),
            symbol: scored.signal.symbol().to_string(),
            strategy_id: scored.signal.strategy_id().to_string(),
            direction: scored.signal.direction(),
            risk_pct: sized.risk_pct,
        };
        let now = self.clock.now();

        let mut ledger = match self.lock_order().ledger() {
            Ok(held) => held,
            Err(reason) => {
                let draft = scored.draft(RiskDecision::rejected(reason.clone()));
                let evaluation = Evaluation::unrecorded(draft, reason);
                self.announce_unrecorded(&evaluation, now);
                return evaluation;
            }
        };
        if let Some(existing) = ledger.existing(&uid) {
            return Evaluation::from_entry(&existing, true);
        }

        let decision = match ledger.arbiter() {
            Err(stalled) => {
                ledger = stalled.held;
                RiskDecision::rejected(stalled.reason)
            }
            Ok(arbiter) => {
                if let Some(holder) = arbiter.holder(&key) {
                    ledger = arbiter.into_above();
                    RiskDecision::rejected(RejectReason::SlotOccupied { holder })
                } else {
                    match arbiter.exposure(&request.symbol) {
                        Err(stalled) => {
                            ledger = stalled.held.into_above();
                            RiskDecision::rejected(stalled.reason)
                        }
                        Ok(mut exposure) => {
                            let decision = match exposure.commit(&request) {
                                Ok(_) => {
                                    exposure.above().claim(Claim {
                                        key,
                                        holder: uid.clone(),
                                        strategy_id: request.strategy_id.clone(),
                                        claimed_at: now,
                                    });
                                    RiskDecision::Approved {
                                        risk_pct: sized.risk_pct,
                                        position_size: sized.position_size,
                                    }
                                }
                                Err(reason) => RiskDecision::rejected(reason),
                            };
                            ledger = exposure.into_above().into_above();
                            decision
                        }
                    }
                }
            }
        };

        let (entry, fresh) = ledger.record(scored.draft(decision), now);
        drop(ledger);
        if fresh {
            self.announce(&entry);
        }
        Evaluation::from_entry(&entry, !fresh)
    }

    /// Records a decision reached without the lower locks.
    fn finish(&self, draft: LedgerDraft) -> Evaluation {
        let now = self.clock.now();
        let mut ledger = match self.lock_order().ledger() {
            Ok(held) => held,
            Err(reason) => {
                let evaluation = Evaluation::unrecorded(draft, reason);
                self.announce_unrecorded(&evaluation, now);
                return evaluation;
            }
        };
        let (entry, fresh) = ledger.record(draft, now);
        drop(ledger);
        if fresh {
            self.announce(&entry);
        }
        Evaluation::from_entry(&entry, !fresh)
    }

    fn announce(&self, entry: &LedgerEntry) {
        match &entry.decision {
            RiskDecision::Approved {
                risk_pct,
                position_size,
            } => {
                info!(
                    uid = %entry.decision_uid,
                    symbol = %entry.symbol,
                    direction = %entry.direction,
                    strategy = %entry.strategy_id,
                    %risk_pct,
                    %position_size,
                    "decision approved"
                );
                // No subscribers is not an error.
                let _ = self.approved_tx.send(ApprovedDecision {
                    decision_uid: entry.decision_uid.clone(),
                    symbol: entry.symbol.clone(),
                    direction: entry.direction,
                    strategy_id: entry.strategy_id.clone(),
                    position_size: *position_size,
                    risk_pct: *risk_pct,
                    approved_at: entry.recorded_at,
                });
            }
            RiskDecision::Rejected { reason } => {
                info!(
                    uid = %entry.decision_uid,
                    symbol = %entry.symbol,
                    strategy = %entry.strategy_id,
                    code = reason.code(),
                    %reason,
                    "decision rejected"
                );
                let _ = self.rejected_tx.send(RejectedDecision {
                    decision_uid: entry.decision_uid.clone(),
                    symbol: entry.symbol.clone(),
                    strategy_id: entry.strategy_id.clone(),
                    reason: reason.clone(),
                    rejected_at: entry.recorded_at,
                });
            }
        }
    }

    fn announce_unrecorded(&self, evaluation: &Evaluation, at: DateTime<Utc>) {
        if let RiskDecision::Rejected { reason } = &evaluation.decision {
            error!(uid = %evaluation.decision_uid, %reason, "decision could not be recorded");
            let _ = self.rejected_tx.send(RejectedDecision {
                decision_uid: evaluation.decision_uid.clone(),
                symbol: evaluation.symbol.clone(),
                strategy_id: evaluation.strategy_id.clone(),
                reason: reason.clone(),
                rejected_at: at,
            });
        }
    }
}
