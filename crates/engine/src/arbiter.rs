//! Conflict resolution between signals competing for the same slot.
//!
//! Signals for one [`ConflictKey`] that arrive within the arbitration
//! window, from any producer, are staged in one round. The caller that
//! opened the round decides it once the window has passed; everyone else
//! waits, bounded, for the outcome of their own uids.

use chrono::{DateTime, Utc};
use decision_core::{DecisionUid, Direction, LockName, LockTimeout, RejectReason, Signal};
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// What two signals must share to conflict.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConflictKey {
    Slot { symbol: String, direction: Direction },
    /// Exclusive resource named by the producer
    Resource { name: String },
}

impl ConflictKey {
    #[must_use]
    pub fn of(signal: &Signal) -> Self {
        match &signal.tags.resource {
            Some(name) => Self::Resource { name: name.clone() },
            None => Self::Slot {
                symbol: signal.symbol.clone(),
                direction: signal.direction,
            },
        }
    }
}

impl fmt::Display for ConflictKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Slot { symbol, direction } => write!(f, "{symbol}/{direction}"),
            Self::Resource { name } => write!(f, "resource:{name}"),
        }
    }
}

/// A slot held by an approved, still-open decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub key: ConflictKey,
    pub holder: DecisionUid,
    pub strategy_id: String,
    pub claimed_at: DateTime<Utc>,
}

/// A scored signal competing within one conflict group.
#[derive(Debug, Clone)]
pub struct Candidate<T> {
    pub item: T,
    pub uid: DecisionUid,
    /// Quality total multiplied by the strategy's arbitration weight
    pub weighted_quality: f64,
    /// Smoothed historical win rate; `None` ranks below any value
    pub performance: Option<f64>,
    /// Lower arrived first
    pub arrival: u64,
}

impl<T> Candidate<T> {
    /// Ranking: weighted quality (within `tie_epsilon` counts as equal),
    /// then historical performance, then arrival.
    #[must_use]
    pub fn outranks(&self, other: &Self, tie_epsilon: f64) -> bool {
        let diff = self.weighted_quality - other.weighted_quality;
        if diff.abs() > tie_epsilon {
            return diff > 0.0;
        }
        match (self.performance, other.performance) {
            (Some(a), Some(b)) if (a - b).abs() > f64::EPSILON => return a > b,
            (Some(_), None) => return true,
            (None, Some(_)) => return false,
            _ => {}
        }
        self.arrival < other.arrival
    }
}

/// Picks the winner of one group. Returns `None` for an empty group.
///
/// A single pass rather than a sort: equality within an epsilon is not
/// transitive, and a linear scan keeps the result deterministic for any
/// input order with distinct arrivals.
#[must_use]
pub fn select_winner<T>(
    mut candidates: Vec<Candidate<T>>,
    tie_epsilon: f64,
) -> Option<(Candidate<T>, Vec<Candidate<T>>)> {
    candidates.sort_by_key(|c| c.arrival);
    let mut best = 0;
    for (i, candidate) in candidates.iter().enumerate().skip(1) {
        if candidate.outranks(&candidates[best], tie_epsilon) {
            best = i;
        }
    }
    if candidates.is_empty() {
        return None;
    }
    let winner = candidates.remove(best);
    Some((winner, candidates))
}

#[derive(Debug, Default)]
pub(crate) struct ArbiterBook {
    claims: HashMap<ConflictKey, Claim>,
    keys_by_uid: HashMap<DecisionUid, ConflictKey>,
}

impl ArbiterBook {
    pub(crate) fn holder(&self, key: &ConflictKey) -> Option<&DecisionUid> {
        self.claims.get(key).map(|c| &c.holder)
    }

    pub(crate) fn claim(&mut self, claim: Claim) {
        self.keys_by_uid
            .insert(claim.holder.clone(), claim.key.clone());
        self.claims.insert(claim.key.clone(), claim);
    }

    pub(crate) fn release(&mut self, uid: &DecisionUid) -> Option<Claim> {
        let key = self.keys_by_uid.remove(uid)?;
        self.claims.remove(&key)
    }

    fn open_claims(&self) -> Vec<Claim> {
        let mut claims: Vec<Claim> = self.claims.values().cloned().collect();
        claims.sort_by(|a, b| a.claimed_at.cmp(&b.claimed_at).then_with(|| a.holder.cmp(&b.holder)));
        claims
    }
}

/// Holds slot claims. The book is the second lock in the engine's order.
#[derive(Debug)]
pub struct ConflictArbiter {
    book: Mutex<ArbiterBook>,
    view: RwLock<Arc<Vec<Claim>>>,
    lock_timeout: Duration,
}

impl ConflictArbiter {
    #[must_use]
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            book: Mutex::new(ArbiterBook::default()),
            view: RwLock::new(Arc::new(Vec::new())),
            lock_timeout,
        }
    }

    /// Published open claims, oldest first.
    ///
    /// # Errors
    /// Returns [`LockTimeout`] if the view cannot be read in time.
    pub fn claims(&self) -> Result<Arc<Vec<Claim>>, LockTimeout> {
        self.view
            .try_read_for(self.lock_timeout)
            .map(|view| Arc::clone(&view))
            .ok_or(LockTimeout::new(LockName::Arbiter, self.lock_timeout))
    }

    pub(crate) fn lock_book(&self) -> Result<MutexGuard<'_, ArbiterBook>, RejectReason> {
        self.book.try_lock_for(self.lock_timeout).ok_or_else(|| {
            error!(
                lock = %LockName::Arbiter,
                timeout_ms = self.lock_timeout.as_millis() as u64,
                "arbiter lock timed out"
            );
            RejectReason::LockTimeout {
                lock: LockName::Arbiter,
            }
        })
    }

    /// Republishes the claim view after a mutation. Skipped if readers
    /// hold it past the timeout; the next mutation catches up.
    pub(crate) fn publish(&self, book: &ArbiterBook) {
        if let Some(mut view) = self.view.try_write_for(self.lock_timeout) {
            *view = Arc::new(book.open_claims());
        } else {
            debug!("claim view busy; publish skipped");
        }
    }
}

/// A caller's place in an arbitration round.
#[derive(Debug, Clone)]
pub(crate) struct RoundTicket {
    key: ConflictKey,
    id: u64,
    closes_at: Instant,
    /// Uids already staged by another caller
    duplicates: HashSet<DecisionUid>,
}

impl RoundTicket {
    pub(crate) fn key(&self) -> &ConflictKey {
        &self.key
    }

    pub(crate) fn is_duplicate(&self, uid: &DecisionUid) -> bool {
        self.duplicates.contains(uid)
    }
}

#[derive(Debug)]
pub(crate) enum Joined {
    /// Opened the round and must close and decide it
    Leader(RoundTicket),
    /// Staged into a round someone else decides
    Follower(RoundTicket),
}

#[derive(Debug)]
struct Round<T> {
    key: ConflictKey,
    closes_at: Instant,
    candidates: Vec<Candidate<T>>,
}

#[derive(Debug)]
struct RoundBook<T, R> {
    next_id: u64,
    rounds: HashMap<u64, Round<T>>,
    open: HashMap<ConflictKey, u64>,
    settled: HashMap<DecisionUid, (R, Instant)>,
}

impl<T, R> RoundBook<T, R> {
    /// Drops outcomes nobody collected and rounds whose leader gave up.
    fn sweep(&mut self, now: Instant, patience: Duration) {
        self.settled.retain(|_, (_, at)| *at + patience > now);
        let stranded: Vec<u64> = self
            .rounds
            .iter()
            .filter(|(_, round)| round.closes_at + patience <= now)
            .map(|(&id, _)| id)
            .collect();
        for id in stranded {
            if let Some(round) = self.rounds.remove(&id) {
                warn!(key = %round.key, staged = round.candidates.len(), "stranded arbitration round dropped");
                if self.open.get(&round.key) == Some(&id) {
                    self.open.remove(&round.key);
                }
            }
        }
    }
}

/// Stages candidates per conflict key so that signals from different
/// producers are ranked together before any slot is claimed.
///
/// `T` is the staged item and `R` the outcome handed back to followers.
/// The round lock is a leaf: it is never held while taking any other lock.
#[derive(Debug)]
pub struct ArbitrationRounds<T, R> {
    window: Duration,
    /// How long past a round's close followers wait for its outcome
    patience: Duration,
    lock_timeout: Duration,
    book: Mutex<RoundBook<T, R>>,
    settled: Condvar,
}

impl<T, R: Clone> ArbitrationRounds<T, R> {
    #[must_use]
    pub fn new(window: Duration, patience: Duration, lock_timeout: Duration) -> Self {
        Self {
            window,
            patience,
            lock_timeout,
            book: Mutex::new(RoundBook {
                next_id: 0,
                rounds: HashMap::new(),
                open: HashMap::new(),
                settled: HashMap::new(),
            }),
            settled: Condvar::new(),
        }
    }

    /// Stages `candidates` into the open round for `key`, or opens one.
    /// Candidates whose uid is already staged are not staged twice.
    pub(crate) fn join(
        &self,
        key: ConflictKey,
        candidates: Vec<Candidate<T>>,
    ) -> Result<Joined, LockTimeout> {
        let mut guard = self.lock_book()?;
        let book = &mut *guard;
        let now = Instant::now();
        book.sweep(now, self.patience);

        let open = book.open.get(&key).copied().and_then(|id| {
            book.rounds
                .get_mut(&id)
                .filter(|round| round.closes_at > now)
                .map(|round| (id, round))
        });
        if let Some((id, round)) = open {
            let mut duplicates = HashSet::new();
            for candidate in candidates {
                if round.candidates.iter().any(|staged| staged.uid == candidate.uid) {
                    duplicates.insert(candidate.uid);
                } else {
                    round.candidates.push(candidate);
                }
            }
            debug!(%key, round = id, staged = round.candidates.len(), "joined arbitration round");
            return Ok(Joined::Follower(RoundTicket {
                key,
                id,
                closes_at: round.closes_at,
                duplicates,
            }));
        }

        let id = book.next_id;
        book.next_id += 1;
        let closes_at = now + self.window;
        book.rounds.insert(
            id,
            Round {
                key: key.clone(),
                closes_at,
                candidates,
            },
        );
        book.open.insert(key.clone(), id);
        Ok(Joined::Leader(RoundTicket {
            key,
            id,
            closes_at,
            duplicates: HashSet::new(),
        }))
    }

    /// Waits out the window, then takes every candidate staged in the
    /// round. Returns `None` if the round could not be taken in time.
    pub(crate) fn close(&self, ticket: &RoundTicket) -> Option<Vec<Candidate<T>>> {
        let remaining = ticket.closes_at.saturating_duration_since(Instant::now());
        if !remaining.is_zero() {
            std::thread::sleep(remaining);
        }
        let mut book = self.lock_book().ok()?;
        if book.open.get(&ticket.key) == Some(&ticket.id) {
            book.open.remove(&ticket.key);
        }
        let round = book.rounds.remove(&ticket.id)?;
        debug!(key = %round.key, round = ticket.id, staged = round.candidates.len(), "arbitration round closed");
        Some(round.candidates)
    }

    /// Hands decided outcomes to waiting followers.
    pub(crate) fn settle(&self, outcomes: impl IntoIterator<Item = (DecisionUid, R)>) {
        let Ok(mut book) = self.lock_book() else {
            warn!("round book busy; followers fall back on their own");
            return;
        };
        let now = Instant::now();
        for (uid, outcome) in outcomes {
            book.settled.insert(uid, (outcome, now));
        }
        drop(book);
        self.settled.notify_all();
    }

    /// Outcome for `uid` once the round's leader has settled it. `None`
    /// after waiting `patience` past the round's close.
    pub(crate) fn wait(&self, ticket: &RoundTicket, uid: &DecisionUid) -> Option<R> {
        let deadline = ticket.closes_at + self.patience;
        let mut book = self.lock_book().ok()?;
        loop {
            if let Some((outcome, _)) = book.settled.get(uid) {
                return Some(outcome.clone());
            }
            if self.settled.wait_until(&mut book, deadline).timed_out() {
                return book.settled.get(uid).map(|(outcome, _)| outcome.clone());
            }
        }
    }

    fn lock_book(&self) -> Result<MutexGuard<'_, RoundBook<T, R>>, LockTimeout> {
        self.book.try_lock_for(self.lock_timeout).ok_or_else(|| {
            error!(
                lock = %LockName::Arbiter,
                timeout_ms = self.lock_timeout.as_millis() as u64,
                "arbitration round lock timed out"
            );
            LockTimeout::new(LockName::Arbiter, self.lock_timeout)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &'static str, q: f64, perf: Option<f64>, arrival: u64) -> Candidate<&'static str> {
        Candidate {
            item: name,
            uid: DecisionUid::derive(name, "EURUSD", Utc::now()),
            weighted_quality: q,
            performance: perf,
            arrival,
        }
    }

    fn winner(candidates: Vec<Candidate<&'static str>>) -> &'static str {
        select_winner(candidates, 1e-9).unwrap().0.item
    }

    #[test]
    fn higher_quality_wins() {
        assert_eq!(
            winner(vec![candidate("a", 0.7, None, 0), candidate("b", 0.82, None, 1)]),
            "b"
        );
    }

    #[test]
    fn tie_breaks_on_performance_then_arrival() {
        assert_eq!(
            winner(vec![
                candidate("a", 0.8, Some(0.55), 0),
                candidate("b", 0.8, Some(0.61), 1),
            ]),
            "b"
        );
        assert_eq!(
            winner(vec![candidate("a", 0.8, None, 0), candidate("b", 0.8, Some(0.4), 1)]),
            "b"
        );
        assert_eq!(
            winner(vec![candidate("b", 0.8, None, 3), candidate("a", 0.8, None, 2)]),
            "a"
        );
    }

    #[test]
    fn result_does_not_depend_on_input_order() {
        let make = || {
            vec![
                candidate("a", 0.80, Some(0.5), 0),
                candidate("b", 0.90, Some(0.3), 1),
                candidate("c", 0.90, Some(0.6), 2),
            ]
        };
        let mut reversed = make();
        reversed.reverse();
        assert_eq!(winner(make()), "c");
        assert_eq!(winner(reversed), "c");
    }

    #[test]
    fn losers_are_returned() {
        let (won, lost) = select_winner(
            vec![candidate("a", 0.6, None, 0), candidate("b", 0.9, None, 1)],
            1e-9,
        )
        .unwrap();
        assert_eq!(won.item, "b");
        assert_eq!(lost.len(), 1);
        assert!(select_winner(Vec::<Candidate<()>>::new(), 1e-9).is_none());
    }

    #[test]
    fn claims_are_released_by_uid() {
        let arbiter = ConflictArbiter::new(Duration::from_millis(50));
        let uid = DecisionUid::derive("momentum", "EURUSD", Utc::now());
        let key = ConflictKey::Slot {
            symbol: "EURUSD".to_string(),
            direction: Direction::Long,
        };
        {
            let mut book = arbiter.lock_book().unwrap();
            book.claim(Claim {
                key: key.clone(),
                holder: uid.clone(),
                strategy_id: "momentum".to_string(),
                claimed_at: Utc::now(),
            });
            arbiter.publish(&book);
            assert_eq!(book.holder(&key), Some(&uid));
        }
        assert_eq!(arbiter.claims().unwrap().len(), 1);

        let mut book = arbiter.lock_book().unwrap();
        assert!(book.release(&uid).is_some());
        assert!(book.holder(&key).is_none());
        assert!(book.release(&uid).is_none());
    }

    #[test]
    fn resource_tag_overrides_slot() {
        let mut signal: Signal = serde_json::from_value(serde_json::json!({
            "symbol": "EURUSD",
            "direction": "long",
            "entry": "1.1000",
            "stop": "1.0960",
            "strategy_id": "momentum",
            "timestamp": "2026-03-02T09:00:00Z"
        }))
        .unwrap();
        assert_eq!(ConflictKey::of(&signal).to_string(), "EURUSD/long");
        signal.tags.resource = Some("eur-book".to_string());
        assert_eq!(ConflictKey::of(&signal).to_string(), "resource:eur-book");
    }

    fn eurusd_long() -> ConflictKey {
        ConflictKey::Slot {
            symbol: "EURUSD".to_string(),
            direction: Direction::Long,
        }
    }

    #[test]
    fn round_gathers_candidates_from_separate_callers() {
        let rounds: ArbitrationRounds<&'static str, &'static str> = ArbitrationRounds::new(
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(50),
        );
        let low = candidate("low", 0.65, None, 0);
        let high = candidate("high", 0.95, None, 1);
        let high_uid = high.uid.clone();

        let Joined::Leader(leader) = rounds.join(eurusd_long(), vec![low]).unwrap() else {
            panic!("first caller should open the round");
        };
        let Joined::Follower(follower) = rounds.join(eurusd_long(), vec![high.clone()]).unwrap() else {
            panic!("second caller should join the open round");
        };
        assert!(!follower.is_duplicate(&high_uid));
        let Joined::Follower(retry) = rounds.join(eurusd_long(), vec![high]).unwrap() else {
            panic!("third caller should join the open round");
        };
        assert!(retry.is_duplicate(&high_uid));

        let staged = rounds.close(&leader).unwrap();
        assert_eq!(staged.len(), 2);
        let (won, _) = select_winner(staged, 1e-9).unwrap();
        assert_eq!(won.item, "high");

        rounds.settle([(won.uid.clone(), "approved")]);
        assert_eq!(rounds.wait(&follower, &high_uid), Some("approved"));
        assert_eq!(rounds.wait(&retry, &high_uid), Some("approved"));
    }

    #[test]
    fn closed_round_is_not_joined() {
        let rounds: ArbitrationRounds<&'static str, ()> =
            ArbitrationRounds::new(Duration::ZERO, Duration::from_millis(20), Duration::from_millis(50));
        let first = rounds.join(eurusd_long(), vec![candidate("a", 0.7, None, 0)]).unwrap();
        let second = rounds.join(eurusd_long(), vec![candidate("b", 0.9, None, 1)]).unwrap();
        assert!(matches!(first, Joined::Leader(_)));
        assert!(matches!(second, Joined::Leader(_)));
    }

    #[test]
    fn unsettled_follower_gives_up_after_patience() {
        let rounds: ArbitrationRounds<&'static str, ()> = ArbitrationRounds::new(
            Duration::from_millis(10),
            Duration::from_millis(30),
            Duration::from_millis(50),
        );
        let b = candidate("b", 0.9, None, 1);
        let uid = b.uid.clone();
        rounds.join(eurusd_long(), vec![candidate("a", 0.7, None, 0)]).unwrap();
        let Joined::Follower(ticket) = rounds.join(eurusd_long(), vec![b]).unwrap() else {
            panic!("expected to join");
        };
        let started = Instant::now();
        assert_eq!(rounds.wait(&ticket, &uid), None);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
