//! Decision ledger.
//!
//! Append-only, keyed by decision uid. The writer side is the first lock in
//! the engine's lock order and is only reachable through [`LockOrder`].
//! Readers go through a separately published view and never contend with
//! the ordered locks for longer than a copy.
//!
//! [`LockOrder`]: crate::locks::LockOrder

use chrono::{DateTime, Utc};
use decision_core::{DecisionUid, Direction, LockName, LockTimeout, RejectReason, RiskDecision};
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// One immutable ledger record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Strictly increasing, starting at 1
    pub seq: u64,
    pub decision_uid: DecisionUid,
    pub symbol: String,
    pub direction: Direction,
    pub strategy_id: String,
    pub signal_timestamp: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
    /// Quality total, if the signal got as far as scoring
    pub quality: Option<f64>,
    pub decision: RiskDecision,
}

/// Everything about an entry except what the ledger assigns.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerDraft {
    pub decision_uid: DecisionUid,
    pub symbol: String,
    pub direction: Direction,
    pub strategy_id: String,
    pub signal_timestamp: DateTime<Utc>,
    pub quality: Option<f64>,
    pub decision: RiskDecision,
}

#[derive(Debug)]
pub(crate) struct LedgerBook {
    by_uid: HashMap<DecisionUid, Arc<LedgerEntry>>,
    next_seq: u64,
    /// Recorded but not yet visible to readers
    unpublished: Vec<Arc<LedgerEntry>>,
}

impl Default for LedgerBook {
    fn default() -> Self {
        Self {
            by_uid: HashMap::new(),
            next_seq: 1,
            unpublished: Vec::new(),
        }
    }
}

impl LedgerBook {
    pub(crate) fn get(&self, uid: &DecisionUid) -> Option<Arc<LedgerEntry>> {
        self.by_uid.get(uid).cloned()
    }
}

#[derive(Debug, Default)]
struct LedgerView {
    entries: Vec<Arc<LedgerEntry>>,
    index: HashMap<DecisionUid, usize>,
}

#[derive(Debug)]
pub struct DecisionLedger {
    book: Mutex<LedgerBook>,
    view: RwLock<LedgerView>,
    lock_timeout: Duration,
}

impl DecisionLedger {
    #[must_use]
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            book: Mutex::new(LedgerBook::default()),
            view: RwLock::new(LedgerView::default()),
            lock_timeout,
        }
    }

    /// Published entry for `uid`.
    ///
    /// # Errors
    /// Returns [`LockTimeout`] if the view is being republished for longer
    /// than the lock timeout.
    pub fn get(&self, uid: &DecisionUid) -> Result<Option<Arc<LedgerEntry>>, LockTimeout> {
        let view = self.read_view()?;
        Ok(view.index.get(uid).map(|&i| Arc::clone(&view.entries[i])))
    }

    /// Full published history in sequence order.
    ///
    /// # Errors
    /// Returns [`LockTimeout`] if the view cannot be read in time.
    pub fn history(&self) -> Result<Vec<Arc<LedgerEntry>>, LockTimeout> {
        Ok(self.read_view()?.entries.clone())
    }

    /// # Errors
    /// Returns [`LockTimeout`] if the view cannot be read in time.
    pub fn len(&self) -> Result<usize, LockTimeout> {
        Ok(self.read_view()?.entries.len())
    }

    /// # Errors
    /// Returns [`LockTimeout`] if the view cannot be read in time.
    pub fn is_empty(&self) -> Result<bool, LockTimeout> {
        Ok(self.len()? == 0)
    }

    pub(crate) fn lock_book(&self) -> Result<MutexGuard<'_, LedgerBook>, RejectReason> {
        self.book.try_lock_for(self.lock_timeout).ok_or_else(|| {
            error!(
                lock = %LockName::Ledger,
                timeout_ms = self.lock_timeout.as_millis() as u64,
                "ledger lock timed out"
            );
            RejectReason::LockTimeout {
                lock: LockName::Ledger,
            }
        })
    }

    /// Records `draft` unless its uid is already present. Returns the entry
    /// for the uid and whether it was written by this call.
    pub(crate) fn record_locked(
        &self,
        book: &mut LedgerBook,
        draft: LedgerDraft,
        recorded_at: DateTime<Utc>,
    ) -> (Arc<LedgerEntry>, bool) {
        if let Some(existing) = book.get(&draft.decision_uid) {
            return (existing, false);
        }

        let entry = Arc::new(LedgerEntry {
            seq: book.next_seq,
            decision_uid: draft.decision_uid,
            symbol: draft.symbol,
            direction: draft.direction,
            strategy_id: draft.strategy_id,
            signal_timestamp: draft.signal_timestamp,
            recorded_at,
            quality: draft.quality,
            decision: draft.decision,
        });
        book.next_seq += 1;
        book.by_uid
            .insert(entry.decision_uid.clone(), Arc::clone(&entry));
        book.unpublished.push(Arc::clone(&entry));
        debug!(seq = entry.seq, uid = %entry.decision_uid, "ledger entry recorded");

        self.publish(book);
        (entry, true)
    }

    /// Moves pending entries into the read view. If readers hold the view
    /// past the timeout the entries stay queued until the next write or read.
    fn publish(&self, book: &mut LedgerBook) {
        let Some(mut view) = self.view.try_write_for(self.lock_timeout) else {
            warn!(pending = book.unpublished.len(), "ledger view busy; entries queued");
            return;
        };
        view.append(book);
    }

    /// Publishes entries left queued by a busy view. Never waits: a held
    /// book means a writer is about to publish anyway.
    fn catch_up(&self) {
        let Some(mut book) = self.book.try_lock() else {
            return;
        };
        if book.unpublished.is_empty() {
            return;
        }
        if let Some(mut view) = self.view.try_write() {
            debug!(pending = book.unpublished.len(), "publishing queued ledger entries");
            view.append(&mut book);
        }
    }

    fn read_view(&self) -> Result<parking_lot::RwLockReadGuard<'_, LedgerView>, LockTimeout> {
        self.catch_up();
        self.view
            .try_read_for(self.lock_timeout)
            .ok_or(LockTimeout::new(LockName::Ledger, self.lock_timeout))
    }
}

impl LedgerView {
    fn append(&mut self, book: &mut LedgerBook) {
        for entry in book.unpublished.drain(..) {
            let position = self.entries.len();
            self.index.insert(entry.decision_uid.clone(), position);
            self.entries.push(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn draft(symbol: &str, decision: RiskDecision) -> LedgerDraft {
        let ts = Utc::now();
        LedgerDraft {
            decision_uid: DecisionUid::derive("momentum", symbol, ts),
            symbol: symbol.to_string(),
            direction: Direction::Long,
            strategy_id: "momentum".to_string(),
            signal_timestamp: ts,
            quality: Some(0.8),
            decision,
        }
    }

    fn approved() -> RiskDecision {
        RiskDecision::Approved {
            risk_pct: dec!(0.8),
            position_size: dec!(1.6),
        }
    }

    #[test]
    fn second_write_returns_first_entry() {
        let ledger = DecisionLedger::new(Duration::from_millis(50));
        let first = draft("EURUSD", approved());
        let mut retry = first.clone();
        retry.decision = RiskDecision::rejected(RejectReason::Withdrawn);

        let mut book = ledger.lock_book().unwrap();
        let (entry, fresh) = ledger.record_locked(&mut book, first, Utc::now());
        assert!(fresh);
        let (again, fresh) = ledger.record_locked(&mut book, retry, Utc::now());
        assert!(!fresh);
        assert_eq!(again, entry);
        assert!(again.decision.is_approved());
        drop(book);

        assert_eq!(ledger.len().unwrap(), 1);
        assert_eq!(ledger.get(&entry.decision_uid).unwrap(), Some(entry));
    }

    #[test]
    fn sequence_numbers_increase() {
        let ledger = DecisionLedger::new(Duration::from_millis(50));
        let mut book = ledger.lock_book().unwrap();
        for symbol in ["EURUSD", "GBPUSD", "USDJPY"] {
            ledger.record_locked(&mut book, draft(symbol, approved()), Utc::now());
        }
        drop(book);
        let seqs: Vec<u64> = ledger.history().unwrap().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn busy_view_queues_until_next_write() {
        let ledger = DecisionLedger::new(Duration::from_millis(20));
        let mut book = ledger.lock_book().unwrap();
        {
            let _reader = ledger.view.read();
            ledger.record_locked(&mut book, draft("EURUSD", approved()), Utc::now());
        }
        assert_eq!(ledger.len().unwrap(), 0);
        ledger.record_locked(&mut book, draft("GBPUSD", approved()), Utc::now());
        drop(book);
        assert_eq!(ledger.len().unwrap(), 2);
    }

    #[test]
    fn queued_entry_is_published_on_next_read() {
        let ledger = DecisionLedger::new(Duration::from_millis(20));
        let entry = {
            let mut book = ledger.lock_book().unwrap();
            let _reader = ledger.view.read();
            let (entry, fresh) =
                ledger.record_locked(&mut book, draft("EURUSD", approved()), Utc::now());
            assert!(fresh);
            entry
        };

        // No further write follows; the read itself publishes the entry.
        assert_eq!(ledger.get(&entry.decision_uid).unwrap(), Some(Arc::clone(&entry)));
        assert_eq!(ledger.len().unwrap(), 1);
        assert_eq!(ledger.history().unwrap()[0].seq, 1);
    }

    #[test]
    fn held_writer_times_out() {
        let ledger = DecisionLedger::new(Duration::from_millis(10));
        let _held = ledger.lock_book().unwrap();
        let err = ledger.lock_book().unwrap_err();
        assert_eq!(
            err,
            RejectReason::LockTimeout {
                lock: LockName::Ledger
            }
        );
    }
}
