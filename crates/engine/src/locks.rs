//! Ordered access to the ledger, arbiter, and exposure partitions.
//!
//! The order is Ledger -> Arbiter -> Exposure. Each guard type only offers
//! the next lock down, so a thread can start the chain at any level but can
//! never acquire a lock above one it already holds.
//!
//! Outside the chain, the engine's close book is only taken before the
//! chain is entered, and the arbitration round book is never held while
//! any other lock is taken.

use decision_core::RejectReason;
use parking_lot::MutexGuard;

use crate::arbiter::{ArbiterBook, Claim, ConflictArbiter, ConflictKey};
use crate::exposure::{CommitOutcome, ExposureRequest, ExposureTracker, SymbolBook};
use crate::ledger::{DecisionLedger, LedgerBook, LedgerDraft, LedgerEntry};
use chrono::{DateTime, Utc};
use decision_core::DecisionUid;
use rust_decimal::Decimal;
use std::sync::Arc;

/// A lower acquisition failed; the locks already held are handed back so
/// the caller can still record the outcome.
#[derive(Debug)]
pub(crate) struct Stalled<H> {
    pub held: H,
    pub reason: RejectReason,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct LockOrder<'a> {
    ledger: &'a DecisionLedger,
    arbiter: &'a ConflictArbiter,
    exposure: &'a ExposureTracker,
}

impl<'a> LockOrder<'a> {
    pub(crate) fn new(
        ledger: &'a DecisionLedger,
        arbiter: &'a ConflictArbiter,
        exposure: &'a ExposureTracker,
    ) -> Self {
        Self {
            ledger,
            arbiter,
            exposure,
        }
    }

    pub(crate) fn ledger(self) -> Result<LedgerHeld<'a>, RejectReason> {
        Ok(LedgerHeld {
            book: self.ledger.lock_book()?,
            order: self,
        })
    }

    pub(crate) fn arbiter(self) -> Result<ArbiterHeld<'a, ()>, RejectReason> {
        Ok(ArbiterHeld {
            book: self.arbiter.lock_book()?,
            order: self,
            above: (),
        })
    }
}

pub(crate) struct LedgerHeld<'a> {
    order: LockOrder<'a>,
    book: MutexGuard<'a, LedgerBook>,
}

impl<'a> LedgerHeld<'a> {
    pub(crate) fn existing(&self, uid: &DecisionUid) -> Option<Arc<LedgerEntry>> {
        self.book.get(uid)
    }

    pub(crate) fn record(
        &mut self,
        draft: LedgerDraft,
        recorded_at: DateTime<Utc>,
    ) -> (Arc<LedgerEntry>, bool) {
        self.order
            .ledger
            .record_locked(&mut self.book, draft, recorded_at)
    }

    pub(crate) fn arbiter(self) -> Result<ArbiterHeld<'a, Self>, Stalled<Self>> {
        match self.order.arbiter.lock_book() {
            Ok(book) => Ok(ArbiterHeld {
                order: self.order,
                book,
                above: self,
            }),
            Err(reason) => Err(Stalled { held: self, reason }),
        }
    }
}

/// Arbiter lock, plus whatever was held above it.
pub(crate) struct ArbiterHeld<'a, A> {
    order: LockOrder<'a>,
    book: MutexGuard<'a, ArbiterBook>,
    above: A,
}

impl<'a, A> ArbiterHeld<'a, A> {
    pub(crate) fn holder(&self, key: &ConflictKey) -> Option<DecisionUid> {
        self.book.holder(key).cloned()
    }

    pub(crate) fn claim(&mut self, claim: Claim) {
        self.book.claim(claim);
        self.order.arbiter.publish(&self.book);
    }

    pub(crate) fn release(&mut self, uid: &DecisionUid) -> Option<Claim> {
        let released = self.book.release(uid);
        if released.is_some() {
            self.order.arbiter.publish(&self.book);
        }
        released
    }

    /// Drops the arbiter lock, keeping the locks above it.
    pub(crate) fn into_above(self) -> A {
        self.above
    }

    pub(crate) fn exposure(self, symbol: &str) -> Result<ExposureHeld<'a, Self>, Stalled<Self>> {
        match self.order.exposure.partition(symbol) {
            Ok(book) => Ok(ExposureHeld {
                tracker: self.order.exposure,
                symbol: symbol.to_string(),
                book,
                above: self,
            }),
            Err(reason) => Err(Stalled { held: self, reason }),
        }
    }
}

/// One symbol's exposure partition, plus whatever was held above it.
pub(crate) struct ExposureHeld<'a, A> {
    tracker: &'a ExposureTracker,
    symbol: String,
    book: MutexGuard<'a, SymbolBook>,
    above: A,
}

impl<'a, A> ExposureHeld<'a, A> {
    pub(crate) fn commit(&mut self, request: &ExposureRequest) -> Result<CommitOutcome, RejectReason> {
        self.tracker.commit_locked(&mut self.book, request)
    }

    pub(crate) fn restore(&mut self, request: &ExposureRequest) -> Result<CommitOutcome, RejectReason> {
        self.tracker.restore_locked(&mut self.book, request)
    }

    pub(crate) fn release_decision(&mut self, uid: &DecisionUid) -> Result<Option<Decimal>, RejectReason> {
        self.tracker.release_locked(&mut self.book, &self.symbol, uid)
    }

    pub(crate) fn above(&mut self) -> &mut A {
        &mut self.above
    }

    /// Drops the partition lock, keeping the locks above it.
    pub(crate) fn into_above(self) -> A {
        self.above
    }
}
