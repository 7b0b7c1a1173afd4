//! Risk and arbitration core.
//!
//! [`DecisionEngine`] is shared by every producer (`Send + Sync`, wrapped in
//! an `Arc`) and turns candidate signals into exactly one recorded
//! [`RiskDecision`](decision_core::RiskDecision) each.

pub mod arbiter;
pub mod engine;
pub mod exposure;
pub mod ledger;
mod locks;
pub mod performance;

pub use arbiter::{select_winner, Candidate, Claim, ConflictArbiter, ConflictKey};
pub use engine::{
    CloseReport, DecisionEngine, EngineError, EngineSnapshot, Evaluation, EVENT_CHANNEL_CAPACITY,
};
pub use exposure::{
    CommitOutcome, Commitment, ExposureRequest, ExposureSnapshot, ExposureTracker, SideRisk,
};
pub use ledger::{DecisionLedger, LedgerDraft, LedgerEntry};
pub use performance::{PerformanceBook, StrategyRecord};
