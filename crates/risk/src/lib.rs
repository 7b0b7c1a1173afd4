//! Stateless scoring and sizing, plus the circuit breaker.

pub mod circuit_breaker;
pub mod quality;
pub mod sizing;
pub mod stats;

pub use circuit_breaker::{BreakerSnapshot, BreakerState, CircuitBreaker, TripReason};
pub use quality::{ComponentScore, QualityScoreBreakdown, QualityScorer, ScoreSource};
pub use sizing::{PositionSizer, SizedPosition};
pub use stats::RollingWindow;
