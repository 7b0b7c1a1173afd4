pub mod clock;
pub mod config;
pub mod config_loader;
pub mod context;
pub mod correlation;
pub mod decision;
pub mod error;
pub mod instrument;
pub mod signal;
pub mod snapshot_watcher;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    AccountConfig, ArbitrationConfig, CircuitBreakerConfig, DegradationConfig, EngineConfig,
    ExposureConfig, GovernancePolicy, LockConfig, ParameterBound, ParameterKey,
    QualityComponent, QualityWeights, ScoringConfig, SizingConfig, StaleCorrelationPolicy,
    StrategyState,
};
pub use config_loader::ConfigLoader;
pub use context::{FeatureSnapshot, FeatureSource, MarketContext, NoFeatures, StaticFeatures};
pub use correlation::{CorrelationEntry, CorrelationSnapshot};
pub use decision::{
    ApprovedDecision, ExposureDimension, RejectReason, RejectedDecision, RiskDecision,
    TradeOutcome,
};
pub use error::{ConfigError, LockName, LockTimeout};
pub use instrument::{AssetClass, InstrumentSpec};
pub use signal::{
    DecisionUid, Direction, MarketRegime, QualityInputs, Signal, SignalInvalid, SignalTags,
    ValidatedSignal,
};
pub use snapshot_watcher::{CorrelationWatcher, SnapshotReceiver};
