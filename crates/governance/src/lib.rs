//! Governance for the adaptive layer: bounded proposals, snapshots, and
//! rollback.
//!
//! The live [`TunableParameters`] can only be replaced through
//! [`GovernanceGuard`]; every accepted change is preceded by a snapshot.

pub mod degradation;
pub mod guard;
pub mod params;
pub mod proposal;
pub mod snapshot;

pub use degradation::{Degradation, DegradationDetector};
pub use guard::{snapshot_store_for, AutoRollback, GovernanceGuard};
pub use params::{ParameterStore, TunableParameters};
pub use proposal::{
    ChangeRequest, GovernanceError, GovernanceForbidden, ParameterChange, ProposedChange,
};
pub use snapshot::{
    InMemorySnapshotStore, JsonFileSnapshotStore, ParameterSnapshot, SnapshotError, SnapshotStore,
};
