//! The only path from the adaptive layer to the live parameters.

use decision_core::config::{EngineConfig, GovernancePolicy, ParameterKey, StrategyState};
use decision_core::{Clock, LockName, LockTimeout};
use decision_risk::QualityScorer;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::degradation::{Degradation, DegradationDetector};
use crate::params::{ParameterStore, TunableParameters};
use crate::proposal::{
    ChangeRequest, GovernanceError, GovernanceForbidden, ParameterChange, ProposedChange,
};
use crate::snapshot::{
    InMemorySnapshotStore, JsonFileSnapshotStore, ParameterSnapshot, SnapshotError, SnapshotStore,
};

/// Tolerance on the max-delta comparison for float noise.
const DELTA_EPSILON: f64 = 1e-12;

/// Picks the snapshot backend configured in the policy.
///
/// # Errors
/// Returns [`SnapshotError::Io`] if the snapshot directory cannot be created.
pub fn snapshot_store_for(
    policy: &GovernancePolicy,
) -> Result<Arc<dyn SnapshotStore>, SnapshotError> {
    Ok(match &policy.snapshot_dir {
        Some(dir) => Arc::new(JsonFileSnapshotStore::new(dir)?),
        None => Arc::new(InMemorySnapshotStore::new()),
    })
}

/// Result of an automatic rollback.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoRollback {
    pub restored: Uuid,
    pub degradation: Degradation,
}

pub struct GovernanceGuard {
    policy: GovernancePolicy,
    baseline: TunableParameters,
    store: ParameterStore,
    snapshots: Arc<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
    lock_timeout: Duration,
    /// Serializes snapshot-then-publish sequences
    writer: Mutex<()>,
    known_good: Mutex<Option<Uuid>>,
    detector: Mutex<DegradationDetector>,
}

impl std::fmt::Debug for GovernanceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GovernanceGuard")
            .field("policy", &self.policy)
            .field("known_good", &*self.known_good.lock())
            .finish_non_exhaustive()
    }
}

impl GovernanceGuard {
    /// Builds the guard from the bundle and persists the baseline as the
    /// first known-good snapshot.
    ///
    /// # Errors
    /// Returns [`GovernanceError`] for an invalid bundle or a failed
    /// baseline snapshot.
    pub fn new(
        config: &EngineConfig,
        snapshots: Arc<dyn SnapshotStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, GovernanceError> {
        let baseline = TunableParameters::from_config(config)?;
        let snapshot = ParameterSnapshot::new(
            format!("baseline {}", config.version),
            baseline.clone(),
            clock.now(),
        );
        snapshots.save(&snapshot)?;
        info!(
            snapshot = %snapshot.id,
            version = %config.version,
            "governance baseline recorded"
        );

        Ok(Self {
            policy: config.governance.clone(),
            store: ParameterStore::new(baseline.clone(), config.locks.timeout),
            baseline,
            snapshots,
            clock,
            lock_timeout: config.locks.timeout,
            writer: Mutex::new(()),
            known_good: Mutex::new(Some(snapshot.id)),
            detector: Mutex::new(DegradationDetector::new(config.governance.degradation.clone())),
        })
    }

    /// Builds the guard with the snapshot backend named in the policy.
    ///
    /// # Errors
    /// See [`GovernanceGuard::new`].
    pub fn from_config(config: &EngineConfig, clock: Arc<dyn Clock>) -> Result<Self, GovernanceError> {
        let snapshots = snapshot_store_for(&config.governance)?;
        Self::new(config, snapshots, clock)
    }

    #[must_use]
    pub fn policy(&self) -> &GovernancePolicy {
        &self.policy
    }

    #[must_use]
    pub fn baseline(&self) -> &TunableParameters {
        &self.baseline
    }

    /// Live parameters.
    ///
    /// # Errors
    /// Returns [`LockTimeout`] if a publish holds the lock past the timeout.
    pub fn parameters(&self) -> Result<Arc<TunableParameters>, LockTimeout> {
        self.store.current()
    }

    #[must_use]
    pub fn known_good(&self) -> Option<Uuid> {
        *self.known_good.lock()
    }

    /// # Errors
    /// Returns [`SnapshotError`] if the store cannot be read.
    pub fn snapshots(&self) -> Result<Vec<ParameterSnapshot>, SnapshotError> {
        self.snapshots.list()
    }

    /// Checks a proposal against the allow-list, bounds, and deny-list
    /// without changing anything.
    ///
    /// # Errors
    /// Returns the [`GovernanceForbidden`] reason for a refused proposal.
    pub fn validate(&self, change: &ProposedChange) -> Result<(), GovernanceError> {
        let current = self.store.current()?;
        self.resulting(&current, change)
            .map(|_| ())
            .map_err(|refusal| self.refused(change, refusal))
    }

    /// Validates, snapshots the current parameters, then publishes the
    /// result. Returns the id of the snapshot taken before the change.
    ///
    /// # Errors
    /// Returns [`GovernanceError::Forbidden`] for a refused proposal, or a
    /// snapshot or lock failure. On any error the live parameters are
    /// unchanged.
    pub fn apply(&self, change: &ProposedChange) -> Result<Uuid, GovernanceError> {
        let _writer = self.lock_writer()?;
        let current = self.store.current()?;
        let next = self
            .resulting(&current, change)
            .map_err(|refusal| self.refused(change, refusal))?;

        let snapshot = ParameterSnapshot::new(
            format!("before {}: {}", change.proposer, change.reason),
            (*current).clone(),
            self.clock.now(),
        );
        self.snapshots.save(&snapshot)?;
        self.store.replace(next)?;
        self.detector.lock().reset();

        info!(
            proposer = %change.proposer,
            reason = %change.reason,
            snapshot = %snapshot.id,
            "governance change applied"
        );
        Ok(snapshot.id)
    }

    /// Restores a snapshot atomically.
    ///
    /// # Errors
    /// Returns [`SnapshotError::NotFound`] for an unknown id, or a lock timeout.
    pub fn rollback(&self, id: Uuid) -> Result<(), GovernanceError> {
        let _writer = self.lock_writer()?;
        let snapshot = self.snapshots.load(id)?;
        self.store.replace(snapshot.parameters)?;
        self.detector.lock().reset();
        warn!(snapshot = %id, label = %snapshot.label, "parameters rolled back");
        Ok(())
    }

    /// Snapshots the live parameters and marks them as the rollback target
    /// for degradation.
    ///
    /// # Errors
    /// Returns a snapshot or lock failure.
    pub fn mark_known_good(&self) -> Result<Uuid, GovernanceError> {
        let _writer = self.lock_writer()?;
        let current = self.store.current()?;
        let snapshot = ParameterSnapshot::new("known good", (*current).clone(), self.clock.now());
        self.snapshots.save(&snapshot)?;
        *self.known_good.lock() = Some(snapshot.id);
        info!(snapshot = %snapshot.id, "parameters marked known good");
        Ok(snapshot.id)
    }

    /// Feeds realized performance to the degradation detector and rolls
    /// back to the last known-good snapshot when it triggers.
    ///
    /// # Errors
    /// Returns a snapshot or lock failure from the rollback.
    pub fn record_performance(&self, value: f64) -> Result<Option<AutoRollback>, GovernanceError> {
        let Some(degradation) = self.detector.lock().observe(value) else {
            return Ok(None);
        };
        let Some(restored) = self.known_good() else {
            warn!(?degradation, "performance degraded with no known-good snapshot");
            return Ok(None);
        };
        warn!(
            recent_mean = degradation.recent_mean,
            baseline_mean = degradation.baseline_mean,
            snapshot = %restored,
            "performance degraded, rolling back to known-good parameters"
        );
        self.rollback(restored)?;
        Ok(Some(AutoRollback {
            restored,
            degradation,
        }))
    }

    fn lock_writer(&self) -> Result<parking_lot::MutexGuard<'_, ()>, LockTimeout> {
        self.writer
            .try_lock_for(self.lock_timeout)
            .ok_or(LockTimeout::new(LockName::Parameters, self.lock_timeout))
    }

    fn refused(&self, change: &ProposedChange, refusal: GovernanceForbidden) -> GovernanceError {
        warn!(
            proposer = %change.proposer,
            reason = %change.reason,
            refusal = %refusal,
            "governance proposal forbidden"
        );
        GovernanceError::Forbidden(refusal)
    }

    /// Parameters that would result from `change`, or why it is refused.
    fn resulting(
        &self,
        current: &TunableParameters,
        change: &ProposedChange,
    ) -> Result<TunableParameters, GovernanceForbidden> {
        let deny = |area: &str| GovernanceForbidden::DenyListed {
            area: area.to_string(),
        };
        match &change.request {
            ChangeRequest::ModifyRiskCap { .. } => Err(deny("hard risk caps")),
            ChangeRequest::BypassExposureLimits { .. } => Err(deny("exposure limits")),
            ChangeRequest::ModifyCircuitBreaker { .. } => Err(deny("circuit breaker")),
            ChangeRequest::DisableStrategy { strategy_id } => {
                if self.policy.strategy_state(strategy_id) == StrategyState::Production {
                    return Err(GovernanceForbidden::ProductionStrategy {
                        strategy_id: strategy_id.clone(),
                    });
                }
                let mut next = current.clone();
                next.disabled_strategies.insert(strategy_id.clone());
                Ok(next)
            }
            ChangeRequest::EnableStrategy { strategy_id } => {
                let mut next = current.clone();
                next.disabled_strategies.remove(strategy_id);
                Ok(next)
            }
            ChangeRequest::Adjust { changes } => self.adjusted(current, changes),
        }
    }

    fn adjusted(
        &self,
        current: &TunableParameters,
        changes: &[ParameterChange],
    ) -> Result<TunableParameters, GovernanceForbidden> {
        if changes.is_empty() {
            return Err(GovernanceForbidden::EmptyAdjustment);
        }

        let mut seen = HashSet::new();
        let mut scoring = current.scorer.config().clone();
        let mut arbitration = current.arbitration.clone();

        for ParameterChange { key, value } in changes {
            if !seen.insert(key) {
                return Err(GovernanceForbidden::DuplicateKey { key: key.clone() });
            }
            let bound = self
                .policy
                .bound(key)
                .ok_or_else(|| GovernanceForbidden::NotAllowListed { key: key.clone() })?;

            if !value.is_finite() || *value < bound.min || *value > bound.max {
                return Err(GovernanceForbidden::OutOfBounds {
                    key: key.clone(),
                    value: *value,
                    min: bound.min,
                    max: bound.max,
                });
            }

            let baseline = self.baseline.value(key);
            let delta = (value - baseline).abs();
            if delta > bound.max_delta + DELTA_EPSILON {
                return Err(GovernanceForbidden::DeltaExceeded {
                    key: key.clone(),
                    value: *value,
                    baseline,
                    delta,
                    max_delta: bound.max_delta,
                });
            }

            match key {
                ParameterKey::ScoringWeight(component) => scoring.weights.set(*component, *value),
                ParameterKey::ArbitrationWeight(strategy) => {
                    arbitration.strategy_weights.insert(strategy.clone(), *value);
                }
            }
        }

        arbitration.validate()?;
        Ok(TunableParameters {
            scorer: QualityScorer::new(scoring)?,
            arbitration,
            disabled_strategies: current.disabled_strategies.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use decision_core::config::{ParameterBound, QualityComponent};
    use decision_core::SystemClock;

    fn config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.governance.bounds.push(ParameterBound {
            key: ParameterKey::ArbitrationWeight("momentum".to_string()),
            max_delta: 0.5,
            min: 0.5,
            max: 2.0,
        });
        config
            .governance
            .strategies
            .insert("trend".to_string(), StrategyState::Production);
        config
    }

    fn guard() -> GovernanceGuard {
        GovernanceGuard::new(
            &config(),
            Arc::new(InMemorySnapshotStore::new()),
            Arc::new(SystemClock),
        )
        .unwrap()
    }

    fn change(key: QualityComponent, value: f64) -> ParameterChange {
        ParameterChange {
            key: ParameterKey::ScoringWeight(key),
            value,
        }
    }

    fn rebalance(guard: &GovernanceGuard, shift: f64) -> Result<Uuid, GovernanceError> {
        guard.apply(&ProposedChange::adjust(
            "tuner",
            vec![
                change(QualityComponent::SignalStrength, 0.30 + shift),
                change(QualityComponent::RegimeFit, 0.15 - shift),
            ],
        ))
    }

    fn forbidden(result: Result<impl std::fmt::Debug, GovernanceError>) -> GovernanceForbidden {
        match result {
            Err(GovernanceError::Forbidden(refusal)) => refusal,
            other => panic!("expected a refusal, got {other:?}"),
        }
    }

    #[test]
    fn balanced_adjustment_within_bounds_is_applied() {
        let guard = guard();
        rebalance(&guard, 0.05).unwrap();
        let weights = guard.parameters().unwrap().scorer.config().weights;
        assert!((weights.signal_strength - 0.35).abs() < 1e-12);
        assert!((weights.regime_fit - 0.10).abs() < 1e-12);
    }

    #[test]
    fn delta_is_measured_from_baseline_not_current() {
        let guard = guard();
        rebalance(&guard, 0.08).unwrap();
        // 0.08 + 0.08 would be fine step by step but is 0.16 from baseline.
        let refusal = forbidden(rebalance(&guard, 0.12));
        assert!(matches!(refusal, GovernanceForbidden::DeltaExceeded { .. }));
    }

    #[test]
    fn unbalanced_weights_are_refused_and_baseline_kept() {
        let guard = guard();
        let refusal = forbidden(guard.apply(&ProposedChange::adjust(
            "tuner",
            vec![change(QualityComponent::SignalStrength, 0.35)],
        )));
        assert!(matches!(refusal, GovernanceForbidden::InvalidResult { .. }));
        assert_eq!(*guard.parameters().unwrap(), *guard.baseline());
    }

    #[test]
    fn parameters_off_the_allow_list_are_refused() {
        let guard = guard();
        let refusal = forbidden(guard.validate(&ProposedChange::adjust(
            "tuner",
            vec![ParameterChange {
                key: ParameterKey::ArbitrationWeight("carry".to_string()),
                value: 1.1,
            }],
        )));
        assert!(matches!(refusal, GovernanceForbidden::NotAllowListed { .. }));
    }

    #[test]
    fn arbitration_weight_respects_hard_bounds() {
        let guard = guard();
        let key = ParameterKey::ArbitrationWeight("momentum".to_string());
        let refusal = forbidden(guard.validate(&ProposedChange::adjust(
            "tuner",
            vec![ParameterChange {
                key: key.clone(),
                value: 0.4,
            }],
        )));
        assert!(matches!(refusal, GovernanceForbidden::OutOfBounds { .. }));

        guard
            .apply(&ProposedChange::adjust(
                "tuner",
                vec![ParameterChange { key, value: 1.4 }],
            ))
            .unwrap();
        let weight = guard.parameters().unwrap().arbitration.strategy_weight("momentum");
        assert!((weight - 1.4).abs() < 1e-12);
    }

    #[test]
    fn deny_list_is_absolute() {
        let guard = guard();
        for request in [
            ChangeRequest::ModifyRiskCap {
                field: "max_risk_pct".to_string(),
                value: "5.0".to_string(),
            },
            ChangeRequest::BypassExposureLimits { strategy_id: None },
            ChangeRequest::ModifyCircuitBreaker {
                field: "max_consecutive_losses".to_string(),
                value: "100".to_string(),
            },
        ] {
            let refusal = forbidden(guard.apply(&ProposedChange::new("tuner", "test", request)));
            assert!(matches!(refusal, GovernanceForbidden::DenyListed { .. }));
        }
        assert_eq!(guard.snapshots().unwrap().len(), 1, "only the baseline");
    }

    #[test]
    fn production_strategies_cannot_be_disabled() {
        let guard = guard();
        let disable = |id: &str| {
            ProposedChange::new(
                "tuner",
                "underperforming",
                ChangeRequest::DisableStrategy {
                    strategy_id: id.to_string(),
                },
            )
        };
        let refusal = forbidden(guard.apply(&disable("trend")));
        assert!(matches!(refusal, GovernanceForbidden::ProductionStrategy { .. }));

        guard.apply(&disable("grid")).unwrap();
        assert!(guard.parameters().unwrap().is_disabled("grid"));
    }

    #[test]
    fn rollback_restores_exact_parameters() {
        let guard = guard();
        let before_first = rebalance(&guard, 0.05).unwrap();
        let after_first = guard.parameters().unwrap();
        rebalance(&guard, -0.05).unwrap();

        guard.rollback(before_first).unwrap();
        assert_eq!(*guard.parameters().unwrap(), *guard.baseline());
        assert_ne!(*after_first, *guard.baseline());

        assert!(matches!(
            guard.rollback(Uuid::new_v4()),
            Err(GovernanceError::Snapshot(SnapshotError::NotFound(_)))
        ));
    }

    #[test]
    fn degradation_rolls_back_to_known_good() {
        let mut config = config();
        config.governance.degradation.baseline_window = 3;
        config.governance.degradation.recent_window = 2;
        let guard = GovernanceGuard::new(
            &config,
            Arc::new(InMemorySnapshotStore::new()),
            Arc::new(SystemClock),
        )
        .unwrap();

        rebalance(&guard, 0.05).unwrap();
        let tuned = guard.parameters().unwrap();
        let known_good = guard.mark_known_good().unwrap();
        rebalance(&guard, 0.10).unwrap();

        for pnl in [1.0, 1.0, 1.0, 0.2] {
            assert!(guard.record_performance(pnl).unwrap().is_none());
        }
        let rollback = guard.record_performance(0.1).unwrap().unwrap();
        assert_eq!(rollback.restored, known_good);
        assert_eq!(guard.parameters().unwrap(), tuned);
    }

    #[test]
    fn json_snapshots_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config();
        config.governance.snapshot_dir = Some(dir.path().to_path_buf());

        let first = GovernanceGuard::from_config(&config, Arc::new(SystemClock)).unwrap();
        let before = rebalance(&first, 0.05).unwrap();
        drop(first);

        let second = GovernanceGuard::from_config(&config, Arc::new(SystemClock)).unwrap();
        rebalance(&second, -0.05).unwrap();
        second.rollback(before).unwrap();
        assert_eq!(*second.parameters().unwrap(), *second.baseline());
    }
}
