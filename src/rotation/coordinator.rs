//! Scheduled credential rotation
//!
//! create → propagate to every region → verify every region → mark active.
//! The gate is checked at every step boundary; a failover request at a
//! boundary discards the new version and leaves the old one active.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant, MissedTickBehavior};

use super::credential::{CredentialVerifier, CredentialVersion, SecretStore};
use super::errors::{RotationError, RotationResult};
use super::gate::{ChangeGate, RotationPermit};
use crate::engine::LeaseHandle;
use crate::notify::{deliver, EventKind, LifecycleEvent, Notifier};
use crate::observability::{Event, Logger, MetricsRegistry};
use crate::region::RegionRegistry;

/// Rotation tunables.
#[derive(Debug, Clone)]
pub struct RotationSettings {
    pub rotation_interval: Duration,
    /// How long a superseded version keeps working
    pub grace_period: Duration,
    /// Delay before retrying a deferred or failed rotation
    pub retry_delay: Duration,
    /// How often superseded versions are checked for retirement
    pub housekeeping_interval: Duration,
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            rotation_interval: Duration::from_secs(30 * 24 * 60 * 60),
            grace_period: Duration::from_secs(60 * 60),
            retry_delay: Duration::from_secs(10 * 60),
            housekeeping_interval: Duration::from_secs(60),
        }
    }
}

/// Result of one rotation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RotationOutcome {
    /// The new version is active everywhere
    Rotated { version_id: String },
    /// Not started; the gate was held
    Deferred { reason: String },
    /// Interrupted by a failover; the new version was discarded
    RolledBack { version_id: String, step: String },
}

/// Runs credential rotations against the secret store.
pub struct RotationCoordinator {
    store: Arc<dyn SecretStore>,
    verifier: Arc<dyn CredentialVerifier>,
    registry: Arc<RegionRegistry>,
    gate: Arc<ChangeGate>,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<MetricsRegistry>,
    settings: RotationSettings,
    lease: Option<Arc<LeaseHandle>>,
}

impl RotationCoordinator {
    pub fn new(
        store: Arc<dyn SecretStore>,
        verifier: Arc<dyn CredentialVerifier>,
        registry: Arc<RegionRegistry>,
        gate: Arc<ChangeGate>,
        notifier: Arc<dyn Notifier>,
        metrics: Arc<MetricsRegistry>,
        settings: RotationSettings,
    ) -> Self {
        Self {
            store,
            verifier,
            registry,
            gate,
            notifier,
            metrics,
            settings,
            lease: None,
        }
    }

    /// Only rotate while `lease` is held.
    pub fn with_lease(mut self, lease: Arc<LeaseHandle>) -> Self {
        self.lease = Some(lease);
        self
    }

    fn may_act(&self) -> bool {
        self.lease.as_ref().map_or(true, |l| l.is_leader())
    }

    /// Attempt one rotation.
    ///
    /// A held gate yields `Ok(Deferred)`. Propagation or verification
    /// failures discard the new version and return the error.
    pub async fn rotate(&self) -> RotationResult<RotationOutcome> {
        let permit = match self.gate.try_begin_rotation() {
            Ok(permit) => permit,
            Err(RotationError::Conflict(reason)) => {
                self.metrics.increment_rotations_deferred();
                Logger::event(Event::RotationDeferred, &[("reason", &reason)]);
                deliver(
                    self.notifier.as_ref(),
                    &self.metrics,
                    LifecycleEvent::new(EventKind::RotationDeferred, "credential rotation deferred")
                        .with_field("reason", &reason),
                )
                .await;
                return Ok(RotationOutcome::Deferred { reason });
            }
            Err(e) => return Err(e),
        };

        let version = self.store.create_version().await?;
        Logger::event(Event::RotationBegin, &[("version_id", &version.version_id)]);

        match self.run_steps(&permit, &version).await {
            Ok(None) => {
                self.metrics.increment_rotations_completed();
                Logger::event(
                    Event::RotationComplete,
                    &[("version_id", &version.version_id)],
                );
                deliver(
                    self.notifier.as_ref(),
                    &self.metrics,
                    LifecycleEvent::new(EventKind::RotationCompleted, "credential rotated")
                        .with_field("version_id", &version.version_id),
                )
                .await;
                Ok(RotationOutcome::Rotated {
                    version_id: version.version_id,
                })
            }
            Ok(Some(step)) => {
                self.roll_back(&version, &step).await;
                Ok(RotationOutcome::RolledBack {
                    version_id: version.version_id,
                    step,
                })
            }
            Err(e) => {
                self.roll_back(&version, &e.to_string()).await;
                Err(e)
            }
        }
    }

    /// Run the per-region steps. `Ok(Some(step))` means a failover was
    /// requested before `step`.
    async fn run_steps(
        &self,
        permit: &RotationPermit,
        version: &CredentialVersion,
    ) -> RotationResult<Option<String>> {
        let regions = self.registry.snapshot();

        for region in &regions {
            if permit.failover_requested() {
                return Ok(Some(format!("propagate:{}", region.region_id)));
            }
            self.verifier.propagate(region, version).await?;
        }

        for region in &regions {
            if permit.failover_requested() {
                return Ok(Some(format!("verify:{}", region.region_id)));
            }
            self.verifier.verify(region, version).await?;
        }

        if permit.failover_requested() {
            return Ok(Some("activate".into()));
        }
        self.store.mark_active(&version.version_id).await?;
        Ok(None)
    }

    async fn roll_back(&self, version: &CredentialVersion, reason: &str) {
        self.metrics.increment_rotations_rolled_back();
        if let Err(e) = self.store.discard_version(&version.version_id).await {
            Logger::warn(
                "ROTATION_DISCARD_FAILED",
                &[("version_id", &version.version_id), ("error", &e.to_string())],
            );
        }
        Logger::event(
            Event::RotationRolledBack,
            &[("reason", reason), ("version_id", &version.version_id)],
        );
        deliver(
            self.notifier.as_ref(),
            &self.metrics,
            LifecycleEvent::new(EventKind::RotationRolledBack, "credential rotation rolled back")
                .with_field("version_id", &version.version_id)
                .with_field("reason", reason),
        )
        .await;
    }

    /// Retire every superseded version past the grace period.
    ///
    /// Returns the retired version ids.
    pub async fn retire_superseded(
        &self,
        now: chrono::DateTime<Utc>,
    ) -> RotationResult<Vec<String>> {
        let grace = chrono::Duration::from_std(self.settings.grace_period)
            .unwrap_or_else(|_| chrono::Duration::hours(1));

        let mut retired = Vec::new();
        for version in self.store.list_versions().await? {
            if version.is_retirable(now, grace) {
                self.store.retire_version(&version.version_id).await?;
                Logger::event(
                    Event::CredentialRetired,
                    &[("version_id", &version.version_id)],
                );
                retired.push(version.version_id);
            }
        }
        Ok(retired)
    }

    /// Rotate every interval and retire superseded versions until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut next_rotation = Instant::now() + self.settings.rotation_interval;
        let mut housekeeping = tokio::time::interval(self.settings.housekeeping_interval);
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = sleep_until(next_rotation) => {
                    if !self.may_act() {
                        next_rotation = Instant::now() + self.settings.retry_delay;
                        continue;
                    }
                    let delay = match self.rotate().await {
                        Ok(RotationOutcome::Rotated { .. }) => self.settings.rotation_interval,
                        Ok(_) => self.settings.retry_delay,
                        Err(e) => {
                            Logger::error("ROTATION_FAILED", &[("error", &e.to_string())]);
                            self.settings.retry_delay
                        }
                    };
                    next_rotation = Instant::now() + delay;
                }
                _ = housekeeping.tick() => {
                    if !self.may_act() {
                        continue;
                    }
                    if let Err(e) = self.retire_superseded(Utc::now()).await {
                        Logger::warn("CREDENTIAL_RETIRE_FAILED", &[("error", &e.to_string())]);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::MemoryNotifier;
    use crate::region::{RegionRecord, RegionRole};
    use crate::sim::{SimSecretStore, SimVerifier};

    struct Fixture {
        store: Arc<SimSecretStore>,
        verifier: Arc<SimVerifier>,
        gate: Arc<ChangeGate>,
        notifier: MemoryNotifier,
        coordinator: RotationCoordinator,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(
            RegionRegistry::new(vec![
                RegionRecord::new("use1", RegionRole::Primary, "use1:5432", "c1"),
                RegionRecord::new("usw2", RegionRole::Secondary, "usw2:5432", "c2"),
            ])
            .unwrap(),
        );
        let store = Arc::new(SimSecretStore::with_active("v0"));
        let verifier = Arc::new(SimVerifier::new());
        let gate = Arc::new(ChangeGate::new());
        let notifier = MemoryNotifier::new();
        let coordinator = RotationCoordinator::new(
            store.clone(),
            verifier.clone(),
            registry,
            Arc::clone(&gate),
            Arc::new(notifier.clone()),
            Arc::new(MetricsRegistry::new()),
            RotationSettings::default(),
        );
        Fixture {
            store,
            verifier,
            gate,
            notifier,
            coordinator,
        }
    }

    #[tokio::test]
    async fn test_rotation_activates_after_all_regions_verify() {
        let f = fixture();

        let outcome = f.coordinator.rotate().await.unwrap();
        let RotationOutcome::Rotated { version_id } = outcome else {
            panic!("expected rotation, got {outcome:?}");
        };

        let active = f.store.active_version_id();
        assert_eq!(active.as_deref(), Some(version_id.as_str()));
        assert_eq!(f.verifier.verified(&version_id), vec!["use1", "usw2"]);
        assert_eq!(f.notifier.count(EventKind::RotationCompleted), 1);
        assert!(!f.gate.rotation_active());
    }

    #[tokio::test]
    async fn test_deferred_while_failover_active() {
        let f = fixture();
        f.gate.begin_failover();

        let outcome = f.coordinator.rotate().await.unwrap();

        assert!(matches!(outcome, RotationOutcome::Deferred { .. }));
        assert_eq!(f.store.active_version_id().as_deref(), Some("v0"));
        assert_eq!(f.store.version_count(), 1);
        assert_eq!(f.notifier.count(EventKind::RotationDeferred), 1);
    }

    #[tokio::test]
    async fn test_failover_mid_rotation_rolls_back() {
        let f = fixture();
        f.verifier.on_first_verify(Arc::clone(&f.gate));

        let outcome = f.coordinator.rotate().await.unwrap();

        match outcome {
            RotationOutcome::RolledBack { step, .. } => assert_eq!(step, "verify:usw2"),
            other => panic!("expected rollback, got {other:?}"),
        }
        assert_eq!(f.store.active_version_id().as_deref(), Some("v0"));
        assert_eq!(f.store.version_count(), 1);
        assert!(!f.gate.rotation_active());
    }

    #[tokio::test]
    async fn test_verification_failure_keeps_old_version() {
        let f = fixture();
        f.verifier.reject_region("usw2");

        let err = f.coordinator.rotate().await.unwrap_err();

        assert!(matches!(err, RotationError::Verification { .. }));
        assert_eq!(f.store.active_version_id().as_deref(), Some("v0"));
        assert_eq!(f.notifier.count(EventKind::RotationRolledBack), 1);
    }

    #[tokio::test]
    async fn test_retire_after_grace_period() {
        let f = fixture();
        f.coordinator.rotate().await.unwrap();

        let soon = Utc::now() + chrono::Duration::minutes(10);
        assert!(f.coordinator.retire_superseded(soon).await.unwrap().is_empty());

        let later = Utc::now() + chrono::Duration::minutes(61);
        let retired = f.coordinator.retire_superseded(later).await.unwrap();
        assert_eq!(retired, vec!["v0".to_string()]);

        // Retired versions are kept, not deleted
        assert_eq!(f.store.version_count(), 2);
    }
}
