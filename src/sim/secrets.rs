//! Simulated secret manager and credential verifier

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use crate::region::RegionRecord;
use crate::rotation::{
    ChangeGate, CredentialVerifier, CredentialVersion, RotationError, RotationResult, SecretStore,
};

/// In-memory secret store with sequential version ids (`v0`, `v1`, ...).
#[derive(Debug, Default)]
pub struct SimSecretStore {
    versions: Mutex<Vec<CredentialVersion>>,
    next_id: AtomicU64,
}

impl SimSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose only version is already active.
    pub fn with_active(version_id: &str) -> Self {
        let now = Utc::now();
        let mut version = CredentialVersion::pending(version_id, now);
        version.active = true;
        version.activated_at = Some(now);

        Self {
            versions: Mutex::new(vec![version]),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn active_version_id(&self) -> Option<String> {
        self.versions
            .lock()
            .ok()
            .and_then(|v| v.iter().find(|v| v.active).map(|v| v.version_id.clone()))
    }

    pub fn version_count(&self) -> usize {
        self.versions.lock().map(|v| v.len()).unwrap_or(0)
    }

    fn with_version<T>(
        &self,
        version_id: &str,
        f: impl FnOnce(&mut Vec<CredentialVersion>, usize) -> RotationResult<T>,
    ) -> RotationResult<T> {
        let mut versions = self
            .versions
            .lock()
            .map_err(|_| RotationError::Store("store lock poisoned".into()))?;
        let index = versions
            .iter()
            .position(|v| v.version_id == version_id)
            .ok_or_else(|| RotationError::UnknownVersion(version_id.to_string()))?;
        f(&mut versions, index)
    }
}

#[async_trait]
impl SecretStore for SimSecretStore {
    async fn create_version(&self) -> RotationResult<CredentialVersion> {
        let id = format!("v{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let version = CredentialVersion::pending(id, Utc::now());
        self.versions
            .lock()
            .map_err(|_| RotationError::Store("store lock poisoned".into()))?
            .push(version.clone());
        Ok(version)
    }

    async fn get_active_version(&self) -> RotationResult<Option<CredentialVersion>> {
        let versions = self
            .versions
            .lock()
            .map_err(|_| RotationError::Store("store lock poisoned".into()))?;
        Ok(versions.iter().find(|v| v.active).cloned())
    }

    async fn mark_active(&self, version_id: &str) -> RotationResult<()> {
        self.with_version(version_id, |versions, index| {
            let now = Utc::now();
            for version in versions.iter_mut() {
                if version.active {
                    version.active = false;
                    version.superseded_at = Some(now);
                }
            }
            let version = &mut versions[index];
            version.active = true;
            version.activated_at = Some(now);
            Ok(())
        })
    }

    async fn retire_version(&self, version_id: &str) -> RotationResult<()> {
        self.with_version(version_id, |versions, index| {
            if versions[index].active {
                return Err(RotationError::Store(format!(
                    "cannot retire active version {}",
                    version_id
                )));
            }
            versions[index].retired_at = Some(Utc::now());
            Ok(())
        })
    }

    async fn discard_version(&self, version_id: &str) -> RotationResult<()> {
        self.with_version(version_id, |versions, index| {
            if versions[index].activated_at.is_some() {
                return Err(RotationError::Store(format!(
                    "cannot discard version {} that was active",
                    version_id
                )));
            }
            versions.remove(index);
            Ok(())
        })
    }

    async fn list_versions(&self) -> RotationResult<Vec<CredentialVersion>> {
        self.versions
            .lock()
            .map(|v| v.clone())
            .map_err(|_| RotationError::Store("store lock poisoned".into()))
    }
}

/// Records propagation and verification per region.
#[derive(Debug, Default)]
pub struct SimVerifier {
    propagated: Mutex<Vec<(String, String)>>,
    verified: Mutex<Vec<(String, String)>>,
    rejected: Mutex<HashSet<String>>,
    failover_trigger: Mutex<Option<Arc<ChangeGate>>>,
}

impl SimVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Regions that fail verification.
    pub fn reject_region(&self, region: &str) {
        if let Ok(mut rejected) = self.rejected.lock() {
            rejected.insert(region.to_string());
        }
    }

    /// Start a failover on `gate` during the first verification.
    pub fn on_first_verify(&self, gate: Arc<ChangeGate>) {
        if let Ok(mut trigger) = self.failover_trigger.lock() {
            *trigger = Some(gate);
        }
    }

    /// Regions that verified `version_id`, in order.
    pub fn verified(&self, version_id: &str) -> Vec<String> {
        self.verified
            .lock()
            .map(|v| {
                v.iter()
                    .filter(|(version, _)| version == version_id)
                    .map(|(_, region)| region.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl CredentialVerifier for SimVerifier {
    async fn propagate(
        &self,
        region: &RegionRecord,
        version: &CredentialVersion,
    ) -> RotationResult<()> {
        if let Ok(mut propagated) = self.propagated.lock() {
            propagated.push((version.version_id.clone(), region.region_id.to_string()));
        }
        Ok(())
    }

    async fn verify(&self, region: &RegionRecord, version: &CredentialVersion) -> RotationResult<()> {
        let trigger = self.failover_trigger.lock().ok().and_then(|mut t| t.take());
        if let Some(gate) = trigger {
            gate.begin_failover();
        }

        let rejected = self
            .rejected
            .lock()
            .map(|r| r.contains(region.region_id.as_str()))
            .unwrap_or(false);
        if rejected {
            return Err(RotationError::Verification {
                region: region.region_id.to_string(),
                version_id: version.version_id.clone(),
                reason: "authentication failed".into(),
            });
        }

        if let Ok(mut verified) = self.verified.lock() {
            verified.push((version.version_id.clone(), region.region_id.to_string()));
        }
        Ok(())
    }
}
