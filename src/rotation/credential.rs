//! Credential versions and the external stores that hold them

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::RotationResult;
use crate::region::RegionRecord;

/// One version of the shared database credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialVersion {
    pub version_id: String,
    pub created_at: DateTime<Utc>,
    pub active: bool,
    pub activated_at: Option<DateTime<Utc>>,
    /// When another version replaced this one as active
    pub superseded_at: Option<DateTime<Utc>>,
    pub retired_at: Option<DateTime<Utc>>,
}

impl CredentialVersion {
    /// A freshly created, inactive version.
    pub fn pending(version_id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            version_id: version_id.into(),
            created_at,
            active: false,
            activated_at: None,
            superseded_at: None,
            retired_at: None,
        }
    }

    /// Superseded, not yet retired, and past the grace period at `now`.
    pub fn is_retirable(&self, now: DateTime<Utc>, grace: chrono::Duration) -> bool {
        !self.active
            && self.retired_at.is_none()
            && self
                .superseded_at
                .map(|superseded| now - superseded >= grace)
                .unwrap_or(false)
    }
}

/// Secret manager holding credential versions.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn create_version(&self) -> RotationResult<CredentialVersion>;

    async fn get_active_version(&self) -> RotationResult<Option<CredentialVersion>>;

    /// Make `version_id` the single active version, superseding the previous one.
    async fn mark_active(&self, version_id: &str) -> RotationResult<()>;

    /// Disable a superseded version. It stays listed.
    async fn retire_version(&self, version_id: &str) -> RotationResult<()>;

    /// Remove a version that never became active.
    async fn discard_version(&self, version_id: &str) -> RotationResult<()>;

    async fn list_versions(&self) -> RotationResult<Vec<CredentialVersion>>;
}

/// Distributes and checks credentials in each region.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn propagate(&self, region: &RegionRecord, version: &CredentialVersion)
        -> RotationResult<()>;

    /// Authenticate against the region's database with `version`.
    async fn verify(&self, region: &RegionRecord, version: &CredentialVersion) -> RotationResult<()>;
}
