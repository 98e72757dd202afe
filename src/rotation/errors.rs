//! Rotation errors

use thiserror::Error;

/// Result type for rotation operations
pub type RotationResult<T> = Result<T, RotationError>;

/// Credential rotation failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RotationError {
    /// A failover (or another rotation) holds the change gate. Not a failure.
    #[error("rotation conflict: {0}")]
    Conflict(String),

    /// Secret store call failed
    #[error("secret store error: {0}")]
    Store(String),

    /// Version id not present in the store
    #[error("unknown credential version: {0}")]
    UnknownVersion(String),

    /// Distributing the new version to a region failed
    #[error("propagating {version_id} to {region} failed: {reason}")]
    Propagation {
        region: String,
        version_id: String,
        reason: String,
    },

    /// A region could not authenticate with the new version
    #[error("{region} could not authenticate with {version_id}: {reason}")]
    Verification {
        region: String,
        version_id: String,
        reason: String,
    },
}

impl RotationError {
    /// Deferred rather than failed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, RotationError::Conflict(_))
    }
}
