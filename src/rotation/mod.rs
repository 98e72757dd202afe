//! Credential rotation
//!
//! Exactly one credential version is active. A new version becomes active
//! only after every region authenticated with it, and rotation never runs
//! concurrently with a failover.

mod coordinator;
mod credential;
mod errors;
mod gate;

pub use coordinator::{RotationCoordinator, RotationOutcome, RotationSettings};
pub use credential::{CredentialVerifier, CredentialVersion, SecretStore};
pub use errors::{RotationError, RotationResult};
pub use gate::{ChangeGate, RotationPermit};
