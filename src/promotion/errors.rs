//! Promotion errors
//!
//! Whether the old primary may already be fenced decides what the engine
//! does next: before fencing the episode can be abandoned and retried,
//! after fencing only an operator can resolve it.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use super::cluster::ClusterError;

/// Result type for promotion operations
pub type PromotionResult<T> = Result<T, PromotionError>;

/// Promotion failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PromotionError {
    /// Cancelled before fencing; nothing changed
    #[error("promotion for episode {episode_id} cancelled before fencing")]
    Cancelled { episode_id: Uuid },

    /// This episode already used its single promotion attempt
    #[error("promotion already attempted for episode {episode_id}")]
    AlreadyAttempted { episode_id: Uuid },

    /// The old primary could not be fenced; nothing irreversible happened
    #[error("fencing {cluster} failed: {source}")]
    FencingFailed {
        cluster: String,
        #[source]
        source: ClusterError,
    },

    /// Secondary never caught up within the deadline
    #[error("{cluster} did not catch up to {bound:?} (last lag {last_lag:?})")]
    CatchUpTimeout {
        cluster: String,
        bound: Duration,
        last_lag: Option<Duration>,
    },

    /// The control plane refused the promote request
    #[error("promote of {cluster} rejected: {source}")]
    PromoteRejected {
        cluster: String,
        #[source]
        source: ClusterError,
    },

    /// Overall deadline passed before the secondary became writer-capable
    #[error("promotion of {cluster} timed out after {elapsed:?}")]
    PromotionTimeout { cluster: String, elapsed: Duration },
}

impl PromotionError {
    /// The old primary may be fenced; the episode cannot be abandoned.
    pub fn old_primary_fenced(&self) -> bool {
        matches!(
            self,
            PromotionError::CatchUpTimeout { .. }
                | PromotionError::PromoteRejected { .. }
                | PromotionError::PromotionTimeout { .. }
        )
    }

    /// Safe to retry through a new episode.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PromotionError::Cancelled { .. } | PromotionError::FencingFailed { .. }
        )
    }

    /// Only an operator can resolve this outcome.
    pub fn requires_operator(&self) -> bool {
        self.old_primary_fenced()
    }

    /// Stable kind name for logs and journal reasons.
    pub fn kind_str(&self) -> &'static str {
        match self {
            PromotionError::Cancelled { .. } => "CANCELLED",
            PromotionError::AlreadyAttempted { .. } => "ALREADY_ATTEMPTED",
            PromotionError::FencingFailed { .. } => "FENCING_FAILED",
            PromotionError::CatchUpTimeout { .. } => "CATCH_UP_TIMEOUT",
            PromotionError::PromoteRejected { .. } => "PROMOTE_REJECTED",
            PromotionError::PromotionTimeout { .. } => "PROMOTION_TIMEOUT",
        }
    }
}
