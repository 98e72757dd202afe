//! Decision engine errors

use thiserror::Error;
use uuid::Uuid;

use super::journal::JournalError;
use super::lease::LeaseError;
use crate::region::RegionError;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Decision engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    /// This instance does not hold the leader lease
    #[error(transparent)]
    Lease(#[from] LeaseError),

    /// Transition not allowed from the current state
    #[error("forbidden transition: {from} -> {to}")]
    ForbiddenTransition { from: &'static str, to: &'static str },

    /// Operator command not applicable right now
    #[error("{command} rejected in state {state}: {reason}")]
    CommandRejected {
        command: &'static str,
        state: &'static str,
        reason: String,
    },

    /// A terminal episode cannot change
    #[error("episode {episode_id} already closed as {outcome}")]
    EpisodeClosed {
        episode_id: Uuid,
        outcome: &'static str,
    },

    /// The episode already used its promotion attempt
    #[error("failover already attempted for episode {episode_id}")]
    DuplicateFailover { episode_id: Uuid },

    /// No secondary can be chosen as failover target
    #[error("no secondary region available as failover target")]
    NoTarget,

    /// The step needs an open episode and there is none
    #[error("no open episode in state {state}")]
    NoActiveEpisode { state: &'static str },

    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error(transparent)]
    Region(#[from] RegionError),
}

impl EngineError {
    pub fn forbidden_transition(from: &'static str, to: &'static str) -> Self {
        EngineError::ForbiddenTransition { from, to }
    }

    pub fn command_rejected(
        command: &'static str,
        state: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        EngineError::CommandRejected {
            command,
            state,
            reason: reason.into(),
        }
    }
}
