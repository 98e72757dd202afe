//! Failover state machine
//!
//! States are explicit and every transition consumes the old state. A
//! transition not listed here is an error, never a silent no-op.
//!
//! ```text
//! HEALTHY -> SUSPECT -> FAILING_OVER -> FAILED_OVER -> RECOVERING -> HEALTHY
//!               |            |
//!               v            v
//!            BLOCKED    FAILOVER_FAILED (frozen until resolved by an operator)
//! ```
//!
//! RESTORE_FAILED is entered from any state when the journal cannot be
//! replayed on gaining leadership; it is frozen like FAILOVER_FAILED.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::{EngineError, EngineResult};

/// Why a failover is not proceeding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockReason {
    /// Target lag at or above the threshold
    LagDegraded,
    /// Not enough lag samples yet
    LagUnknown,
    /// The chosen target is itself unhealthy
    TargetUnhealthy,
    /// Old primary could not be fenced; episode aborted
    FencingFailed,
    /// A credential rotation did not release the change gate in time
    RotationInFlight,
    /// Shutdown cancelled the promotion before fencing
    Cancelled,
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockReason::LagDegraded => "LAG_DEGRADED",
            BlockReason::LagUnknown => "LAG_UNKNOWN",
            BlockReason::TargetUnhealthy => "TARGET_UNHEALTHY",
            BlockReason::FencingFailed => "FENCING_FAILED",
            BlockReason::RotationInFlight => "ROTATION_IN_FLIGHT",
            BlockReason::Cancelled => "CANCELLED",
        }
    }

    /// The episode was abandoned; only `RetryFailover` moves on.
    pub fn episode_aborted(&self) -> bool {
        matches!(
            self,
            BlockReason::FencingFailed | BlockReason::RotationInFlight | BlockReason::Cancelled
        )
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailoverState {
    /// Primary serving, no episode open
    Healthy,
    /// Primary unhealthy; episode open, deciding
    Suspect { episode_id: Uuid },
    /// Failover held back
    Blocked {
        episode_id: Uuid,
        reason: BlockReason,
        /// Alerts raised since blocking
        escalation: u32,
    },
    /// Promotion running, or routing update still pending after it
    FailingOver { episode_id: Uuid, dns_pending: bool },
    /// A secondary is primary and serving traffic
    FailedOver { episode_id: Uuid },
    /// Promotion failed after fencing; frozen
    FailoverFailed { episode_id: Uuid },
    /// Former primary being rebuilt as a replica
    Recovering { episode_id: Uuid },
    /// Journal could not be replayed; frozen
    RestoreFailed,
}

impl Default for FailoverState {
    fn default() -> Self {
        FailoverState::Healthy
    }
}

impl FailoverState {
    pub fn state_name(&self) -> &'static str {
        match self {
            Self::Healthy => "HEALTHY",
            Self::Suspect { .. } => "SUSPECT",
            Self::Blocked { .. } => "BLOCKED",
            Self::FailingOver { .. } => "FAILING_OVER",
            Self::FailedOver { .. } => "FAILED_OVER",
            Self::FailoverFailed { .. } => "FAILOVER_FAILED",
            Self::Recovering { .. } => "RECOVERING",
            Self::RestoreFailed => "RESTORE_FAILED",
        }
    }

    /// Episode this state belongs to.
    pub fn episode_id(&self) -> Option<Uuid> {
        match self {
            Self::Healthy | Self::RestoreFailed => None,
            Self::Suspect { episode_id }
            | Self::Blocked { episode_id, .. }
            | Self::FailingOver { episode_id, .. }
            | Self::FailedOver { episode_id }
            | Self::FailoverFailed { episode_id }
            | Self::Recovering { episode_id } => Some(*episode_id),
        }
    }

    /// Automatic handling is suspended until an operator resolves it.
    pub fn is_frozen(&self) -> bool {
        matches!(self, Self::FailoverFailed { .. } | Self::RestoreFailed)
    }

    /// HEALTHY → SUSPECT
    pub fn suspect(self, episode_id: Uuid) -> EngineResult<Self> {
        match self {
            Self::Healthy => Ok(Self::Suspect { episode_id }),
            _ => Err(EngineError::forbidden_transition(self.state_name(), "SUSPECT")),
        }
    }

    /// SUSPECT | FAILING_OVER → BLOCKED, or BLOCKED → BLOCKED with a new reason.
    ///
    /// From FAILING_OVER only before fencing (fencing failure, rotation wait).
    pub fn block(self, reason: BlockReason) -> EngineResult<Self> {
        match self {
            Self::Suspect { episode_id } => Ok(Self::Blocked {
                episode_id,
                reason,
                escalation: 0,
            }),
            Self::Blocked {
                episode_id,
                escalation,
                ..
            } => Ok(Self::Blocked {
                episode_id,
                reason,
                escalation,
            }),
            Self::FailingOver {
                episode_id,
                dns_pending: false,
            } if reason.episode_aborted() => Ok(Self::Blocked {
                episode_id,
                reason,
                escalation: 0,
            }),
            _ => Err(EngineError::forbidden_transition(self.state_name(), "BLOCKED")),
        }
    }

    /// BLOCKED → BLOCKED with the escalation level raised.
    pub fn escalate(self) -> EngineResult<Self> {
        match self {
            Self::Blocked {
                episode_id,
                reason,
                escalation,
            } => Ok(Self::Blocked {
                episode_id,
                reason,
                escalation: escalation.saturating_add(1),
            }),
            _ => Err(EngineError::forbidden_transition(self.state_name(), "BLOCKED")),
        }
    }

    /// SUSPECT | BLOCKED → FAILING_OVER
    pub fn begin_failover(self) -> EngineResult<Self> {
        match self {
            Self::Suspect { episode_id } => Ok(Self::FailingOver {
                episode_id,
                dns_pending: false,
            }),
            Self::Blocked {
                episode_id, reason, ..
            } if !reason.episode_aborted() => Ok(Self::FailingOver {
                episode_id,
                dns_pending: false,
            }),
            _ => Err(EngineError::forbidden_transition(
                self.state_name(),
                "FAILING_OVER",
            )),
        }
    }

    /// Promotion committed, routing update still outstanding.
    pub fn mark_dns_pending(self) -> EngineResult<Self> {
        match self {
            Self::FailingOver { episode_id, .. } => Ok(Self::FailingOver {
                episode_id,
                dns_pending: true,
            }),
            _ => Err(EngineError::forbidden_transition(
                self.state_name(),
                "FAILING_OVER",
            )),
        }
    }

    /// FAILING_OVER → FAILED_OVER
    pub fn complete_failover(self) -> EngineResult<Self> {
        match self {
            Self::FailingOver { episode_id, .. } => Ok(Self::FailedOver { episode_id }),
            _ => Err(EngineError::forbidden_transition(
                self.state_name(),
                "FAILED_OVER",
            )),
        }
    }

    /// FAILING_OVER → FAILOVER_FAILED
    pub fn fail_failover(self) -> EngineResult<Self> {
        match self {
            Self::FailingOver { episode_id, .. } => Ok(Self::FailoverFailed { episode_id }),
            _ => Err(EngineError::forbidden_transition(
                self.state_name(),
                "FAILOVER_FAILED",
            )),
        }
    }

    /// SUSPECT | BLOCKED → HEALTHY (primary came back)
    pub fn abort(self) -> EngineResult<Self> {
        match self {
            Self::Suspect { .. } | Self::Blocked { .. } => Ok(Self::Healthy),
            _ => Err(EngineError::forbidden_transition(self.state_name(), "HEALTHY")),
        }
    }

    /// FAILED_OVER → RECOVERING, or RECOVERING → RECOVERING on retry
    pub fn begin_recovery(self, episode_id: Uuid) -> EngineResult<Self> {
        match self {
            Self::FailedOver { .. } | Self::Recovering { .. } => {
                Ok(Self::Recovering { episode_id })
            }
            _ => Err(EngineError::forbidden_transition(
                self.state_name(),
                "RECOVERING",
            )),
        }
    }

    /// RECOVERING → HEALTHY
    pub fn complete_recovery(self) -> EngineResult<Self> {
        match self {
            Self::Recovering { .. } => Ok(Self::Healthy),
            _ => Err(EngineError::forbidden_transition(self.state_name(), "HEALTHY")),
        }
    }

    /// FAILOVER_FAILED | RESTORE_FAILED → HEALTHY after manual repair
    pub fn resolve_manually(self) -> EngineResult<Self> {
        match self {
            Self::FailoverFailed { .. } | Self::RestoreFailed => Ok(Self::Healthy),
            _ => Err(EngineError::forbidden_transition(self.state_name(), "HEALTHY")),
        }
    }

    /// BLOCKED (episode aborted) → SUSPECT with a fresh episode
    pub fn reopen(self, episode_id: Uuid) -> EngineResult<Self> {
        match self {
            Self::Blocked { reason, .. } if reason.episode_aborted() => {
                Ok(Self::Suspect { episode_id })
            }
            _ => Err(EngineError::forbidden_transition(self.state_name(), "SUSPECT")),
        }
    }
}

impl fmt::Display for FailoverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.state_name())
    }
}
