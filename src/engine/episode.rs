//! Failover episodes
//!
//! One episode is one failure-handling attempt, from HEALTHY → SUSPECT to a
//! terminal outcome. A terminal episode never changes again; every version
//! is appended to the journal.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::{EngineError, EngineResult};
use super::state::BlockReason;
use crate::region::RegionId;

/// What the episode is handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EpisodeKind {
    /// Primary failure
    Failover,
    /// Rebuilding the former primary and returning to HEALTHY
    Recovery,
    /// Operator declared the primary after FAILOVER_FAILED
    ManualResolution,
}

/// Final (or current) result of an episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EpisodeOutcome {
    InProgress,
    FailedOver,
    FailoverFailed,
    /// Abandoned before any irreversible step
    Aborted,
    Recovered,
    Resolved,
}

impl EpisodeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EpisodeOutcome::InProgress => "IN_PROGRESS",
            EpisodeOutcome::FailedOver => "FAILED_OVER",
            EpisodeOutcome::FailoverFailed => "FAILOVER_FAILED",
            EpisodeOutcome::Aborted => "ABORTED",
            EpisodeOutcome::Recovered => "RECOVERED",
            EpisodeOutcome::Resolved => "RESOLVED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self != EpisodeOutcome::InProgress
    }
}

impl fmt::Display for EpisodeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure-handling episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverEpisode {
    pub episode_id: Uuid,
    pub kind: EpisodeKind,
    pub triggered_at: DateTime<Utc>,
    pub from_region: RegionId,
    pub to_region: RegionId,
    /// Engine state name at the time of this version
    pub state: String,
    pub completed_at: Option<DateTime<Utc>>,
    pub outcome: EpisodeOutcome,
    /// Why the latest state was entered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_lag_ms: Option<u64>,
    /// Fencing may have happened; never promote again for this id
    #[serde(default)]
    pub failover_attempted: bool,
    /// Set when the episode was abandoned into BLOCKED
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<BlockReason>,
}

impl FailoverEpisode {
    /// Open an episode.
    pub fn open(
        kind: EpisodeKind,
        from_region: RegionId,
        to_region: RegionId,
        state: &str,
    ) -> Self {
        Self {
            episode_id: Uuid::new_v4(),
            kind,
            triggered_at: Utc::now(),
            from_region,
            to_region,
            state: state.to_string(),
            completed_at: None,
            outcome: EpisodeOutcome::InProgress,
            reason: None,
            final_lag_ms: None,
            failover_attempted: false,
            blocked_reason: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome.is_terminal()
    }

    /// Record a new in-progress state.
    pub fn advance(&mut self, state: &str, reason: Option<String>) -> EngineResult<()> {
        self.ensure_open()?;
        self.state = state.to_string();
        if reason.is_some() {
            self.reason = reason;
        }
        Ok(())
    }

    /// Claim the single promotion attempt.
    pub fn claim_failover(&mut self) -> EngineResult<()> {
        self.ensure_open()?;
        if self.failover_attempted {
            return Err(EngineError::DuplicateFailover {
                episode_id: self.episode_id,
            });
        }
        self.failover_attempted = true;
        self.state = "FAILING_OVER".to_string();
        Ok(())
    }

    /// Close the episode. Fails if already closed.
    pub fn finish(
        &mut self,
        state: &str,
        outcome: EpisodeOutcome,
        reason: Option<String>,
    ) -> EngineResult<()> {
        self.ensure_open()?;
        self.state = state.to_string();
        self.outcome = outcome;
        self.completed_at = Some(Utc::now());
        if reason.is_some() {
            self.reason = reason;
        }
        Ok(())
    }

    fn ensure_open(&self) -> EngineResult<()> {
        if self.is_terminal() {
            return Err(EngineError::EpisodeClosed {
                episode_id: self.episode_id,
                outcome: self.outcome.as_str(),
            });
        }
        Ok(())
    }
}
