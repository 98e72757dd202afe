//! Failover decision engine
//!
//! Consumes the ordered signal channel and drives the failover state
//! machine. Holds the leader lease and the episode journal.

mod decision;
mod episode;
mod errors;
mod journal;
mod lease;
mod state;

pub use decision::{DecisionEngine, EngineParts, EngineSettings};
pub use episode::{EpisodeKind, EpisodeOutcome, FailoverEpisode};
pub use errors::{EngineError, EngineResult};
pub use journal::{
    latest_versions, EpisodeJournal, FileJournal, JournalError, JournalResult, MemoryJournal,
};
pub use lease::{LeaderLock, LeaseError, LeaseHandle, LeaseResult, LeaseToken, MemoryLeaderLock};
pub use state::{BlockReason, FailoverState};
