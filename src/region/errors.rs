//! Region registry errors

use thiserror::Error;

/// Result type for registry operations
pub type RegionResult<T> = Result<T, RegionError>;

/// Registry errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegionError {
    /// Region id not present in the registry
    #[error("unknown region: {0}")]
    UnknownRegion(String),

    /// Records do not describe a valid deployment
    #[error("invalid region topology: {0}")]
    InvalidTopology(String),

    /// Not exactly one PRIMARY
    #[error("split-brain: {primaries} regions hold PRIMARY")]
    SplitBrain { primaries: usize },

    /// A writer panicked while holding the registry lock
    #[error("region registry lock poisoned")]
    LockPoisoned,
}
