//! Lag source errors

use thiserror::Error;

/// Result type for lag reads
pub type LagResult<T> = Result<T, LagError>;

/// Replication lag read failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LagError {
    /// The replica did not report lag; counted as a degraded sample
    #[error("replication lag unavailable for {region}: {reason}")]
    Unavailable { region: String, reason: String },
}
