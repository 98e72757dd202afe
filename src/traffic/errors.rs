//! Routing errors

use thiserror::Error;

/// Result type for routing updates
pub type DnsResult<T> = Result<T, DnsError>;

/// Routing update failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DnsError {
    /// One `update_record` call failed
    #[error("updating {record} -> {target} failed: {reason}")]
    UpdateFailed {
        record: String,
        target: String,
        reason: String,
    },

    /// Every attempt of one cut-over failed
    #[error("updating {record} gave up after {attempts} attempts: {last_error}")]
    Exhausted {
        record: String,
        attempts: u32,
        last_error: String,
    },
}
