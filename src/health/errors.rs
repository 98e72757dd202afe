//! Probe errors
//!
//! Every probe error is transient: it only feeds the hysteresis counter and
//! is never, on its own, a failover trigger.

use thiserror::Error;

/// Result type for a single liveness probe
pub type ProbeResult<T> = Result<T, ProbeError>;

/// Liveness probe failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    /// No answer within the probe timeout
    #[error("probe of {endpoint} timed out after {timeout_ms}ms")]
    Timeout { endpoint: String, timeout_ms: u64 },

    /// TCP connect refused or reset
    #[error("probe of {endpoint} could not connect: {reason}")]
    Connect { endpoint: String, reason: String },

    /// HTTP answered with a non-2xx status
    #[error("probe of {endpoint} returned status {status}")]
    BadStatus { endpoint: String, status: u16 },

    /// Response was not a parseable HTTP status line
    #[error("probe of {endpoint} got a malformed response: {reason}")]
    Protocol { endpoint: String, reason: String },
}

impl ProbeError {
    /// Probe errors are always retried through hysteresis.
    pub fn is_transient(&self) -> bool {
        true
    }
}
