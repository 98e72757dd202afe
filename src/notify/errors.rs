//! Notifier errors

use thiserror::Error;

/// Result type for notification delivery
pub type NotifyResult<T> = Result<T, NotifyError>;

/// Alert delivery failures. Never change engine state.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Writing to the sink failed
    #[error("notification sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A sink rejected the event
    #[error("notification sink '{sink}' rejected event: {reason}")]
    Rejected { sink: String, reason: String },

    /// Some fan-out targets failed
    #[error("{failed} of {total} notification sinks failed")]
    Partial { failed: usize, total: usize },
}
