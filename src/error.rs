//! Crate-level error type
//!
//! Each subsystem keeps its own error enum. `OrchestratorError` wraps them
//! at the process boundary and classifies each one:
//!
//! - TRANSIENT: retried locally, never changes a decision on its own
//! - BLOCKING: the current action is refused, the loop keeps running
//! - OPERATOR: an alert has been raised and a human must act
//! - FATAL: the process cannot continue

use std::fmt;

use thiserror::Error;

use crate::config::ConfigError;
use crate::engine::{EngineError, JournalError, LeaseError};
use crate::health::ProbeError;
use crate::lag::LagError;
use crate::notify::NotifyError;
use crate::promotion::PromotionError;
use crate::region::RegionError;
use crate::rotation::RotationError;
use crate::traffic::DnsError;

/// Error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Blocking,
    Operator,
    Fatal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transient => "TRANSIENT",
            ErrorKind::Blocking => "BLOCKING",
            ErrorKind::Operator => "OPERATOR",
            ErrorKind::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result type at the process boundary
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Lag(#[from] LagError),

    #[error(transparent)]
    Promotion(#[from] PromotionError),

    #[error(transparent)]
    Dns(#[from] DnsError),

    #[error(transparent)]
    Rotation(#[from] RotationError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Lease(#[from] LeaseError),

    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error(transparent)]
    Notify(#[from] NotifyError),

    #[error(transparent)]
    Region(#[from] RegionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::Config(_) => ErrorKind::Fatal,
            OrchestratorError::Io(_) => ErrorKind::Fatal,
            OrchestratorError::Journal(_) => ErrorKind::Fatal,
            OrchestratorError::Probe(_) | OrchestratorError::Lag(_) => ErrorKind::Transient,
            OrchestratorError::Notify(_) => ErrorKind::Transient,
            OrchestratorError::Dns(DnsError::UpdateFailed { .. }) => ErrorKind::Transient,
            OrchestratorError::Dns(DnsError::Exhausted { .. }) => ErrorKind::Blocking,
            OrchestratorError::Promotion(e) if e.requires_operator() => ErrorKind::Operator,
            OrchestratorError::Promotion(_) => ErrorKind::Blocking,
            OrchestratorError::Rotation(_) => ErrorKind::Blocking,
            OrchestratorError::Lease(_) => ErrorKind::Blocking,
            OrchestratorError::Region(RegionError::SplitBrain { .. }) => ErrorKind::Fatal,
            OrchestratorError::Region(_) => ErrorKind::Blocking,
            OrchestratorError::Engine(EngineError::Journal(_)) => ErrorKind::Fatal,
            OrchestratorError::Engine(EngineError::Region(RegionError::SplitBrain { .. })) => {
                ErrorKind::Fatal
            }
            OrchestratorError::Engine(_) => ErrorKind::Blocking,
        }
    }

    /// Stable error code for CLI and HTTP output.
    pub fn code(&self) -> &'static str {
        match self {
            OrchestratorError::Config(_) => "DRORCH_CONFIG_ERROR",
            OrchestratorError::Probe(_) => "DRORCH_PROBE_FAILED",
            OrchestratorError::Lag(_) => "DRORCH_LAG_UNAVAILABLE",
            OrchestratorError::Promotion(PromotionError::PromotionTimeout { .. }) => {
                "DRORCH_PROMOTION_TIMEOUT"
            }
            OrchestratorError::Promotion(PromotionError::FencingFailed { .. }) => {
                "DRORCH_FENCING_FAILED"
            }
            OrchestratorError::Promotion(_) => "DRORCH_PROMOTION_FAILED",
            OrchestratorError::Dns(_) => "DRORCH_DNS_UPDATE_FAILED",
            OrchestratorError::Rotation(_) => "DRORCH_ROTATION_CONFLICT",
            OrchestratorError::Engine(EngineError::ForbiddenTransition { .. }) => {
                "DRORCH_FORBIDDEN_TRANSITION"
            }
            OrchestratorError::Engine(EngineError::Lease(_)) | OrchestratorError::Lease(_) => {
                "DRORCH_NOT_LEADER"
            }
            OrchestratorError::Engine(_) => "DRORCH_ENGINE_ERROR",
            OrchestratorError::Journal(_) => "DRORCH_JOURNAL_ERROR",
            OrchestratorError::Notify(_) => "DRORCH_NOTIFY_FAILED",
            OrchestratorError::Region(_) => "DRORCH_TOPOLOGY_ERROR",
            OrchestratorError::Io(_) => "DRORCH_IO_ERROR",
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_classification() {
        let timeout: OrchestratorError = PromotionError::PromotionTimeout {
            cluster: "c-usw2".into(),
            elapsed: Duration::from_secs(300),
        }
        .into();
        assert_eq!(timeout.kind(), ErrorKind::Operator);
        assert_eq!(timeout.code(), "DRORCH_PROMOTION_TIMEOUT");

        let lag: OrchestratorError = LagError::Unavailable {
            region: "usw2".into(),
            reason: "throttled".into(),
        }
        .into();
        assert_eq!(lag.kind(), ErrorKind::Transient);

        let not_leader: OrchestratorError = EngineError::from(LeaseError::NotLeader).into();
        assert_eq!(not_leader.kind(), ErrorKind::Blocking);
        assert_eq!(not_leader.code(), "DRORCH_NOT_LEADER");

        let split: OrchestratorError = RegionError::SplitBrain { primaries: 2 }.into();
        assert!(split.is_fatal());
    }

    #[test]
    fn test_config_error_is_fatal() {
        let err: OrchestratorError = ConfigError::Invalid("no regions".into()).into();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("no regions"));
    }
}
