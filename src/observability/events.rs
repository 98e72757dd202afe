//! Log event catalogue
//!
//! Every log line the orchestrator emits names one of these events.

use std::fmt;

use super::logger::Severity;

/// Observable events in the failover control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Process lifecycle
    /// Orchestrator startup begins
    BootStart,
    /// Configuration loaded and validated
    ConfigLoaded,
    /// All control-loop tasks spawned
    Serving,
    /// Shutdown initiated
    ShutdownStart,
    /// Shutdown complete
    ShutdownComplete,

    // Leadership
    /// Lease acquired, this instance may act
    LeaseAcquired,
    /// Lease renewal failed or expired
    LeaseLost,
    /// Signal ignored because this instance is not the leader
    NotLeader,

    // Health and lag
    /// A liveness probe failed
    ProbeFailed,
    /// A region's debounced verdict changed
    HealthChanged,
    /// Replication lag could not be read
    LagUnavailable,
    /// Secondary lag crossed the threshold
    LagDegraded,
    /// Secondary lag back under the threshold
    LagRecovered,

    // Decision engine
    /// Engine state transition
    StateTransition,
    /// A failover episode was opened
    EpisodeOpened,
    /// Failover blocked (lag, target health, fencing)
    FailoverBlocked,
    /// Failover aborted before any irreversible step
    EpisodeAborted,
    /// Operator command rejected in the current state
    CommandRejected,
    /// Engine state restored from the episode journal
    StateRestored,
    /// Journal unreadable on leadership; engine frozen
    RestoreFailed,
    /// A signal could not be applied
    SignalFailed,

    // Promotion
    /// Promotion sequence started
    FailoverBegin,
    /// Old primary fenced
    PrimaryFenced,
    /// Fencing the old primary failed
    FencingFailed,
    /// Promotion call acknowledged
    PromotionIssued,
    /// Secondary reports writer-capable
    PromotionComplete,
    /// Promotion failed, manual intervention required
    PromotionFailed,

    // Traffic
    /// Routing record updated
    DnsUpdated,
    /// Routing update failed, will retry
    DnsRetry,

    // Recovery
    /// Former primary re-provisioning started
    RecoveryBegin,
    /// Former primary caught up, cluster healthy again
    RecoveryComplete,

    // Credentials
    /// Credential rotation started
    RotationBegin,
    /// Credential rotation completed
    RotationComplete,
    /// Credential rotation deferred by a failover
    RotationDeferred,
    /// Credential rotation rolled back
    RotationRolledBack,
    /// Superseded credential retired
    CredentialRetired,

    // Plumbing
    /// An alert could not be delivered
    NotifyFailed,
    /// Episode journal append failed
    JournalFailed,
    /// Torn tail cut from the journal on open
    JournalTruncated,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::BootStart => "DRORCH_STARTUP_BEGIN",
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::Serving => "DRORCH_SERVING",
            Event::ShutdownStart => "SHUTDOWN_START",
            Event::ShutdownComplete => "SHUTDOWN_COMPLETE",

            Event::LeaseAcquired => "LEASE_ACQUIRED",
            Event::LeaseLost => "LEASE_LOST",
            Event::NotLeader => "NOT_LEADER",

            Event::ProbeFailed => "PROBE_FAILED",
            Event::HealthChanged => "HEALTH_CHANGED",
            Event::LagUnavailable => "LAG_UNAVAILABLE",
            Event::LagDegraded => "LAG_DEGRADED",
            Event::LagRecovered => "LAG_RECOVERED",

            Event::StateTransition => "STATE_TRANSITION",
            Event::EpisodeOpened => "EPISODE_OPENED",
            Event::FailoverBlocked => "FAILOVER_BLOCKED",
            Event::EpisodeAborted => "EPISODE_ABORTED",
            Event::CommandRejected => "COMMAND_REJECTED",
            Event::StateRestored => "STATE_RESTORED",
            Event::RestoreFailed => "RESTORE_FAILED",
            Event::SignalFailed => "SIGNAL_FAILED",

            Event::FailoverBegin => "FAILOVER_BEGIN",
            Event::PrimaryFenced => "PRIMARY_FENCED",
            Event::FencingFailed => "FENCING_FAILED",
            Event::PromotionIssued => "PROMOTION_ISSUED",
            Event::PromotionComplete => "PROMOTION_COMPLETE",
            Event::PromotionFailed => "PROMOTION_FAILED",

            Event::DnsUpdated => "DNS_UPDATED",
            Event::DnsRetry => "DNS_RETRY",

            Event::RecoveryBegin => "RECOVERY_BEGIN",
            Event::RecoveryComplete => "RECOVERY_COMPLETE",

            Event::RotationBegin => "ROTATION_BEGIN",
            Event::RotationComplete => "ROTATION_COMPLETE",
            Event::RotationDeferred => "ROTATION_DEFERRED",
            Event::RotationRolledBack => "ROTATION_ROLLED_BACK",
            Event::CredentialRetired => "CREDENTIAL_RETIRED",

            Event::NotifyFailed => "NOTIFY_FAILED",
            Event::JournalFailed => "JOURNAL_FAILED",
            Event::JournalTruncated => "JOURNAL_TRUNCATED",
        }
    }

    /// Default severity for this event
    pub fn severity(&self) -> Severity {
        match self {
            Event::ProbeFailed => Severity::Trace,
            Event::LeaseLost
            | Event::NotLeader
            | Event::LagUnavailable
            | Event::LagDegraded
            | Event::FailoverBlocked
            | Event::EpisodeAborted
            | Event::CommandRejected
            | Event::SignalFailed
            | Event::DnsRetry
            | Event::RotationDeferred
            | Event::RotationRolledBack
            | Event::NotifyFailed
            | Event::JournalTruncated => Severity::Warn,
            Event::FencingFailed
            | Event::PromotionFailed
            | Event::JournalFailed
            | Event::RestoreFailed => Severity::Error,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
