//! Lifecycle events published to the alert sink

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    EpisodeOpened,
    FailoverBlocked,
    /// Repeated alert while BLOCKED past the escalation interval
    BlockEscalated,
    FailoverStarted,
    PrimaryFenced,
    PromotionSucceeded,
    DnsCutover,
    /// DNS retries exhausted; still retrying on every tick
    DnsDegraded,
    FailedOver,
    /// Manual intervention required; emitted once per episode
    FailoverFailed,
    FencingFailed,
    EpisodeAborted,
    RecoveryStarted,
    RecoveryStalled,
    RecoveryCompleted,
    ManualResolution,
    RotationCompleted,
    RotationDeferred,
    RotationRolledBack,
    LeadershipAcquired,
    LeadershipLost,
    /// Journal unreadable on leadership; engine frozen until resolved
    RestoreFailed,
}

impl EventKind {
    /// Returns the kind name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::EpisodeOpened => "EPISODE_OPENED",
            EventKind::FailoverBlocked => "FAILOVER_BLOCKED",
            EventKind::BlockEscalated => "BLOCK_ESCALATED",
            EventKind::FailoverStarted => "FAILOVER_STARTED",
            EventKind::PrimaryFenced => "PRIMARY_FENCED",
            EventKind::PromotionSucceeded => "PROMOTION_SUCCEEDED",
            EventKind::DnsCutover => "DNS_CUTOVER",
            EventKind::DnsDegraded => "DNS_DEGRADED",
            EventKind::FailedOver => "FAILED_OVER",
            EventKind::FailoverFailed => "FAILOVER_FAILED",
            EventKind::FencingFailed => "FENCING_FAILED",
            EventKind::EpisodeAborted => "EPISODE_ABORTED",
            EventKind::RecoveryStarted => "RECOVERY_STARTED",
            EventKind::RecoveryStalled => "RECOVERY_STALLED",
            EventKind::RecoveryCompleted => "RECOVERY_COMPLETED",
            EventKind::ManualResolution => "MANUAL_RESOLUTION",
            EventKind::RotationCompleted => "ROTATION_COMPLETED",
            EventKind::RotationDeferred => "ROTATION_DEFERRED",
            EventKind::RotationRolledBack => "ROTATION_ROLLED_BACK",
            EventKind::LeadershipAcquired => "LEADERSHIP_ACQUIRED",
            EventKind::LeadershipLost => "LEADERSHIP_LOST",
            EventKind::RestoreFailed => "RESTORE_FAILED",
        }
    }

    /// Default alert severity for this kind.
    pub fn default_severity(&self) -> AlertSeverity {
        match self {
            EventKind::FailoverFailed
            | EventKind::RestoreFailed
            | EventKind::FencingFailed
            | EventKind::BlockEscalated
            | EventKind::LeadershipLost => AlertSeverity::Critical,
            EventKind::FailoverBlocked
            | EventKind::DnsDegraded
            | EventKind::EpisodeOpened
            | EventKind::RecoveryStalled
            | EventKind::RotationRolledBack
            | EventKind::FailoverStarted => AlertSeverity::Warning,
            _ => AlertSeverity::Info,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How urgently an operator should look.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "INFO",
            AlertSeverity::Warning => "WARNING",
            AlertSeverity::Critical => "CRITICAL",
        }
    }
}

/// One structured notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub severity: AlertSeverity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode_id: Option<Uuid>,
    pub message: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl LifecycleEvent {
    /// Create an event at the kind's default severity.
    pub fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
            severity: kind.default_severity(),
            episode_id: None,
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Attach the episode this event belongs to.
    pub fn with_episode(mut self, episode_id: Uuid) -> Self {
        self.episode_id = Some(episode_id);
        self
    }

    /// Override the severity.
    pub fn with_severity(mut self, severity: AlertSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Add a context field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.fields.insert(key.into(), value.to_string());
        self
    }

    /// Serialize to one JSON line.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"id":"{}","kind":"{}"}}"#, self.id, self.kind)
        })
    }
}
