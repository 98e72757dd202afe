//! Signals consumed by the decision engine
//!
//! Monitors, the ticker and operator endpoints all feed one ordered channel;
//! the engine handles one signal at a time, so a lag sample enqueued before
//! a health transition is always visible when that transition is decided.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::region::{HealthVerdict, RegionId};

/// Sender half of the engine's signal channel
pub type SignalSender = mpsc::Sender<Signal>;

/// Receiver half of the engine's signal channel
pub type SignalReceiver = mpsc::Receiver<Signal>;

/// Create the engine's bounded signal channel.
pub fn signal_channel(capacity: usize) -> (SignalSender, SignalReceiver) {
    mpsc::channel(capacity.max(1))
}

/// Explicit operator requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    /// FAILED_OVER → RECOVERING once the former primary is healthy again
    RebalanceRequested,
    /// Re-evaluate a failover that was aborted before any irreversible step
    RetryFailover,
    /// Unfreeze FAILOVER_FAILED after manual repair, declaring the primary
    ResolveManually { primary: RegionId },
}

impl OperatorCommand {
    /// Returns the command name
    pub fn name(&self) -> &'static str {
        match self {
            OperatorCommand::RebalanceRequested => "rebalance",
            OperatorCommand::RetryFailover => "retry_failover",
            OperatorCommand::ResolveManually { .. } => "resolve_manually",
        }
    }
}

/// Input to the decision engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// A region's debounced verdict changed
    HealthChanged {
        region_id: RegionId,
        verdict: HealthVerdict,
        at: DateTime<Utc>,
    },
    /// Secondary lag at or above the threshold for K samples (`None` = unreadable)
    LagDegraded {
        region_id: RegionId,
        lag_ms: Option<u64>,
        at: DateTime<Utc>,
    },
    /// Secondary lag below the threshold for K samples
    LagRecovered {
        region_id: RegionId,
        lag_ms: u64,
        at: DateTime<Utc>,
    },
    /// Periodic wake-up for escalation and deferred retries
    Tick { at: DateTime<Utc> },
    /// Operator request
    Operator(OperatorCommand),
}

impl Signal {
    /// Signal name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Signal::HealthChanged { .. } => "HealthChanged",
            Signal::LagDegraded { .. } => "LagDegraded",
            Signal::LagRecovered { .. } => "LagRecovered",
            Signal::Tick { .. } => "Tick",
            Signal::Operator(_) => "Operator",
        }
    }

    /// Convenience constructor stamped with the current time.
    pub fn health(region_id: impl Into<RegionId>, verdict: HealthVerdict) -> Self {
        Signal::HealthChanged {
            region_id: region_id.into(),
            verdict,
            at: Utc::now(),
        }
    }

    /// Convenience constructor stamped with the current time.
    pub fn tick() -> Self {
        Signal::Tick { at: Utc::now() }
    }
}
