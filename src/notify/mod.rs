//! Operator notifications
//!
//! Delivery is best effort: a failed publish is logged and counted, and
//! never alters the decision engine's state.

mod errors;
mod event;
mod sinks;

use async_trait::async_trait;

use crate::observability::{Event, Logger, MetricsRegistry};

pub use errors::{NotifyError, NotifyResult};
pub use event::{AlertSeverity, EventKind, LifecycleEvent};
pub use sinks::{FanoutNotifier, FileNotifier, LogNotifier, MemoryNotifier};

/// Alert sink.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, event: &LifecycleEvent) -> NotifyResult<()>;
}

/// Publish, logging and counting any failure instead of returning it.
pub async fn deliver(notifier: &dyn Notifier, metrics: &MetricsRegistry, event: LifecycleEvent) {
    if let Err(e) = notifier.publish(&event).await {
        metrics.increment_notifications_failed();
        Logger::event(
            Event::NotifyFailed,
            &[
                ("alert_id", &event.id.to_string()),
                ("kind", event.kind.as_str()),
                ("error", &e.to_string()),
            ],
        );
    }
}
