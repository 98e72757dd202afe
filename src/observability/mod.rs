//! Observability subsystem
//!
//! - Structured logging (one JSON object per line)
//! - Typed event catalogue
//! - Monotonic counters
//!
//! Observability is read-only with respect to the control loop: a failed
//! log write or a dropped metric never changes a failover decision.
//!
//! ```ignore
//! use dr_orchestrator::observability::{Event, Logger, MetricsRegistry};
//!
//! Logger::event(Event::HealthChanged, &[("region", "eu-west-1"), ("verdict", "UNHEALTHY")]);
//!
//! let metrics = MetricsRegistry::new();
//! metrics.increment_probes_sent();
//! ```

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
