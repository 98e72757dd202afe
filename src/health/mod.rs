//! Region liveness
//!
//! Probes feed a per-region hysteresis counter; only debounced verdict
//! changes reach the decision engine. Probe failures never trigger a
//! failover on their own.

mod errors;
mod hysteresis;
mod monitor;
mod probe;

pub use errors::{ProbeError, ProbeResult};
pub use hysteresis::HysteresisCounter;
pub use monitor::{
    HealthHistory, HealthMonitor, HealthObservation, HealthSettings, RegionWatcher,
    DEFAULT_HISTORY_SIZE,
};
pub use probe::{build_probe, HttpProbe, LivenessProbe, ProbeKind, TcpProbe};
