//! In-process simulated backends
//!
//! Stand-ins for the cloud control planes, used by drills (`drorch run`
//! wires them in) and by tests. Every fake records the calls it received.

mod cluster;
mod probe;
mod routing;
mod secrets;

pub use cluster::SimCluster;
pub use probe::SimProbe;
pub use routing::SimRouting;
pub use secrets::{SimSecretStore, SimVerifier};
