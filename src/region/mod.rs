//! Region records and the registry that holds them.
//!
//! Exactly one region holds PRIMARY at any committed point in time. The
//! registry rejects any seed or mutation that would break that; only the
//! decision engine may change roles.

mod errors;
mod record;
mod registry;

pub use errors::{RegionError, RegionResult};
pub use record::{HealthVerdict, RegionId, RegionRecord, RegionRole};
pub use registry::RegionRegistry;
