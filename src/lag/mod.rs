//! Replication lag tracking
//!
//! Lag at or above the threshold, or an unreadable replica, is degraded.
//! A verdict changes only after K consecutive samples agree; until then it
//! is UNKNOWN, which never permits promotion.

mod errors;
mod tracker;
mod window;

pub use errors::{LagError, LagResult};
pub use tracker::{LagSettings, LagSource, LagTracker};
pub use window::{LagSample, LagVerdict, LagWindow};
