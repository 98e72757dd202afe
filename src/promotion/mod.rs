//! Database promotion
//!
//! Promotion is the one non-idempotent step of a failover. It is keyed by
//! episode id, fences the old primary before touching the secondary, and
//! is bounded by an overall deadline.

mod cluster;
mod coordinator;
mod errors;

pub use cluster::{
    ClusterControl, ClusterDescription, ClusterError, ClusterResult, ClusterRole, PromotionAck,
};
pub use coordinator::{CancelFlag, PromotionCoordinator, PromotionReport, PromotionSettings};
pub use errors::{PromotionError, PromotionResult};
