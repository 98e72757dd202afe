//! Client traffic routing
//!
//! The cut-over call takes a `PromotionReport`, which only the promotion
//! coordinator can produce, so routing can never move ahead of a confirmed
//! promotion.

mod controller;
mod errors;
mod retry;

pub use controller::{CutoverReceipt, RoutingApi, TrafficController, TrafficSettings};
pub use errors::{DnsError, DnsResult};
pub use retry::RetryPolicy;
