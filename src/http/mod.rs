//! HTTP surface
//!
//! - `GET /health`, `GET /status`, `GET /metrics` are read-only
//! - `POST /operator/{rebalance,retry,resolve}` queue operator commands on
//!   the engine's signal channel and return `202 Accepted`

mod routes;
mod server;

pub use routes::{routes, HttpState};
pub use server::serve;
