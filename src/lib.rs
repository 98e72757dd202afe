//! dr-orchestrator - multi-region disaster-recovery failover orchestrator
//!
//! Watches one primary database region and its secondaries. When the
//! primary fails it promotes the healthiest secondary whose replication lag
//! is within bound, fences the old primary first, repoints the routing
//! record, and records every step in an append-only episode journal.
//!
//! One instance acts at a time: every state-changing step runs on the
//! single engine task and requires the leader lease.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod http;
pub mod lag;
pub mod notify;
pub mod observability;
pub mod orchestrator;
pub mod promotion;
pub mod region;
pub mod rotation;
pub mod signal;
pub mod sim;
pub mod status;
pub mod traffic;

pub use config::OrchestratorConfig;
pub use error::{ErrorKind, OrchestratorError, OrchestratorResult};
pub use orchestrator::{Backends, Orchestrator};
