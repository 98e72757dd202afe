//! Database cluster control plane

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for control-plane calls
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Control-plane call failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClusterError {
    /// Cluster id not known to the control plane
    #[error("unknown cluster: {0}")]
    UnknownCluster(String),

    /// Control plane unreachable or throttled
    #[error("control plane unavailable for {cluster}: {reason}")]
    Unavailable { cluster: String, reason: String },

    /// Operation refused in the cluster's current state
    #[error("cluster {cluster} rejected {operation}: {reason}")]
    Rejected {
        cluster: String,
        operation: String,
        reason: String,
    },
}

/// Role reported by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterRole {
    /// Accepts writes
    Writer,
    /// Read replica
    Reader,
    /// Promotion accepted, not yet writer-capable
    Promoting,
    Unknown,
}

impl ClusterRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterRole::Writer => "WRITER",
            ClusterRole::Reader => "READER",
            ClusterRole::Promoting => "PROMOTING",
            ClusterRole::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ClusterRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current state of a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterDescription {
    pub cluster_id: String,
    pub role: ClusterRole,
    /// Replication lag behind its source; `None` for writers or if unreported
    pub lag: Option<Duration>,
    /// Writes refused (fenced)
    pub read_only: bool,
}

impl ClusterDescription {
    /// Promotion finished.
    pub fn is_writer_capable(&self) -> bool {
        self.role == ClusterRole::Writer && !self.read_only
    }
}

/// Acknowledgement of an accepted promote request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotionAck {
    pub cluster_id: String,
    pub request_id: String,
}

/// Operations on a regional database cluster.
#[async_trait]
pub trait ClusterControl: Send + Sync {
    /// Revoke write capability (mark read-only).
    async fn fence(&self, cluster_id: &str) -> ClusterResult<()>;

    /// Ask a replica to become a standalone writer.
    async fn promote(&self, cluster_id: &str) -> ClusterResult<PromotionAck>;

    async fn describe(&self, cluster_id: &str) -> ClusterResult<ClusterDescription>;

    /// Rebuild `cluster_id` as a replica of `source_cluster_id`.
    async fn reprovision_as_replica(
        &self,
        cluster_id: &str,
        source_cluster_id: &str,
    ) -> ClusterResult<()>;
}
