//! Region records

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable region identifier (e.g. `eu-west-1`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionId(String);

impl RegionId {
    /// Create a region id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RegionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for RegionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Write authority of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegionRole {
    /// Accepts writes
    Primary,
    /// Replicates from the primary
    Secondary,
}

impl RegionRole {
    /// Returns the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            RegionRole::Primary => "PRIMARY",
            RegionRole::Secondary => "SECONDARY",
        }
    }
}

impl fmt::Display for RegionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Debounced liveness verdict of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthVerdict {
    /// Serving
    Healthy,
    /// Failed N consecutive probes
    Unhealthy,
}

impl HealthVerdict {
    /// Returns the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthVerdict::Healthy => "HEALTHY",
            HealthVerdict::Unhealthy => "UNHEALTHY",
        }
    }
}

impl fmt::Display for HealthVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A region as the orchestrator sees it.
///
/// `role` and `fenced` are only changed by the decision engine; the health
/// fields are only changed by the health monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionRecord {
    /// Region identifier
    pub region_id: RegionId,
    /// Current write authority
    pub role: RegionRole,
    /// Client-facing service endpoint (`host:port`)
    pub endpoint: String,
    /// Database cluster identifier in this region
    pub cluster_id: String,
    /// Last debounced verdict
    pub last_health_state: HealthVerdict,
    /// Time of the last probe
    pub last_checked_at: Option<DateTime<Utc>>,
    /// Write capability revoked
    pub fenced: bool,
}

impl RegionRecord {
    /// Seed a record at deployment time.
    pub fn new(
        region_id: impl Into<RegionId>,
        role: RegionRole,
        endpoint: impl Into<String>,
        cluster_id: impl Into<String>,
    ) -> Self {
        Self {
            region_id: region_id.into(),
            role,
            endpoint: endpoint.into(),
            cluster_id: cluster_id.into(),
            last_health_state: HealthVerdict::Healthy,
            last_checked_at: None,
            fenced: false,
        }
    }

    /// Whether this region currently holds write authority.
    pub fn is_primary(&self) -> bool {
        self.role == RegionRole::Primary
    }
}
