//! Simulated database control plane

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::lag::{LagError, LagResult, LagSource};
use crate::promotion::{
    ClusterControl, ClusterDescription, ClusterError, ClusterResult, ClusterRole, PromotionAck,
};
use crate::region::RegionRecord;

#[derive(Debug, Clone)]
struct SimClusterState {
    role: ClusterRole,
    lag: Duration,
    read_only: bool,
    promote_requested_at: Option<Instant>,
    promotes: u32,
    fence_fails: bool,
    promote_stalls: bool,
    promote_delay: Duration,
    lag_unavailable: bool,
    reprovision_fails: bool,
}

/// In-memory clusters implementing [`ClusterControl`] and [`LagSource`].
///
/// Fencing a writer drains every reader's lag to zero unless disabled with
/// [`SimCluster::set_drain_on_fence`].
#[derive(Debug)]
pub struct SimCluster {
    clusters: Mutex<BTreeMap<String, SimClusterState>>,
    calls: Mutex<Vec<String>>,
    drain_on_fence: AtomicBool,
    rebuild_lag: Mutex<Duration>,
}

impl Default for SimCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl SimCluster {
    pub fn new() -> Self {
        Self {
            clusters: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
            drain_on_fence: AtomicBool::new(true),
            rebuild_lag: Mutex::new(Duration::ZERO),
        }
    }

    /// Seed one cluster for each region record.
    pub fn from_regions(regions: &[RegionRecord]) -> Self {
        let sim = Self::new();
        for region in regions {
            let role = if region.is_primary() {
                ClusterRole::Writer
            } else {
                ClusterRole::Reader
            };
            sim.add_cluster(&region.cluster_id, role, Duration::ZERO);
        }
        sim
    }

    pub fn add_cluster(&self, cluster_id: &str, role: ClusterRole, lag: Duration) {
        self.with_clusters(|clusters| {
            clusters.insert(
                cluster_id.to_string(),
                SimClusterState {
                    role,
                    lag,
                    read_only: false,
                    promote_requested_at: None,
                    promotes: 0,
                    fence_fails: false,
                    promote_stalls: false,
                    promote_delay: Duration::ZERO,
                    lag_unavailable: false,
                    reprovision_fails: false,
                },
            );
        });
    }

    pub fn set_lag(&self, cluster_id: &str, lag: Duration) {
        self.update(cluster_id, |c| c.lag = lag);
    }

    pub fn set_lag_unavailable(&self, cluster_id: &str, unavailable: bool) {
        self.update(cluster_id, |c| c.lag_unavailable = unavailable);
    }

    pub fn set_fence_failure(&self, cluster_id: &str, fails: bool) {
        self.update(cluster_id, |c| c.fence_fails = fails);
    }

    /// Accept promote but never become writer-capable.
    pub fn set_promote_stalls(&self, cluster_id: &str, stalls: bool) {
        self.update(cluster_id, |c| c.promote_stalls = stalls);
    }

    /// Time between an accepted promote and writer-capable.
    pub fn set_promote_delay(&self, cluster_id: &str, delay: Duration) {
        self.update(cluster_id, |c| c.promote_delay = delay);
    }

    pub fn set_reprovision_failure(&self, cluster_id: &str, fails: bool) {
        self.update(cluster_id, |c| c.reprovision_fails = fails);
    }

    pub fn set_drain_on_fence(&self, drain: bool) {
        self.drain_on_fence.store(drain, Ordering::SeqCst);
    }

    /// Lag a rebuilt replica starts with.
    pub fn set_rebuild_lag(&self, lag: Duration) {
        if let Ok(mut rebuild_lag) = self.rebuild_lag.lock() {
            *rebuild_lag = lag;
        }
    }

    /// Every control-plane call as `operation:cluster`, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn promote_count(&self, cluster_id: &str) -> u32 {
        self.read(cluster_id, |c| c.promotes).unwrap_or(0)
    }

    pub fn is_fenced(&self, cluster_id: &str) -> bool {
        self.read(cluster_id, |c| c.read_only).unwrap_or(false)
    }

    pub fn role(&self, cluster_id: &str) -> Option<ClusterRole> {
        self.read(cluster_id, |c| c.role)
    }

    /// Clusters currently accepting writes.
    pub fn writers(&self) -> Vec<String> {
        self.with_clusters(|clusters| {
            clusters
                .iter()
                .filter(|(_, c)| c.role == ClusterRole::Writer && !c.read_only)
                .map(|(id, _)| id.clone())
                .collect()
        })
    }

    fn record_call(&self, operation: &str, cluster_id: &str) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(format!("{}:{}", operation, cluster_id));
        }
    }

    fn with_clusters<T>(&self, f: impl FnOnce(&mut BTreeMap<String, SimClusterState>) -> T) -> T {
        let mut guard = match self.clusters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    fn update(&self, cluster_id: &str, f: impl FnOnce(&mut SimClusterState)) {
        self.with_clusters(|clusters| {
            if let Some(cluster) = clusters.get_mut(cluster_id) {
                f(cluster);
            }
        });
    }

    fn read<T>(&self, cluster_id: &str, f: impl FnOnce(&SimClusterState) -> T) -> Option<T> {
        self.with_clusters(|clusters| clusters.get(cluster_id).map(f))
    }
}

fn unknown(cluster_id: &str) -> ClusterError {
    ClusterError::UnknownCluster(cluster_id.to_string())
}

#[async_trait]
impl ClusterControl for SimCluster {
    async fn fence(&self, cluster_id: &str) -> ClusterResult<()> {
        self.record_call("fence", cluster_id);
        let drain = self.drain_on_fence.load(Ordering::SeqCst);

        self.with_clusters(|clusters| {
            let cluster = clusters.get_mut(cluster_id).ok_or_else(|| unknown(cluster_id))?;
            if cluster.fence_fails {
                return Err(ClusterError::Unavailable {
                    cluster: cluster_id.to_string(),
                    reason: "modify-cluster request failed".into(),
                });
            }
            cluster.read_only = true;

            if drain {
                for other in clusters.values_mut() {
                    if other.role == ClusterRole::Reader {
                        other.lag = Duration::ZERO;
                    }
                }
            }
            Ok(())
        })
    }

    async fn promote(&self, cluster_id: &str) -> ClusterResult<PromotionAck> {
        self.record_call("promote", cluster_id);

        self.with_clusters(|clusters| {
            let cluster = clusters.get_mut(cluster_id).ok_or_else(|| unknown(cluster_id))?;
            cluster.promotes += 1;
            if cluster.role != ClusterRole::Reader {
                return Err(ClusterError::Rejected {
                    cluster: cluster_id.to_string(),
                    operation: "promote".into(),
                    reason: format!("cluster is {}", cluster.role),
                });
            }
            cluster.role = ClusterRole::Promoting;
            cluster.promote_requested_at = Some(Instant::now());
            Ok(PromotionAck {
                cluster_id: cluster_id.to_string(),
                request_id: format!("promote-{}-{}", cluster_id, cluster.promotes),
            })
        })
    }

    async fn describe(&self, cluster_id: &str) -> ClusterResult<ClusterDescription> {
        self.record_call("describe", cluster_id);

        self.with_clusters(|clusters| {
            let cluster = clusters.get_mut(cluster_id).ok_or_else(|| unknown(cluster_id))?;
            if cluster.role == ClusterRole::Promoting && !cluster.promote_stalls {
                let ready = cluster
                    .promote_requested_at
                    .map(|at| at.elapsed() >= cluster.promote_delay)
                    .unwrap_or(false);
                if ready {
                    cluster.role = ClusterRole::Writer;
                    cluster.read_only = false;
                    cluster.lag = Duration::ZERO;
                }
            }

            Ok(ClusterDescription {
                cluster_id: cluster_id.to_string(),
                role: cluster.role,
                lag: match cluster.role {
                    ClusterRole::Writer => None,
                    _ if cluster.lag_unavailable => None,
                    _ => Some(cluster.lag),
                },
                read_only: cluster.read_only,
            })
        })
    }

    async fn reprovision_as_replica(
        &self,
        cluster_id: &str,
        source_cluster_id: &str,
    ) -> ClusterResult<()> {
        self.record_call("reprovision", cluster_id);
        let rebuild_lag = self.rebuild_lag.lock().map(|l| *l).unwrap_or_default();

        self.with_clusters(|clusters| {
            if !clusters.contains_key(source_cluster_id) {
                return Err(unknown(source_cluster_id));
            }
            let cluster = clusters.get_mut(cluster_id).ok_or_else(|| unknown(cluster_id))?;
            if cluster.reprovision_fails {
                return Err(ClusterError::Unavailable {
                    cluster: cluster_id.to_string(),
                    reason: "snapshot restore failed".into(),
                });
            }
            cluster.role = ClusterRole::Reader;
            cluster.read_only = false;
            cluster.promote_requested_at = None;
            cluster.lag = rebuild_lag;
            Ok(())
        })
    }
}

#[async_trait]
impl LagSource for SimCluster {
    async fn replication_lag(&self, region: &RegionRecord) -> LagResult<Duration> {
        let state = self.read(&region.cluster_id, |c| (c.lag_unavailable, c.lag));
        match state {
            Some((false, lag)) => Ok(lag),
            Some((true, _)) => Err(LagError::Unavailable {
                region: region.region_id.to_string(),
                reason: "replica status not reported".into(),
            }),
            None => Err(LagError::Unavailable {
                region: region.region_id.to_string(),
                reason: format!("unknown cluster {}", region.cluster_id),
            }),
        }
    }
}
