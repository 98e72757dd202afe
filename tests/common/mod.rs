//! Drill harness
//!
//! Runs a full orchestrator against the simulated control planes with short
//! intervals. Tests drive it by flipping probe and lag knobs and sleeping
//! under paused tokio time.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use dr_orchestrator::engine::{MemoryJournal, MemoryLeaderLock};
use dr_orchestrator::notify::MemoryNotifier;
use dr_orchestrator::observability::MetricsRegistry;
use dr_orchestrator::region::RegionRegistry;
use dr_orchestrator::rotation::ChangeGate;
use dr_orchestrator::signal::SignalSender;
use dr_orchestrator::sim::{SimCluster, SimProbe, SimRouting, SimSecretStore, SimVerifier};
use dr_orchestrator::status::StatusBoard;
use dr_orchestrator::{Backends, Orchestrator, OrchestratorConfig, OrchestratorResult};
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const RECORD: &str = "db.example.com";
pub const USE1: &str = "db.use1.internal:5432";
pub const USW2: &str = "db.usw2.internal:5432";
pub const EUW1: &str = "db.euw1.internal:5432";

/// Two regions, one-second probes and lag polls, no HTTP, no rotation.
///
/// Promotion accepts up to 100ms of staleness and fencing does not drain
/// the replicas, so the reported final lag is the lag the secondary had.
pub fn drill_config() -> Value {
    json!({
        "node_id": "drill-a",
        "regions": [
            {"region_id": "use1", "role": "PRIMARY", "endpoint": USE1, "cluster_id": "c-use1"},
            {"region_id": "usw2", "role": "SECONDARY", "endpoint": USW2, "cluster_id": "c-usw2"}
        ],
        "health": {"probe_interval_secs": 1, "probe_timeout_ms": 200},
        "lag": {"poll_interval_secs": 1},
        "promotion": {"max_staleness_ms": 100},
        "dns": {"record_name": RECORD},
        "engine": {"tick_interval_secs": 1},
        "rotation": {"enabled": false},
        "http": {"enabled": false}
    })
}

/// Simulated world shared by one or more orchestrators.
pub struct Drill {
    pub config: OrchestratorConfig,
    pub cluster: Arc<SimCluster>,
    pub routing: Arc<SimRouting>,
    pub probe: Arc<SimProbe>,
    pub secrets: Arc<SimSecretStore>,
    pub verifier: Arc<SimVerifier>,
    pub lock: Arc<MemoryLeaderLock>,
    pub journal: Arc<MemoryJournal>,
    pub alerts: MemoryNotifier,
}

impl Drill {
    pub fn new() -> Self {
        Self::with_config(drill_config())
    }

    pub fn with_config(config: Value) -> Self {
        let config = OrchestratorConfig::from_json(&config.to_string()).expect("drill config");
        let cluster = Arc::new(SimCluster::from_regions(&config.region_records()));
        cluster.set_drain_on_fence(false);
        Self {
            config,
            cluster,
            routing: Arc::new(SimRouting::new()),
            probe: Arc::new(SimProbe::new()),
            secrets: Arc::new(SimSecretStore::with_active("v0")),
            verifier: Arc::new(SimVerifier::new()),
            lock: Arc::new(MemoryLeaderLock::new()),
            journal: Arc::new(MemoryJournal::new()),
            alerts: MemoryNotifier::new(),
        }
    }

    pub fn backends(&self) -> Backends {
        Backends {
            cluster: self.cluster.clone(),
            lag_source: self.cluster.clone(),
            routing: self.routing.clone(),
            secrets: self.secrets.clone(),
            verifier: self.verifier.clone(),
            leader_lock: self.lock.clone(),
            probe: Some(self.probe.clone()),
            journal: Some(self.journal.clone()),
            alerts: Some(Arc::new(self.alerts.clone())),
        }
    }

    /// Build and spawn an orchestrator over this world.
    pub fn start(&self) -> Running {
        self.spawn(&self.config)
    }

    /// Another instance over the same world, contending for the same lease.
    pub fn start_as(&self, node_id: &str) -> Running {
        let mut config = self.config.clone();
        config.node_id = node_id.to_string();
        self.spawn(&config)
    }

    fn spawn(&self, config: &OrchestratorConfig) -> Running {
        let orchestrator = Orchestrator::build(config, self.backends()).expect("build");
        let status = orchestrator.status();
        let registry = orchestrator.registry();
        let metrics = orchestrator.metrics();
        let gate = orchestrator.gate();
        let signals = orchestrator.signals();

        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(orchestrator.run(stop_rx));

        Running {
            status,
            registry,
            metrics,
            gate,
            signals,
            stop,
            task,
        }
    }

    pub fn primary_down(&self) {
        self.probe.set_healthy(USE1, false);
    }

    pub fn lag(&self, cluster_id: &str, ms: u64) {
        self.cluster.set_lag(cluster_id, Duration::from_millis(ms));
    }
}

/// A spawned orchestrator.
pub struct Running {
    pub status: Arc<StatusBoard>,
    pub registry: Arc<RegionRegistry>,
    pub metrics: Arc<MetricsRegistry>,
    pub gate: Arc<ChangeGate>,
    pub signals: SignalSender,
    stop: watch::Sender<bool>,
    task: JoinHandle<OrchestratorResult<()>>,
}

impl Running {
    pub fn state(&self) -> &'static str {
        self.status.snapshot().engine_state
    }

    pub fn primary(&self) -> String {
        self.registry
            .primary()
            .map(|r| r.region_id.as_str().to_string())
            .unwrap_or_default()
    }

    pub async fn stop(self) {
        let _ = self.stop.send(true);
        self.task.await.expect("join").expect("clean shutdown");
    }
}

/// Sleep under paused time, letting every task run.
pub async fn elapse(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}
