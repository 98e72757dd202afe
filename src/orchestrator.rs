//! Process wiring
//!
//! Builds every subsystem from one [`OrchestratorConfig`] and a set of
//! control-plane backends, then runs the control loop:
//!
//! ```text
//! probes ──┐
//!          ├──> signal channel ──> DecisionEngine ──> promotion / routing
//! lag    ──┘          ^                  │
//! HTTP operator ──────┘                  └──> StatusBoard <── HTTP /status
//! ```
//!
//! The lease renewal task and the rotation coordinator run beside the loop
//! and share the lease handle and change gate with the engine.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::OrchestratorConfig;
use crate::engine::{
    DecisionEngine, EngineParts, EpisodeJournal, FileJournal, LeaderLock, LeaseHandle,
    MemoryLeaderLock,
};
use crate::error::OrchestratorResult;
use crate::health::{build_probe, HealthMonitor, LivenessProbe};
use crate::http::{self, HttpState};
use crate::lag::{LagSource, LagTracker};
use crate::notify::{FanoutNotifier, FileNotifier, LogNotifier, Notifier};
use crate::observability::{Event, Logger, MetricsRegistry};
use crate::promotion::{ClusterControl, PromotionCoordinator};
use crate::region::RegionRegistry;
use crate::rotation::{ChangeGate, CredentialVerifier, RotationCoordinator, SecretStore};
use crate::signal::{signal_channel, SignalReceiver, SignalSender};
use crate::sim::{SimCluster, SimRouting, SimSecretStore, SimVerifier};
use crate::status::StatusBoard;
use crate::traffic::{RoutingApi, TrafficController};

/// External systems the orchestrator drives.
pub struct Backends {
    pub cluster: Arc<dyn ClusterControl>,
    pub lag_source: Arc<dyn LagSource>,
    pub routing: Arc<dyn RoutingApi>,
    pub secrets: Arc<dyn SecretStore>,
    pub verifier: Arc<dyn CredentialVerifier>,
    pub leader_lock: Arc<dyn LeaderLock>,
    /// One probe for every region; when unset each region gets the probe
    /// its config names
    pub probe: Option<Arc<dyn LivenessProbe>>,
    /// Journal override; when unset the file at `journal_path` is used
    pub journal: Option<Arc<dyn EpisodeJournal>>,
    /// Extra alert sink next to the log and the alert file
    pub alerts: Option<Arc<dyn Notifier>>,
}

impl Backends {
    /// In-process control planes seeded from the configured regions.
    /// Probes stay real.
    pub fn simulated(config: &OrchestratorConfig) -> Self {
        let cluster = Arc::new(SimCluster::from_regions(&config.region_records()));
        Self {
            cluster: cluster.clone(),
            lag_source: cluster,
            routing: Arc::new(SimRouting::new()),
            secrets: Arc::new(SimSecretStore::with_active("v0")),
            verifier: Arc::new(SimVerifier::new()),
            leader_lock: Arc::new(MemoryLeaderLock::new()),
            probe: None,
            journal: None,
            alerts: None,
        }
    }
}

/// A fully wired, not yet running orchestrator.
pub struct Orchestrator {
    registry: Arc<RegionRegistry>,
    metrics: Arc<MetricsRegistry>,
    status: Arc<StatusBoard>,
    gate: Arc<ChangeGate>,
    lease: Arc<LeaseHandle>,
    engine: DecisionEngine,
    monitor: HealthMonitor,
    tracker: LagTracker,
    rotation: Option<RotationCoordinator>,
    tx: SignalSender,
    rx: SignalReceiver,
    http_addr: Option<SocketAddr>,
}

impl Orchestrator {
    /// Wire every subsystem. Opens the journal and alert file.
    pub fn build(config: &OrchestratorConfig, backends: Backends) -> OrchestratorResult<Self> {
        config.validate()?;

        let registry = Arc::new(RegionRegistry::new(config.region_records())?);
        let metrics = Arc::new(MetricsRegistry::new());
        let status = Arc::new(StatusBoard::new(Arc::clone(&registry)));
        let gate = Arc::new(ChangeGate::new());

        let mut sinks: Vec<Arc<dyn Notifier>> = vec![Arc::new(LogNotifier)];
        if let Some(path) = &config.alerts_path {
            sinks.push(Arc::new(FileNotifier::open(path)?));
        }
        if let Some(extra) = backends.alerts {
            sinks.push(extra);
        }
        let notifier: Arc<dyn Notifier> = Arc::new(FanoutNotifier::new(sinks));

        let journal: Arc<dyn EpisodeJournal> = match backends.journal {
            Some(journal) => journal,
            None => Arc::new(FileJournal::open(&config.journal_path)?),
        };

        let lease = Arc::new(LeaseHandle::new(
            backends.leader_lock,
            config.node_id.clone(),
            config.lease_ttl(),
            Arc::clone(&metrics),
        ));

        let promotion = Arc::new(PromotionCoordinator::new(
            backends.cluster,
            config.promotion_settings(),
            Arc::clone(&metrics),
        ));
        let traffic = Arc::new(TrafficController::new(
            backends.routing,
            config.traffic_settings(),
            Arc::clone(&metrics),
        ));

        let engine = DecisionEngine::new(
            EngineParts {
                registry: Arc::clone(&registry),
                promotion,
                traffic,
                notifier: Arc::clone(&notifier),
                journal,
                lease: Arc::clone(&lease),
                gate: Arc::clone(&gate),
                status: Arc::clone(&status),
                metrics: Arc::clone(&metrics),
            },
            config.engine_settings(),
        );

        let health = config.health_settings();
        let targets = config
            .regions
            .iter()
            .zip(config.region_records())
            .map(|(region, record)| {
                let probe = match &backends.probe {
                    Some(probe) => Arc::clone(probe),
                    None => build_probe(&region.probe, health.probe_timeout),
                };
                (record, probe)
            })
            .collect();
        let monitor = HealthMonitor::new(
            targets,
            &health,
            Arc::clone(&registry),
            Arc::clone(&metrics),
        );

        let tracker = LagTracker::new(
            backends.lag_source,
            Arc::clone(&registry),
            Arc::clone(&metrics),
            config.lag_settings(),
        );

        let rotation = config.rotation.enabled.then(|| {
            RotationCoordinator::new(
                backends.secrets,
                backends.verifier,
                Arc::clone(&registry),
                Arc::clone(&gate),
                notifier,
                Arc::clone(&metrics),
                config.rotation_settings(),
            )
            .with_lease(Arc::clone(&lease))
        });

        let http_addr = if config.http.enabled {
            Some(config.http_addr()?)
        } else {
            None
        };

        let (tx, rx) = signal_channel(config.engine.signal_capacity);

        Ok(Self {
            registry,
            metrics,
            status,
            gate,
            lease,
            engine,
            monitor,
            tracker,
            rotation,
            tx,
            rx,
            http_addr,
        })
    }

    pub fn registry(&self) -> Arc<RegionRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        Arc::clone(&self.metrics)
    }

    pub fn status(&self) -> Arc<StatusBoard> {
        Arc::clone(&self.status)
    }

    pub fn gate(&self) -> Arc<ChangeGate> {
        Arc::clone(&self.gate)
    }

    /// Sender for operator commands and injected signals.
    pub fn signals(&self) -> SignalSender {
        self.tx.clone()
    }

    /// Run until `shutdown` flips to true.
    ///
    /// The engine runs on the calling task; the rest are spawned and joined
    /// once it returns.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> OrchestratorResult<()> {
        let Orchestrator {
            metrics,
            status,
            lease,
            engine,
            monitor,
            tracker,
            rotation,
            tx,
            rx,
            http_addr,
            ..
        } = self;

        // The engine restores from the journal on its first signal as leader
        lease.acquire().await?;

        let mut tasks: Vec<JoinHandle<()>> = monitor.spawn(tx.clone(), shutdown.clone());
        tasks.push(tokio::spawn(tracker.run(tx.clone(), shutdown.clone())));
        tasks.push(tokio::spawn(Arc::clone(&lease).run_renewal(shutdown.clone())));
        if let Some(rotation) = rotation {
            tasks.push(tokio::spawn(rotation.run(shutdown.clone())));
        }
        if let Some(addr) = http_addr {
            let state = HttpState {
                status,
                metrics,
                signals: tx.clone(),
            };
            let stop = shutdown.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = http::serve(addr, state, stop).await {
                    Logger::error(
                        "HTTP_SERVER_FAILED",
                        &[("addr", &addr.to_string()), ("error", &e.to_string())],
                    );
                }
            }));
        }
        drop(tx);

        Logger::event(
            Event::Serving,
            &[("holder", lease.holder()), ("tasks", &tasks.len().to_string())],
        );

        engine.run(rx, shutdown).await;

        Logger::event(Event::ShutdownStart, &[]);
        for task in tasks {
            let _ = task.await;
        }
        Logger::event(Event::ShutdownComplete, &[]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryJournal;
    use crate::sim::SimProbe;

    fn config() -> OrchestratorConfig {
        OrchestratorConfig::from_json(
            r#"{
                "regions": [
                    {"region_id": "use1", "role": "PRIMARY", "endpoint": "db.use1:5432", "cluster_id": "c-use1"},
                    {"region_id": "usw2", "role": "SECONDARY", "endpoint": "db.usw2:5432", "cluster_id": "c-usw2"}
                ],
                "dns": {"record_name": "db.example.com"},
                "http": {"enabled": false}
            }"#,
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_build_and_shutdown() {
        let config = config();
        let mut backends = Backends::simulated(&config);
        backends.probe = Some(Arc::new(SimProbe::new()));
        backends.journal = Some(Arc::new(MemoryJournal::new()));

        let orchestrator = Orchestrator::build(&config, backends).unwrap();
        let status = orchestrator.status();
        let (stop_tx, stop_rx) = watch::channel(false);
        let running = tokio::spawn(orchestrator.run(stop_rx));

        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        let snapshot = status.snapshot();
        assert_eq!(snapshot.engine_state, "HEALTHY");
        assert!(snapshot.leader);

        stop_tx.send(true).unwrap();
        running.await.unwrap().unwrap();
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let mut config = config();
        config.dns.record_name.clear();
        let backends = Backends::simulated(&config);
        assert!(Orchestrator::build(&config, backends).is_err());
    }
}
