//! Health monitor
//!
//! One watcher task per region. Each tick probes the region, records a
//! Health Observation, updates the registry's health fields and, only on a
//! debounced verdict transition, pushes `HealthChanged` onto the engine
//! channel.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::hysteresis::HysteresisCounter;
use super::probe::LivenessProbe;
use crate::observability::{Event, Logger, MetricsRegistry};
use crate::region::{HealthVerdict, RegionId, RegionRecord, RegionRegistry};
use crate::signal::{Signal, SignalSender};

/// Default number of observations kept per region.
pub const DEFAULT_HISTORY_SIZE: usize = 32;

/// Health monitor tunables.
#[derive(Debug, Clone)]
pub struct HealthSettings {
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
    pub failure_threshold: u32,
    pub recovery_threshold: u32,
    pub history_size: usize,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            failure_threshold: 3,
            recovery_threshold: 2,
            history_size: DEFAULT_HISTORY_SIZE,
        }
    }
}

/// One probe outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthObservation {
    pub region_id: RegionId,
    pub timestamp: DateTime<Utc>,
    pub healthy: bool,
    /// Present only for successful probes
    pub latency_ms: Option<u64>,
}

/// Bounded per-region sliding windows of observations.
#[derive(Debug)]
pub struct HealthHistory {
    capacity: usize,
    windows: Mutex<HashMap<RegionId, VecDeque<HealthObservation>>>,
}

impl HealthHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Append, evicting the oldest entry once the window is full.
    pub fn push(&self, observation: HealthObservation) {
        if let Ok(mut windows) = self.windows.lock() {
            let window = windows
                .entry(observation.region_id.clone())
                .or_insert_with(|| VecDeque::with_capacity(self.capacity));
            if window.len() == self.capacity {
                window.pop_front();
            }
            window.push_back(observation);
        }
    }

    /// Observations for a region, oldest first.
    pub fn recent(&self, region_id: &RegionId) -> Vec<HealthObservation> {
        self.windows
            .lock()
            .ok()
            .and_then(|windows| windows.get(region_id).map(|w| w.iter().cloned().collect()))
            .unwrap_or_default()
    }
}

/// Probe loop for a single region.
pub struct RegionWatcher {
    region_id: RegionId,
    endpoint: String,
    probe: Arc<dyn LivenessProbe>,
    counter: HysteresisCounter,
    interval: Duration,
    history: Arc<HealthHistory>,
    registry: Arc<RegionRegistry>,
    metrics: Arc<MetricsRegistry>,
}

impl RegionWatcher {
    pub fn new(
        record: &RegionRecord,
        probe: Arc<dyn LivenessProbe>,
        settings: &HealthSettings,
        history: Arc<HealthHistory>,
        registry: Arc<RegionRegistry>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            region_id: record.region_id.clone(),
            endpoint: record.endpoint.clone(),
            probe,
            counter: HysteresisCounter::new(settings.failure_threshold, settings.recovery_threshold),
            interval: settings.probe_interval,
            history,
            registry,
            metrics,
        }
    }

    /// Current debounced verdict.
    pub fn verdict(&self) -> HealthVerdict {
        self.counter.verdict()
    }

    /// Probe once. Returns a signal only when the verdict flipped.
    ///
    /// The probe's own timeout bounds this call.
    pub async fn poll_once(&mut self) -> Option<Signal> {
        self.metrics.increment_probes_sent();
        let outcome = self.probe.probe(&self.endpoint).await;
        let now = Utc::now();

        let (healthy, latency_ms) = match &outcome {
            Ok(latency) => (true, Some(latency.as_millis() as u64)),
            Err(e) => {
                self.metrics.increment_probe_failures();
                Logger::event(
                    Event::ProbeFailed,
                    &[
                        ("region", self.region_id.as_str()),
                        ("error", &e.to_string()),
                    ],
                );
                (false, None)
            }
        };

        self.history.push(HealthObservation {
            region_id: self.region_id.clone(),
            timestamp: now,
            healthy,
            latency_ms,
        });

        let transition = self.counter.observe(healthy);
        let verdict = self.counter.verdict();
        if let Err(e) = self.registry.record_health(&self.region_id, verdict, now) {
            Logger::warn(
                "HEALTH_RECORD_FAILED",
                &[("region", self.region_id.as_str()), ("error", &e.to_string())],
            );
        }

        transition.map(|verdict| {
            self.metrics.increment_health_transitions();
            Logger::event(
                Event::HealthChanged,
                &[
                    ("region", self.region_id.as_str()),
                    ("verdict", verdict.as_str()),
                    (
                        "consecutive",
                        &match verdict {
                            HealthVerdict::Healthy => self.counter.consecutive_successes(),
                            HealthVerdict::Unhealthy => self.counter.consecutive_failures(),
                        }
                        .to_string(),
                    ),
                ],
            );
            Signal::HealthChanged {
                region_id: self.region_id.clone(),
                verdict,
                at: now,
            }
        })
    }

    /// Probe every interval until shutdown or the engine hangs up.
    pub async fn run(mut self, tx: SignalSender, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(signal) = self.poll_once().await {
                        if tx.send(signal).await.is_err() {
                            break;
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

/// Owns the per-region watchers.
pub struct HealthMonitor {
    watchers: Vec<RegionWatcher>,
    history: Arc<HealthHistory>,
}

impl HealthMonitor {
    /// Build one watcher per `(record, probe)` pair.
    pub fn new(
        targets: Vec<(RegionRecord, Arc<dyn LivenessProbe>)>,
        settings: &HealthSettings,
        registry: Arc<RegionRegistry>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let history = Arc::new(HealthHistory::new(settings.history_size));
        let watchers = targets
            .into_iter()
            .map(|(record, probe)| {
                RegionWatcher::new(
                    &record,
                    probe,
                    settings,
                    Arc::clone(&history),
                    Arc::clone(&registry),
                    Arc::clone(&metrics),
                )
            })
            .collect();

        Self { watchers, history }
    }

    /// Shared observation history.
    pub fn history(&self) -> Arc<HealthHistory> {
        Arc::clone(&self.history)
    }

    /// Spawn one task per region.
    pub fn spawn(self, tx: SignalSender, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        self.watchers
            .into_iter()
            .map(|watcher| tokio::spawn(watcher.run(tx.clone(), shutdown.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::errors::{ProbeError, ProbeResult};
    use crate::region::RegionRole;
    use async_trait::async_trait;

    struct ScriptProbe {
        outcomes: Mutex<VecDeque<bool>>,
    }

    #[async_trait]
    impl LivenessProbe for ScriptProbe {
        async fn probe(&self, endpoint: &str) -> ProbeResult<Duration> {
            let healthy = self.outcomes.lock().unwrap().pop_front().unwrap_or(true);
            if healthy {
                Ok(Duration::from_millis(3))
            } else {
                Err(ProbeError::Timeout {
                    endpoint: endpoint.to_string(),
                    timeout_ms: 5000,
                })
            }
        }
    }

    fn fixture(outcomes: &[bool]) -> (RegionWatcher, Arc<RegionRegistry>, Arc<MetricsRegistry>) {
        let primary = RegionRecord::new("use1", RegionRole::Primary, "use1:5432", "c1");
        let registry = Arc::new(
            RegionRegistry::new(vec![
                primary.clone(),
                RegionRecord::new("usw2", RegionRole::Secondary, "usw2:5432", "c2"),
            ])
            .unwrap(),
        );
        let metrics = Arc::new(MetricsRegistry::new());
        let probe = Arc::new(ScriptProbe {
            outcomes: Mutex::new(outcomes.iter().copied().collect()),
        });
        let watcher = RegionWatcher::new(
            &primary,
            probe,
            &HealthSettings::default(),
            Arc::new(HealthHistory::new(4)),
            Arc::clone(&registry),
            Arc::clone(&metrics),
        );
        (watcher, registry, metrics)
    }

    #[tokio::test]
    async fn test_signal_only_on_transition() {
        let (mut watcher, registry, metrics) = fixture(&[false, false, false, false, true, true]);

        assert!(watcher.poll_once().await.is_none());
        assert!(watcher.poll_once().await.is_none());
        let signal = watcher.poll_once().await.unwrap();
        assert!(matches!(
            signal,
            Signal::HealthChanged { verdict: HealthVerdict::Unhealthy, .. }
        ));
        assert!(watcher.poll_once().await.is_none());
        assert!(watcher.poll_once().await.is_none());
        assert!(matches!(
            watcher.poll_once().await,
            Some(Signal::HealthChanged { verdict: HealthVerdict::Healthy, .. })
        ));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.probes_sent, 6);
        assert_eq!(snapshot.probe_failures, 4);
        assert_eq!(snapshot.health_transitions, 2);

        let record = registry.get(&"use1".into()).unwrap();
        assert_eq!(record.last_health_state, HealthVerdict::Healthy);
        assert_eq!(record.role, RegionRole::Primary);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let (mut watcher, _registry, _metrics) = fixture(&[true; 6]);
        for _ in 0..6 {
            watcher.poll_once().await;
        }

        let recent = watcher.history.recent(&"use1".into());
        assert_eq!(recent.len(), 4);
        assert!(recent.iter().all(|o| o.healthy && o.latency_ms == Some(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_emits_and_stops_on_shutdown() {
        let (watcher, _registry, _metrics) = fixture(&[false, false, false]);
        let (tx, mut rx) = crate::signal::signal_channel(8);
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(watcher.run(tx, stop_rx));
        let signal = rx.recv().await.unwrap();
        assert!(matches!(
            signal,
            Signal::HealthChanged { verdict: HealthVerdict::Unhealthy, .. }
        ));

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
