//! Replication lag tracker
//!
//! Each poll reads the registry to decide which regions are secondaries, so
//! tracking follows role changes. A region whose role changed starts over
//! from UNKNOWN.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::errors::LagResult;
use super::window::{LagSample, LagVerdict, LagWindow};
use crate::observability::{Event, Logger, MetricsRegistry};
use crate::region::{RegionId, RegionRecord, RegionRegistry};
use crate::signal::{Signal, SignalSender};

/// Reads the replication lag of a secondary.
#[async_trait]
pub trait LagSource: Send + Sync {
    async fn replication_lag(&self, region: &RegionRecord) -> LagResult<Duration>;
}

/// Lag tracker tunables.
#[derive(Debug, Clone)]
pub struct LagSettings {
    pub poll_interval: Duration,
    pub threshold: Duration,
    /// K: consecutive in-bound samples needed to report recovery
    pub samples_required: u32,
}

impl Default for LagSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            threshold: Duration::from_millis(1000),
            samples_required: 3,
        }
    }
}

/// Polls every secondary and emits lag transitions.
pub struct LagTracker {
    source: Arc<dyn LagSource>,
    registry: Arc<RegionRegistry>,
    metrics: Arc<MetricsRegistry>,
    settings: LagSettings,
    windows: BTreeMap<RegionId, LagWindow>,
}

impl LagTracker {
    pub fn new(
        source: Arc<dyn LagSource>,
        registry: Arc<RegionRegistry>,
        metrics: Arc<MetricsRegistry>,
        settings: LagSettings,
    ) -> Self {
        Self {
            source,
            registry,
            metrics,
            settings,
            windows: BTreeMap::new(),
        }
    }

    /// Debounced verdict for a region (UNKNOWN if not tracked).
    pub fn verdict(&self, region_id: &RegionId) -> LagVerdict {
        self.windows
            .get(region_id)
            .map(|w| w.verdict())
            .unwrap_or(LagVerdict::Unknown)
    }

    /// Read one sample from every current secondary.
    ///
    /// Returns the transitions in region-id order.
    pub async fn poll_once(&mut self) -> Vec<Signal> {
        let secondaries = self.registry.secondaries();
        self.windows
            .retain(|id, _| secondaries.iter().any(|r| &r.region_id == id));

        let mut signals = Vec::new();
        for record in &secondaries {
            let sample = self.read(record).await;
            let settings = &self.settings;
            let window = self
                .windows
                .entry(record.region_id.clone())
                .or_insert_with(|| LagWindow::new(settings.threshold, settings.samples_required));

            let Some(verdict) = window.observe(sample.lag) else {
                continue;
            };

            match verdict {
                LagVerdict::Degraded => {
                    let lag_ms = sample.lag.map(|d| d.as_millis() as u64);
                    Logger::event(
                        Event::LagDegraded,
                        &[
                            ("region", record.region_id.as_str()),
                            (
                                "lag_ms",
                                &lag_ms.map(|v| v.to_string()).unwrap_or_else(|| "unavailable".into()),
                            ),
                        ],
                    );
                    signals.push(Signal::LagDegraded {
                        region_id: record.region_id.clone(),
                        lag_ms,
                        at: sample.timestamp,
                    });
                }
                LagVerdict::WithinBound => {
                    let lag_ms = sample.lag.map(|d| d.as_millis() as u64).unwrap_or(0);
                    Logger::event(
                        Event::LagRecovered,
                        &[
                            ("region", record.region_id.as_str()),
                            ("lag_ms", &lag_ms.to_string()),
                        ],
                    );
                    signals.push(Signal::LagRecovered {
                        region_id: record.region_id.clone(),
                        lag_ms,
                        at: sample.timestamp,
                    });
                }
                LagVerdict::Unknown => {}
            }
        }
        signals
    }

    async fn read(&self, record: &RegionRecord) -> LagSample {
        self.metrics.increment_lag_samples();
        let lag = match self.source.replication_lag(record).await {
            Ok(lag) => Some(lag),
            Err(e) => {
                self.metrics.increment_lag_unavailable();
                Logger::event(
                    Event::LagUnavailable,
                    &[
                        ("region", record.region_id.as_str()),
                        ("error", &e.to_string()),
                    ],
                );
                None
            }
        };

        LagSample {
            region_id: record.region_id.clone(),
            lag,
            timestamp: Utc::now(),
        }
    }

    /// Poll until shutdown or the engine hangs up.
    pub async fn run(mut self, tx: SignalSender, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for signal in self.poll_once().await {
                        if tx.send(signal).await.is_err() {
                            return;
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}
