//! Promotion coordinator
//!
//! Sequence for one episode:
//! 1. Honour cancellation (only possible before fencing)
//! 2. Fence the old primary
//! 3. Wait for the target's lag to reach `max_staleness`
//! 4. Issue promote
//! 5. Poll until the target reports writer-capable
//!
//! Steps 2 to 5 share one overall deadline. Once step 2 succeeded the
//! sequence always runs to a report or an error; it is never abandoned
//! half-way.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::{sleep, timeout, Instant};
use uuid::Uuid;

use super::cluster::{ClusterControl, ClusterError, ClusterResult};
use super::errors::{PromotionError, PromotionResult};
use crate::observability::{Event, Logger, MetricsRegistry};
use crate::region::{RegionId, RegionRecord};

/// Promotion tunables.
#[derive(Debug, Clone)]
pub struct PromotionSettings {
    /// Overall deadline from fencing to writer-capable
    pub promotion_timeout: Duration,
    /// Bound on the fence call alone
    pub fence_timeout: Duration,
    /// Maximum lag accepted before promote is issued
    pub max_staleness: Duration,
    /// Delay between `describe` polls
    pub poll_interval: Duration,
}

impl Default for PromotionSettings {
    fn default() -> Self {
        Self {
            promotion_timeout: Duration::from_secs(300),
            fence_timeout: Duration::from_secs(30),
            max_staleness: Duration::ZERO,
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// Cooperative cancellation, observed only before fencing.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of a successful promotion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromotionReport {
    pub episode_id: Uuid,
    pub promoted_region: RegionId,
    pub promoted_cluster: String,
    /// Lag observed when promote was issued
    pub final_lag: Duration,
    /// Fencing to writer-capable
    pub elapsed: Duration,
    pub completed_at: DateTime<Utc>,
}

/// Drives fence → catch-up → promote → writer-capable.
pub struct PromotionCoordinator {
    cluster: Arc<dyn ClusterControl>,
    settings: PromotionSettings,
    metrics: Arc<MetricsRegistry>,
    attempted: Mutex<HashSet<Uuid>>,
}

impl PromotionCoordinator {
    pub fn new(
        cluster: Arc<dyn ClusterControl>,
        settings: PromotionSettings,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            cluster,
            settings,
            metrics,
            attempted: Mutex::new(HashSet::new()),
        }
    }

    pub fn settings(&self) -> &PromotionSettings {
        &self.settings
    }

    /// Whether `episode_id` already used its attempt.
    pub fn was_attempted(&self, episode_id: &Uuid) -> bool {
        self.attempted
            .lock()
            .map(|set| set.contains(episode_id))
            .unwrap_or(true)
    }

    /// Record an attempt made before a restart so it is never repeated.
    pub fn mark_attempted(&self, episode_id: Uuid) {
        if let Ok(mut set) = self.attempted.lock() {
            set.insert(episode_id);
        }
    }

    /// Promote `target` over `old_primary` for `episode_id`.
    ///
    /// At most one call per episode id gets past the first check.
    pub async fn execute(
        &self,
        episode_id: Uuid,
        old_primary: &RegionRecord,
        target: &RegionRecord,
        cancel: &CancelFlag,
    ) -> PromotionResult<PromotionReport> {
        let first_attempt = self
            .attempted
            .lock()
            .map(|mut set| set.insert(episode_id))
            .unwrap_or(false);
        if !first_attempt {
            return Err(PromotionError::AlreadyAttempted { episode_id });
        }

        if cancel.is_cancelled() {
            return Err(PromotionError::Cancelled { episode_id });
        }

        self.metrics.increment_promotions_attempted();
        let episode = episode_id.to_string();
        let started = Instant::now();
        let deadline = started + self.settings.promotion_timeout;

        // Step 2: fence. Past this point there is no cancellation.
        self.fence(&old_primary.cluster_id, deadline).await?;
        Logger::event(
            Event::PrimaryFenced,
            &[
                ("cluster", &old_primary.cluster_id),
                ("episode_id", &episode),
                ("region", old_primary.region_id.as_str()),
            ],
        );

        // Step 3: catch-up
        let final_lag = self
            .wait_for_lag(&target.cluster_id, self.settings.max_staleness, deadline)
            .await?;

        // Step 4: promote
        let ack = self
            .bounded(deadline, self.cluster.promote(&target.cluster_id))
            .await
            .map_err(|source| PromotionError::PromoteRejected {
                cluster: target.cluster_id.clone(),
                source,
            })?;
        Logger::event(
            Event::PromotionIssued,
            &[
                ("cluster", &ack.cluster_id),
                ("episode_id", &episode),
                ("final_lag_ms", &final_lag.as_millis().to_string()),
                ("request_id", &ack.request_id),
            ],
        );

        // Step 5: writer-capable
        loop {
            if let Ok(description) = self
                .bounded(deadline, self.cluster.describe(&target.cluster_id))
                .await
            {
                if description.is_writer_capable() {
                    break;
                }
            }
            if Instant::now() >= deadline {
                return Err(PromotionError::PromotionTimeout {
                    cluster: target.cluster_id.clone(),
                    elapsed: started.elapsed(),
                });
            }
            sleep(self.poll_delay(deadline)).await;
        }

        let elapsed = started.elapsed();
        self.metrics.increment_promotions_succeeded();
        Logger::event(
            Event::PromotionComplete,
            &[
                ("cluster", &target.cluster_id),
                ("elapsed_ms", &elapsed.as_millis().to_string()),
                ("episode_id", &episode),
                ("region", target.region_id.as_str()),
            ],
        );

        Ok(PromotionReport {
            episode_id,
            promoted_region: target.region_id.clone(),
            promoted_cluster: target.cluster_id.clone(),
            final_lag,
            elapsed,
            completed_at: Utc::now(),
        })
    }

    /// Wait until `cluster_id` lags by at most `bound`, for up to `within`.
    ///
    /// Returns the lag that satisfied the bound.
    pub async fn await_catch_up(
        &self,
        cluster_id: &str,
        bound: Duration,
        within: Duration,
    ) -> PromotionResult<Duration> {
        self.wait_for_lag(cluster_id, bound, Instant::now() + within)
            .await
    }

    /// Rebuild a former primary as a replica of the current one.
    pub async fn rebuild_replica(
        &self,
        former: &RegionRecord,
        primary: &RegionRecord,
    ) -> ClusterResult<()> {
        self.cluster
            .reprovision_as_replica(&former.cluster_id, &primary.cluster_id)
            .await
    }

    async fn fence(&self, cluster_id: &str, deadline: Instant) -> PromotionResult<()> {
        let fence_deadline = deadline.min(Instant::now() + self.settings.fence_timeout);
        self.bounded(fence_deadline, self.cluster.fence(cluster_id))
            .await
            .map_err(|source| {
                Logger::event(
                    Event::FencingFailed,
                    &[("cluster", cluster_id), ("error", &source.to_string())],
                );
                PromotionError::FencingFailed {
                    cluster: cluster_id.to_string(),
                    source,
                }
            })
    }

    async fn wait_for_lag(
        &self,
        cluster_id: &str,
        bound: Duration,
        deadline: Instant,
    ) -> PromotionResult<Duration> {
        let mut last_lag = None;
        loop {
            if let Ok(description) = self.bounded(deadline, self.cluster.describe(cluster_id)).await {
                if let Some(lag) = description.lag {
                    last_lag = Some(lag);
                    if lag <= bound {
                        return Ok(lag);
                    }
                }
            }
            if Instant::now() >= deadline {
                return Err(PromotionError::CatchUpTimeout {
                    cluster: cluster_id.to_string(),
                    bound,
                    last_lag,
                });
            }
            sleep(self.poll_delay(deadline)).await;
        }
    }

    /// Run a control-plane call, failing it once `deadline` passes.
    async fn bounded<T, F>(&self, deadline: Instant, call: F) -> ClusterResult<T>
    where
        F: std::future::Future<Output = ClusterResult<T>>,
    {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, call).await {
            Ok(result) => result,
            Err(_) => Err(ClusterError::Unavailable {
                cluster: String::new(),
                reason: format!("no answer within {:?}", remaining),
            }),
        }
    }

    fn poll_delay(&self, deadline: Instant) -> Duration {
        let remaining = deadline.saturating_duration_since(Instant::now());
        self.settings.poll_interval.min(remaining).max(Duration::from_millis(1))
    }
}
