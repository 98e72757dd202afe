//! Failover decision engine
//!
//! The only writer of engine state and region roles. Signals are handled
//! one at a time in channel order; promotion and cutover are awaited inline.
//!
//! Rules:
//! - Every state-changing step checks the leader lease first
//! - An episode version is journaled before the state it describes is
//!   installed
//! - At most one promotion attempt per episode id
//! - After fencing, the outcome is always recorded, leader or not
//! - FAILOVER_FAILED freezes automatic handling until `ResolveManually`

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use super::episode::{EpisodeKind, EpisodeOutcome, FailoverEpisode};
use super::errors::{EngineError, EngineResult};
use super::journal::{latest_versions, EpisodeJournal};
use super::lease::{LeaseError, LeaseHandle};
use super::state::{BlockReason, FailoverState};
use crate::lag::LagVerdict;
use crate::notify::{deliver, EventKind, LifecycleEvent, Notifier};
use crate::observability::{Event, Logger, MetricsRegistry};
use crate::promotion::{CancelFlag, PromotionCoordinator, PromotionError, PromotionReport};
use crate::region::{HealthVerdict, RegionError, RegionId, RegionRecord, RegionRegistry};
use crate::rotation::ChangeGate;
use crate::signal::{OperatorCommand, Signal, SignalReceiver};
use crate::status::{EngineView, StatusBoard};
use crate::traffic::TrafficController;

/// Engine tunables.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Period of the internal `Tick`
    pub tick_interval: Duration,
    /// Minimum time between alerts while BLOCKED
    pub escalation_interval: Duration,
    /// Start recovery as soon as the former primary is healthy
    pub auto_rebalance: bool,
    /// Lag the rebuilt replica must reach before HEALTHY
    pub catch_up_bound: Duration,
    pub catch_up_timeout: Duration,
    /// How long a failover waits for a running rotation to let go
    pub rotation_wait_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(10),
            escalation_interval: Duration::from_secs(15 * 60),
            auto_rebalance: false,
            catch_up_bound: Duration::from_millis(1000),
            catch_up_timeout: Duration::from_secs(30 * 60),
            rotation_wait_timeout: Duration::from_secs(60),
        }
    }
}

/// Collaborators of the engine.
pub struct EngineParts {
    pub registry: Arc<RegionRegistry>,
    pub promotion: Arc<PromotionCoordinator>,
    pub traffic: Arc<TrafficController>,
    pub notifier: Arc<dyn Notifier>,
    pub journal: Arc<dyn EpisodeJournal>,
    pub lease: Arc<LeaseHandle>,
    pub gate: Arc<ChangeGate>,
    pub status: Arc<StatusBoard>,
    pub metrics: Arc<MetricsRegistry>,
}

/// Promotion confirmed, routing not yet.
struct PendingCutover {
    report: PromotionReport,
    endpoint: String,
    degraded_alerted: bool,
}

/// Single-writer failover state machine.
pub struct DecisionEngine {
    parts: EngineParts,
    settings: EngineSettings,
    state: FailoverState,
    active: Option<FailoverEpisode>,
    last: Option<FailoverEpisode>,
    health: HashMap<RegionId, HealthVerdict>,
    lag: HashMap<RegionId, (LagVerdict, Option<u64>)>,
    former_primary: Option<RegionId>,
    pending_cutover: Option<PendingCutover>,
    last_block_alert: Option<Instant>,
    failure_alerted: HashSet<Uuid>,
    was_leader: bool,
    shutdown: CancelFlag,
}

impl DecisionEngine {
    pub fn new(parts: EngineParts, settings: EngineSettings) -> Self {
        Self {
            parts,
            settings,
            state: FailoverState::Healthy,
            active: None,
            last: None,
            health: HashMap::new(),
            lag: HashMap::new(),
            former_primary: None,
            pending_cutover: None,
            last_block_alert: None,
            failure_alerted: HashSet::new(),
            was_leader: false,
            shutdown: CancelFlag::new(),
        }
    }

    pub fn state(&self) -> &FailoverState {
        &self.state
    }

    /// The open episode, if any.
    pub fn active_episode(&self) -> Option<&FailoverEpisode> {
        self.active.as_ref()
    }

    /// The most recently closed episode.
    pub fn last_episode(&self) -> Option<&FailoverEpisode> {
        self.last.as_ref()
    }

    /// Apply one signal.
    pub async fn handle(&mut self, signal: Signal) -> EngineResult<()> {
        self.observe(&signal);

        if !self.check_leadership().await {
            Logger::event(
                Event::NotLeader,
                &[
                    ("holder", self.parts.lease.holder()),
                    ("signal", signal.name()),
                ],
            );
            self.publish_status();
            return match signal {
                Signal::Operator(_) => Err(LeaseError::NotLeader.into()),
                _ => Ok(()),
            };
        }

        let result = match signal {
            Signal::HealthChanged {
                region_id, verdict, ..
            } => self.on_health(region_id, verdict).await,
            Signal::LagDegraded { region_id, .. } | Signal::LagRecovered { region_id, .. } => {
                self.on_lag(region_id).await
            }
            Signal::Tick { .. } => self.on_tick().await,
            Signal::Operator(command) => self.on_operator(command).await,
        };

        self.publish_status();
        result
    }

    /// Consume signals until shutdown, ticking every `tick_interval`.
    pub async fn run(mut self, mut rx: SignalReceiver, mut shutdown: watch::Receiver<bool>) {
        let cancel = self.shutdown.clone();
        let mut watcher = shutdown.clone();
        tokio::spawn(async move {
            while watcher.changed().await.is_ok() {
                if *watcher.borrow() {
                    cancel.cancel();
                    break;
                }
            }
        });

        let mut ticker = tokio::time::interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.publish_status();

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                received = rx.recv() => match received {
                    Some(signal) => self.dispatch(signal).await,
                    None => break,
                },
                _ = ticker.tick() => self.dispatch(Signal::tick()).await,
            }
        }
    }

    async fn dispatch(&mut self, signal: Signal) {
        let name = signal.name();
        match self.handle(signal).await {
            Ok(()) => {}
            Err(EngineError::CommandRejected {
                command,
                state,
                reason,
            }) => Logger::event(
                Event::CommandRejected,
                &[("command", command), ("reason", &reason), ("state", state)],
            ),
            Err(e) => Logger::event(
                Event::SignalFailed,
                &[
                    ("error", &e.to_string()),
                    ("signal", name),
                    ("state", self.state.state_name()),
                ],
            ),
        }
    }

    /// Rebuild state from the journal.
    ///
    /// An episode that claimed its promotion but never recorded an outcome
    /// freezes the engine: the old primary may be fenced and only an
    /// operator can say which region is primary now.
    pub async fn restore(&mut self) -> EngineResult<()> {
        let episodes = latest_versions(self.parts.journal.load()?);
        self.remember_attempts(&episodes);

        self.parts.gate.end_failover();
        self.active = None;
        self.last = None;
        self.pending_cutover = None;
        self.former_primary = None;

        let Some(latest) = episodes.into_iter().last() else {
            self.state = FailoverState::Healthy;
            return Ok(());
        };

        let registry = Arc::clone(&self.parts.registry);
        let episode_id = latest.episode_id;
        let from = latest.from_region.clone();
        let to = latest.to_region.clone();

        let state = match (latest.kind, latest.outcome, latest.blocked_reason) {
            (EpisodeKind::Failover, EpisodeOutcome::InProgress, _)
                if latest.final_lag_ms.is_some() =>
            {
                // Promoted; routing never confirmed
                registry.assign_primary(&to)?;
                registry.set_fenced(&from, true)?;
                let target = self.region(&to)?;
                self.pending_cutover = Some(PendingCutover {
                    report: PromotionReport {
                        episode_id,
                        promoted_region: target.region_id.clone(),
                        promoted_cluster: target.cluster_id.clone(),
                        final_lag: Duration::from_millis(latest.final_lag_ms.unwrap_or(0)),
                        elapsed: Duration::ZERO,
                        completed_at: Utc::now(),
                    },
                    endpoint: target.endpoint,
                    degraded_alerted: false,
                });
                self.former_primary = Some(from);
                self.parts.gate.begin_failover();
                self.active = Some(latest);
                FailoverState::FailingOver {
                    episode_id,
                    dns_pending: true,
                }
            }
            (EpisodeKind::Failover, EpisodeOutcome::InProgress, _) if latest.failover_attempted => {
                let mut episode = latest;
                episode.finish(
                    "FAILOVER_FAILED",
                    EpisodeOutcome::FailoverFailed,
                    Some("interrupted after the promotion attempt started".into()),
                )?;
                self.persist(episode)?;
                registry.set_fenced(&from, true)?;
                self.parts.gate.begin_failover();
                self.raise_manual_alert(episode_id, "promotion outcome unknown after restart")
                    .await;
                FailoverState::FailoverFailed { episode_id }
            }
            (EpisodeKind::Failover, EpisodeOutcome::InProgress, _) => {
                let mut episode = latest;
                episode.finish(
                    "HEALTHY",
                    EpisodeOutcome::Aborted,
                    Some("interrupted before the promotion attempt".into()),
                )?;
                self.persist(episode)?;
                registry.assign_primary(&from)?;
                FailoverState::Healthy
            }
            (EpisodeKind::Recovery, EpisodeOutcome::InProgress, _) => {
                registry.assign_primary(&to)?;
                registry.set_fenced(&from, true)?;
                self.former_primary = Some(from);
                self.active = Some(latest);
                FailoverState::Recovering { episode_id }
            }
            (EpisodeKind::Failover, EpisodeOutcome::FailedOver, _)
            | (EpisodeKind::Recovery, EpisodeOutcome::Aborted, _) => {
                registry.assign_primary(&to)?;
                registry.set_fenced(&from, true)?;
                self.former_primary = Some(from);
                self.last = Some(latest);
                FailoverState::FailedOver { episode_id }
            }
            (_, EpisodeOutcome::FailoverFailed, _) => {
                self.parts.gate.begin_failover();
                self.last = Some(latest);
                FailoverState::FailoverFailed { episode_id }
            }
            (EpisodeKind::Failover, EpisodeOutcome::Aborted, Some(reason))
                if reason.episode_aborted() =>
            {
                // Abandoned before fencing; still waiting for RetryFailover
                registry.assign_primary(&from)?;
                self.last = Some(latest);
                self.last_block_alert = Some(Instant::now());
                FailoverState::Blocked {
                    episode_id,
                    reason,
                    escalation: 0,
                }
            }
            (EpisodeKind::Failover, EpisodeOutcome::Aborted, _) => {
                registry.assign_primary(&from)?;
                self.last = Some(latest);
                FailoverState::Healthy
            }
            _ => {
                registry.assign_primary(&to)?;
                self.last = Some(latest);
                FailoverState::Healthy
            }
        };

        self.state = state;
        Logger::event(
            Event::StateRestored,
            &[
                ("episode_id", &episode_id.to_string()),
                ("state", self.state.state_name()),
            ],
        );
        Ok(())
    }

    fn remember_attempts(&mut self, episodes: &[FailoverEpisode]) {
        for episode in episodes {
            if episode.failover_attempted {
                self.parts.promotion.mark_attempted(episode.episode_id);
            }
            if episode.outcome == EpisodeOutcome::FailoverFailed {
                self.failure_alerted.insert(episode.episode_id);
            }
        }
    }

    /// Registry roles may be stale; nothing acts until an operator resolves.
    async fn freeze_unrestored(&mut self, error: EngineError) {
        Logger::event(
            Event::RestoreFailed,
            &[
                ("error", &error.to_string()),
                ("state", self.state.state_name()),
            ],
        );
        self.active = None;
        self.pending_cutover = None;
        self.parts.gate.begin_failover();
        if self.state == FailoverState::RestoreFailed {
            return;
        }

        self.state = FailoverState::RestoreFailed;
        self.alert(
            LifecycleEvent::new(
                EventKind::RestoreFailed,
                "manual intervention required: episode journal could not be replayed",
            )
            .with_field("error", error.to_string()),
        )
        .await;
    }

    fn observe(&mut self, signal: &Signal) {
        match signal {
            Signal::HealthChanged {
                region_id, verdict, ..
            } => {
                self.health.insert(region_id.clone(), *verdict);
            }
            Signal::LagDegraded {
                region_id, lag_ms, ..
            } => {
                self.lag
                    .insert(region_id.clone(), (LagVerdict::Degraded, *lag_ms));
            }
            Signal::LagRecovered {
                region_id, lag_ms, ..
            } => {
                self.lag
                    .insert(region_id.clone(), (LagVerdict::WithinBound, Some(*lag_ms)));
            }
            Signal::Tick { .. } | Signal::Operator(_) => {}
        }
    }

    async fn check_leadership(&mut self) -> bool {
        let leader = self.parts.lease.is_leader();
        if leader == self.was_leader {
            return leader;
        }
        self.was_leader = leader;

        let holder = self.parts.lease.holder().to_string();
        if leader {
            self.alert(
                LifecycleEvent::new(EventKind::LeadershipAcquired, "this instance now leads")
                    .with_field("holder", &holder),
            )
            .await;
            if let Err(e) = self.restore().await {
                self.freeze_unrestored(e).await;
            }
        } else {
            self.alert(
                LifecycleEvent::new(EventKind::LeadershipLost, "lease lost, engine stopped acting")
                    .with_field("holder", &holder),
            )
            .await;
        }
        leader
    }

    async fn on_health(&mut self, region_id: RegionId, verdict: HealthVerdict) -> EngineResult<()> {
        if self.state.is_frozen() {
            return Ok(());
        }

        let is_primary = self
            .parts
            .registry
            .primary()
            .map(|p| p.region_id == region_id)
            .unwrap_or(false);

        match (self.state.clone(), verdict) {
            (FailoverState::Healthy, HealthVerdict::Unhealthy) if is_primary => {
                self.open_episode(false).await
            }
            (FailoverState::Suspect { .. }, HealthVerdict::Healthy)
            | (FailoverState::Blocked { .. }, HealthVerdict::Healthy)
                if is_primary =>
            {
                self.abort_episode("primary healthy again").await
            }
            (FailoverState::Blocked { reason, .. }, _)
                if !reason.episode_aborted() && self.is_target(&region_id) =>
            {
                self.evaluate().await
            }
            (FailoverState::FailedOver { .. }, HealthVerdict::Healthy)
                if self.settings.auto_rebalance
                    && self.former_primary.as_ref() == Some(&region_id) =>
            {
                self.begin_recovery().await
            }
            _ => Ok(()),
        }
    }

    async fn on_lag(&mut self, region_id: RegionId) -> EngineResult<()> {
        match self.state.clone() {
            FailoverState::Blocked { reason, .. }
                if !reason.episode_aborted() && self.is_target(&region_id) =>
            {
                self.evaluate().await
            }
            _ => Ok(()),
        }
    }

    async fn on_tick(&mut self) -> EngineResult<()> {
        match self.state.clone() {
            FailoverState::FailingOver {
                dns_pending: true, ..
            } => self.try_cut_over().await,
            FailoverState::Blocked {
                episode_id,
                reason,
                escalation,
            } => {
                let due = self
                    .last_block_alert
                    .map(|at| at.elapsed() >= self.settings.escalation_interval)
                    .unwrap_or(true);
                if !due {
                    return Ok(());
                }
                self.apply(FailoverState::escalate, None)?;
                self.last_block_alert = Some(Instant::now());
                self.alert(
                    LifecycleEvent::new(EventKind::BlockEscalated, "failover still blocked")
                        .with_episode(episode_id)
                        .with_field("level", escalation.saturating_add(1))
                        .with_field("reason", reason.as_str()),
                )
                .await;
                Ok(())
            }
            FailoverState::FailedOver { .. } if self.settings.auto_rebalance => {
                let former_healthy = self
                    .former_primary
                    .as_ref()
                    .map(|former| self.verdict_of(former) == HealthVerdict::Healthy)
                    .unwrap_or(false);
                if former_healthy {
                    self.begin_recovery().await
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }

    async fn on_operator(&mut self, command: OperatorCommand) -> EngineResult<()> {
        let name = command.name();
        let state = self.state.state_name();

        match (command, self.state.clone()) {
            (OperatorCommand::ResolveManually { primary }, FailoverState::FailoverFailed { .. }) => {
                self.resolve_manually(primary).await
            }
            (OperatorCommand::ResolveManually { primary }, FailoverState::RestoreFailed) => {
                let episodes = latest_versions(self.parts.journal.load()?);
                self.remember_attempts(&episodes);
                self.last = episodes.into_iter().last();
                self.resolve_manually(primary).await
            }
            (_, FailoverState::FailoverFailed { .. }) | (_, FailoverState::RestoreFailed) => {
                Err(EngineError::command_rejected(
                    name,
                    state,
                    "engine frozen until resolved manually",
                ))
            }
            (OperatorCommand::RebalanceRequested, FailoverState::FailedOver { .. })
            | (OperatorCommand::RebalanceRequested, FailoverState::Recovering { .. }) => {
                self.begin_recovery().await
            }
            (OperatorCommand::RetryFailover, FailoverState::Blocked { reason, .. })
                if reason.episode_aborted() =>
            {
                self.open_episode(true).await
            }
            _ => Err(EngineError::command_rejected(
                name,
                state,
                "not applicable in this state",
            )),
        }
    }

    /// HEALTHY → SUSPECT, or an aborted BLOCKED → SUSPECT when `retry`.
    async fn open_episode(&mut self, retry: bool) -> EngineResult<()> {
        let primary = self
            .parts
            .registry
            .primary()
            .ok_or(RegionError::SplitBrain { primaries: 0 })?;
        if retry && self.verdict_of(&primary.region_id) == HealthVerdict::Healthy {
            return Err(EngineError::command_rejected(
                "retry_failover",
                self.state.state_name(),
                "primary is healthy",
            ));
        }

        let target = self.choose_target()?;
        let episode = FailoverEpisode::open(
            EpisodeKind::Failover,
            primary.region_id.clone(),
            target.clone(),
            "SUSPECT",
        );
        let episode_id = episode.episode_id;

        if retry {
            self.apply(|s| s.reopen(episode_id), Some(episode))?;
        } else {
            self.apply(|s| s.suspect(episode_id), Some(episode))?;
        }
        self.parts.metrics.increment_episodes_opened();

        Logger::event(
            Event::EpisodeOpened,
            &[
                ("episode_id", &episode_id.to_string()),
                ("from", primary.region_id.as_str()),
                ("to", target.as_str()),
            ],
        );
        self.alert(
            LifecycleEvent::new(EventKind::EpisodeOpened, "primary region unhealthy")
                .with_episode(episode_id)
                .with_field("from", &primary.region_id)
                .with_field("to", &target),
        )
        .await;

        self.evaluate().await
    }

    /// Decide between FAILING_OVER, BLOCKED and aborting.
    async fn evaluate(&mut self) -> EngineResult<()> {
        let episode = self.current_episode()?;

        if self.verdict_of(&episode.from_region) == HealthVerdict::Healthy {
            return self.abort_episode("primary healthy again").await;
        }
        if self.verdict_of(&episode.to_region) == HealthVerdict::Unhealthy {
            return self.block(BlockReason::TargetUnhealthy).await;
        }

        match self.lag_of(&episode.to_region) {
            LagVerdict::Unknown => self.block(BlockReason::LagUnknown).await,
            LagVerdict::Degraded => self.block(BlockReason::LagDegraded).await,
            LagVerdict::WithinBound => self.execute_failover().await,
        }
    }

    async fn block(&mut self, reason: BlockReason) -> EngineResult<()> {
        if let FailoverState::Blocked { reason: current, .. } = &self.state {
            if *current == reason {
                return Ok(());
            }
        }

        let mut episode = self.current_episode()?;
        let episode_id = episode.episode_id;
        let target = episode.to_region.clone();
        episode.advance("BLOCKED", Some(reason.as_str().to_string()))?;
        self.apply(|s| s.block(reason), Some(episode))?;

        self.parts.metrics.increment_failovers_blocked();
        self.last_block_alert = Some(Instant::now());

        let lag_ms = self
            .lag
            .get(&target)
            .and_then(|(_, ms)| *ms)
            .map(|ms| ms.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Logger::event(
            Event::FailoverBlocked,
            &[
                ("episode_id", &episode_id.to_string()),
                ("lag_ms", &lag_ms),
                ("reason", reason.as_str()),
                ("target", target.as_str()),
            ],
        );
        self.alert(
            LifecycleEvent::new(EventKind::FailoverBlocked, "failover held back")
                .with_episode(episode_id)
                .with_field("lag_ms", lag_ms)
                .with_field("reason", reason.as_str())
                .with_field("target", &target),
        )
        .await;
        Ok(())
    }

    /// SUSPECT | BLOCKED → HEALTHY.
    async fn abort_episode(&mut self, detail: &str) -> EngineResult<()> {
        let episode_id = self.state.episode_id();
        let already_closed = matches!(
            self.state,
            FailoverState::Blocked { reason, .. } if reason.episode_aborted()
        );

        if already_closed {
            self.apply(FailoverState::abort, None)?;
        } else {
            let mut episode = self.current_episode()?;
            episode.finish("HEALTHY", EpisodeOutcome::Aborted, Some(detail.to_string()))?;
            self.apply(FailoverState::abort, Some(episode))?;
        }
        self.last_block_alert = None;

        let id = episode_id.map(|id| id.to_string()).unwrap_or_default();
        Logger::event(Event::EpisodeAborted, &[("episode_id", &id), ("reason", detail)]);

        let mut event = LifecycleEvent::new(EventKind::EpisodeAborted, detail);
        if let Some(episode_id) = episode_id {
            event = event.with_episode(episode_id);
        }
        self.alert(event).await;
        Ok(())
    }

    /// SUSPECT | BLOCKED → FAILING_OVER and run the promotion.
    async fn execute_failover(&mut self) -> EngineResult<()> {
        let mut episode = self.current_episode()?;
        episode.claim_failover()?;
        let episode_id = episode.episode_id;
        let old = self.region(&episode.from_region)?;
        let target = self.region(&episode.to_region)?;

        // The claim is durable before anything touches a cluster
        self.apply(FailoverState::begin_failover, Some(episode))?;
        self.last_block_alert = None;

        Logger::event(
            Event::FailoverBegin,
            &[
                ("episode_id", &episode_id.to_string()),
                ("from", old.region_id.as_str()),
                ("to", target.region_id.as_str()),
            ],
        );
        self.alert(
            LifecycleEvent::new(EventKind::FailoverStarted, "promoting secondary region")
                .with_episode(episode_id)
                .with_field("from", &old.region_id)
                .with_field("to", &target.region_id),
        )
        .await;

        self.parts.gate.begin_failover();
        if !self
            .parts
            .gate
            .wait_for_rotation_idle(self.settings.rotation_wait_timeout)
            .await
        {
            return self
                .abandon_attempt(
                    BlockReason::RotationInFlight,
                    "credential rotation still holds the change gate",
                )
                .await;
        }

        let cancel = CancelFlag::new();
        if self.shutdown.is_cancelled() || !self.parts.lease.is_leader() {
            cancel.cancel();
        }

        match self
            .parts
            .promotion
            .execute(episode_id, &old, &target, &cancel)
            .await
        {
            Ok(report) => self.on_promoted(report, target).await,
            Err(e @ PromotionError::Cancelled { .. }) => {
                self.abandon_attempt(BlockReason::Cancelled, &e.to_string())
                    .await
            }
            Err(e @ PromotionError::FencingFailed { .. }) => {
                self.abandon_attempt(BlockReason::FencingFailed, &e.to_string())
                    .await
            }
            Err(e) => self.on_promotion_failed(e, &old).await,
        }
    }

    /// Nothing irreversible happened; close the episode and hold in BLOCKED.
    async fn abandon_attempt(&mut self, reason: BlockReason, detail: &str) -> EngineResult<()> {
        let mut episode = self.current_episode()?;
        let episode_id = episode.episode_id;
        episode.blocked_reason = Some(reason);
        episode.finish(
            "BLOCKED",
            EpisodeOutcome::Aborted,
            Some(format!("{}: {}", reason, detail)),
        )?;
        self.settle(|s| s.block(reason), Some(episode))?;

        self.parts.gate.end_failover();
        self.parts.metrics.increment_failovers_blocked();
        self.last_block_alert = Some(Instant::now());

        Logger::event(
            Event::EpisodeAborted,
            &[
                ("episode_id", &episode_id.to_string()),
                ("reason", reason.as_str()),
            ],
        );
        let kind = match reason {
            BlockReason::FencingFailed => EventKind::FencingFailed,
            _ => EventKind::EpisodeAborted,
        };
        self.alert(
            LifecycleEvent::new(kind, detail)
                .with_episode(episode_id)
                .with_field("reason", reason.as_str()),
        )
        .await;
        Ok(())
    }

    async fn on_promoted(
        &mut self,
        report: PromotionReport,
        target: RegionRecord,
    ) -> EngineResult<()> {
        let mut episode = self.current_episode()?;
        let episode_id = episode.episode_id;
        let from = episode.from_region.clone();

        self.parts
            .registry
            .commit_promotion(&from, &episode.to_region)?;
        // Lag history belongs to the old roles
        self.lag.remove(&from);
        self.lag.remove(&episode.to_region);
        self.former_primary = Some(from);

        episode.final_lag_ms = Some(report.final_lag.as_millis() as u64);
        episode.advance("FAILING_OVER", Some("promoted".into()))?;
        self.persist(episode)?;

        self.alert(
            LifecycleEvent::new(EventKind::PromotionSucceeded, "secondary is writer-capable")
                .with_episode(episode_id)
                .with_field("elapsed_ms", report.elapsed.as_millis())
                .with_field("final_lag_ms", report.final_lag.as_millis())
                .with_field("region", &target.region_id),
        )
        .await;

        self.pending_cutover = Some(PendingCutover {
            report,
            endpoint: target.endpoint,
            degraded_alerted: false,
        });
        self.try_cut_over().await
    }

    async fn try_cut_over(&mut self) -> EngineResult<()> {
        let result = match &self.pending_cutover {
            Some(pending) => {
                self.parts
                    .traffic
                    .cut_over(&pending.report, &pending.endpoint)
                    .await
            }
            None => return Ok(()),
        };

        match result {
            Ok(receipt) => {
                self.pending_cutover = None;
                let mut episode = self.current_episode()?;
                let episode_id = episode.episode_id;
                episode.finish("FAILED_OVER", EpisodeOutcome::FailedOver, None)?;
                self.settle(FailoverState::complete_failover, Some(episode))?;
                self.parts.gate.end_failover();

                self.alert(
                    LifecycleEvent::new(EventKind::DnsCutover, "routing updated")
                        .with_episode(episode_id)
                        .with_field("attempts", receipt.attempts)
                        .with_field("record", &receipt.record)
                        .with_field("target", &receipt.target),
                )
                .await;
                self.alert(
                    LifecycleEvent::new(EventKind::FailedOver, "failover complete")
                        .with_episode(episode_id),
                )
                .await;
                Ok(())
            }
            Err(e) => {
                if !matches!(
                    self.state,
                    FailoverState::FailingOver {
                        dns_pending: true,
                        ..
                    }
                ) {
                    let mut episode = self.current_episode()?;
                    episode.advance("FAILING_OVER", Some(format!("dns pending: {}", e)))?;
                    self.settle(FailoverState::mark_dns_pending, Some(episode))?;
                }

                let first_report = self
                    .pending_cutover
                    .as_mut()
                    .map(|p| !std::mem::replace(&mut p.degraded_alerted, true))
                    .unwrap_or(false);
                if first_report {
                    let mut event = LifecycleEvent::new(
                        EventKind::DnsDegraded,
                        "routing update failing, retrying every tick",
                    )
                    .with_field("error", e.to_string());
                    if let Some(episode_id) = self.state.episode_id() {
                        event = event.with_episode(episode_id);
                    }
                    self.alert(event).await;
                }
                Ok(())
            }
        }
    }

    /// Fencing may have happened; freeze and hand over to an operator.
    async fn on_promotion_failed(
        &mut self,
        error: PromotionError,
        old: &RegionRecord,
    ) -> EngineResult<()> {
        let mut episode = self.current_episode()?;
        let episode_id = episode.episode_id;
        episode.finish(
            "FAILOVER_FAILED",
            EpisodeOutcome::FailoverFailed,
            Some(format!("{}: {}", error.kind_str(), error)),
        )?;
        self.settle(FailoverState::fail_failover, Some(episode))?;
        self.parts.registry.set_fenced(&old.region_id, true)?;
        self.parts.metrics.increment_promotions_failed();

        Logger::event(
            Event::PromotionFailed,
            &[
                ("episode_id", &episode_id.to_string()),
                ("error", &error.to_string()),
                ("kind", error.kind_str()),
            ],
        );
        self.raise_manual_alert(episode_id, &error.to_string()).await;
        Ok(())
    }

    async fn raise_manual_alert(&mut self, episode_id: Uuid, detail: &str) {
        if !self.failure_alerted.insert(episode_id) {
            return;
        }
        self.alert(
            LifecycleEvent::new(
                EventKind::FailoverFailed,
                "manual intervention required: promotion failed after fencing",
            )
            .with_episode(episode_id)
            .with_field("error", detail),
        )
        .await;
    }

    /// FAILED_OVER | RECOVERING → RECOVERING, then rebuild and catch up.
    async fn begin_recovery(&mut self) -> EngineResult<()> {
        let state = self.state.state_name();
        let former_id = self.former_primary.clone().ok_or_else(|| {
            EngineError::command_rejected("rebalance", state, "no former primary recorded")
        })?;
        if self.verdict_of(&former_id) != HealthVerdict::Healthy {
            return Err(EngineError::command_rejected(
                "rebalance",
                state,
                format!("former primary {} is not healthy", former_id),
            ));
        }

        let former = self.region(&former_id)?;
        let primary = self
            .parts
            .registry
            .primary()
            .ok_or(RegionError::SplitBrain { primaries: 0 })?;

        if let Some(mut stale) = self.active.clone() {
            if stale.kind == EpisodeKind::Recovery {
                stale.finish(
                    "RECOVERING",
                    EpisodeOutcome::Aborted,
                    Some("superseded by a new recovery request".into()),
                )?;
                self.parts.lease.ensure_leader()?;
                self.persist(stale)?;
            }
        }

        let episode = FailoverEpisode::open(
            EpisodeKind::Recovery,
            former_id.clone(),
            primary.region_id.clone(),
            "RECOVERING",
        );
        let episode_id = episode.episode_id;
        self.apply(|s| s.begin_recovery(episode_id), Some(episode))?;

        Logger::event(
            Event::RecoveryBegin,
            &[
                ("episode_id", &episode_id.to_string()),
                ("former_primary", former_id.as_str()),
                ("primary", primary.region_id.as_str()),
            ],
        );
        self.alert(
            LifecycleEvent::new(EventKind::RecoveryStarted, "rebuilding former primary")
                .with_episode(episode_id)
                .with_field("region", &former_id),
        )
        .await;

        if let Err(e) = self.parts.promotion.rebuild_replica(&former, &primary).await {
            return self
                .recovery_stalled(format!("re-provision failed: {}", e))
                .await;
        }

        let caught_up = self
            .parts
            .promotion
            .await_catch_up(
                &former.cluster_id,
                self.settings.catch_up_bound,
                self.settings.catch_up_timeout,
            )
            .await;

        match caught_up {
            Ok(lag) => {
                self.parts.registry.set_fenced(&former_id, false)?;
                let mut episode = self.current_episode()?;
                episode.final_lag_ms = Some(lag.as_millis() as u64);
                episode.finish("HEALTHY", EpisodeOutcome::Recovered, None)?;
                self.apply(FailoverState::complete_recovery, Some(episode))?;
                self.former_primary = None;

                Logger::event(
                    Event::RecoveryComplete,
                    &[
                        ("episode_id", &episode_id.to_string()),
                        ("lag_ms", &lag.as_millis().to_string()),
                    ],
                );
                self.alert(
                    LifecycleEvent::new(EventKind::RecoveryCompleted, "replica caught up")
                        .with_episode(episode_id)
                        .with_field("region", &former_id),
                )
                .await;
                Ok(())
            }
            Err(e) => self.recovery_stalled(e.to_string()).await,
        }
    }

    async fn recovery_stalled(&mut self, detail: String) -> EngineResult<()> {
        let mut episode = self.current_episode()?;
        let episode_id = episode.episode_id;
        episode.advance("RECOVERING", Some(detail.clone()))?;
        self.persist(episode)?;

        self.alert(
            LifecycleEvent::new(EventKind::RecoveryStalled, "recovery did not complete")
                .with_episode(episode_id)
                .with_field("error", detail),
        )
        .await;
        Ok(())
    }

    /// FAILOVER_FAILED → HEALTHY with an operator-declared primary.
    async fn resolve_manually(&mut self, primary: RegionId) -> EngineResult<()> {
        self.region(&primary)?;
        let from = self
            .last
            .as_ref()
            .map(|e| e.from_region.clone())
            .unwrap_or_else(|| primary.clone());

        let mut episode = FailoverEpisode::open(
            EpisodeKind::ManualResolution,
            from,
            primary.clone(),
            "HEALTHY",
        );
        let episode_id = episode.episode_id;
        episode.finish(
            "HEALTHY",
            EpisodeOutcome::Resolved,
            Some("primary declared by operator".into()),
        )?;
        self.apply(FailoverState::resolve_manually, Some(episode))?;

        self.parts.registry.assign_primary(&primary)?;
        self.lag.clear();
        self.former_primary = None;
        self.pending_cutover = None;
        self.parts.gate.end_failover();

        self.alert(
            LifecycleEvent::new(EventKind::ManualResolution, "engine unfrozen by operator")
                .with_episode(episode_id)
                .with_field("primary", &primary),
        )
        .await;
        Ok(())
    }

    /// Leader-checked transition.
    fn apply(
        &mut self,
        transition: impl FnOnce(FailoverState) -> EngineResult<FailoverState>,
        episode: Option<FailoverEpisode>,
    ) -> EngineResult<()> {
        self.parts.lease.ensure_leader()?;
        self.settle(transition, episode)
    }

    /// Record the outcome of a step already taken.
    fn settle(
        &mut self,
        transition: impl FnOnce(FailoverState) -> EngineResult<FailoverState>,
        episode: Option<FailoverEpisode>,
    ) -> EngineResult<()> {
        let next = transition(self.state.clone())?;
        if let Some(episode) = episode {
            self.persist(episode)?;
        }

        let from = self.state.state_name();
        self.state = next;
        let episode_id = self
            .state
            .episode_id()
            .map(|id| id.to_string())
            .unwrap_or_default();
        Logger::event(
            Event::StateTransition,
            &[
                ("episode_id", &episode_id),
                ("from", from),
                ("to", self.state.state_name()),
            ],
        );
        self.publish_status();
        Ok(())
    }

    fn persist(&mut self, episode: FailoverEpisode) -> EngineResult<()> {
        if let Err(e) = self.parts.journal.append(&episode) {
            Logger::event(
                Event::JournalFailed,
                &[
                    ("episode_id", &episode.episode_id.to_string()),
                    ("error", &e.to_string()),
                ],
            );
            return Err(e.into());
        }

        if episode.is_terminal() {
            if self.active.as_ref().map(|a| a.episode_id) == Some(episode.episode_id) {
                self.active = None;
            }
            self.last = Some(episode);
        } else {
            self.active = Some(episode);
        }
        Ok(())
    }

    fn current_episode(&self) -> EngineResult<FailoverEpisode> {
        self.active.clone().ok_or(EngineError::NoActiveEpisode {
            state: self.state.state_name(),
        })
    }

    fn region(&self, region_id: &RegionId) -> EngineResult<RegionRecord> {
        self.parts
            .registry
            .get(region_id)
            .ok_or_else(|| RegionError::UnknownRegion(region_id.to_string()).into())
    }

    fn is_target(&self, region_id: &RegionId) -> bool {
        self.active
            .as_ref()
            .map(|e| &e.to_region == region_id)
            .unwrap_or(false)
    }

    fn verdict_of(&self, region_id: &RegionId) -> HealthVerdict {
        self.health
            .get(region_id)
            .copied()
            .unwrap_or(HealthVerdict::Healthy)
    }

    fn lag_of(&self, region_id: &RegionId) -> LagVerdict {
        self.lag
            .get(region_id)
            .map(|(verdict, _)| *verdict)
            .unwrap_or(LagVerdict::Unknown)
    }

    /// Healthiest secondary: healthy, unfenced, lag within bound, lowest lag.
    fn choose_target(&self) -> EngineResult<RegionId> {
        self.parts
            .registry
            .secondaries()
            .into_iter()
            .min_by_key(|r| {
                let id = &r.region_id;
                let lag_rank = match self.lag_of(id) {
                    LagVerdict::WithinBound => 0u8,
                    LagVerdict::Unknown => 1,
                    LagVerdict::Degraded => 2,
                };
                let lag_ms = self.lag.get(id).and_then(|(_, ms)| *ms).unwrap_or(u64::MAX);
                (
                    self.verdict_of(id) == HealthVerdict::Unhealthy,
                    r.fenced,
                    lag_rank,
                    lag_ms,
                    id.clone(),
                )
            })
            .map(|r| r.region_id)
            .ok_or(EngineError::NoTarget)
    }

    async fn alert(&self, event: LifecycleEvent) {
        deliver(self.parts.notifier.as_ref(), &self.parts.metrics, event).await;
    }

    fn publish_status(&self) {
        self.parts.status.publish(EngineView {
            state: self.state.clone(),
            leader: self.was_leader,
            fencing_token: self.parts.lease.fencing_token(),
            active_episode: self.active.clone(),
            last_episode: self.last.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::journal::MemoryJournal;
    use crate::engine::lease::MemoryLeaderLock;
    use crate::notify::MemoryNotifier;
    use crate::promotion::PromotionSettings;
    use crate::region::RegionRole;
    use crate::sim::{SimCluster, SimRouting};
    use crate::traffic::TrafficSettings;

    struct Fixture {
        engine: DecisionEngine,
        cluster: Arc<SimCluster>,
        routing: Arc<SimRouting>,
        notifier: MemoryNotifier,
        journal: Arc<MemoryJournal>,
        registry: Arc<RegionRegistry>,
        gate: Arc<ChangeGate>,
    }

    fn regions() -> Vec<RegionRecord> {
        vec![
            RegionRecord::new("use1", RegionRole::Primary, "db.use1.internal:5432", "c-use1"),
            RegionRecord::new("usw2", RegionRole::Secondary, "db.usw2.internal:5432", "c-usw2"),
        ]
    }

    async fn fixture_with(journal: Arc<MemoryJournal>, settings: EngineSettings) -> Fixture {
        let metrics = Arc::new(MetricsRegistry::new());
        let registry = Arc::new(RegionRegistry::new(regions()).unwrap());
        let cluster = Arc::new(SimCluster::from_regions(&regions()));
        let routing = Arc::new(SimRouting::new());
        let notifier = MemoryNotifier::new();
        let gate = Arc::new(ChangeGate::new());

        let lease = Arc::new(LeaseHandle::new(
            Arc::new(MemoryLeaderLock::new()),
            "node-a",
            Duration::from_secs(3600),
            metrics.clone(),
        ));
        lease.acquire().await.unwrap();

        let parts = EngineParts {
            registry: registry.clone(),
            promotion: Arc::new(PromotionCoordinator::new(
                cluster.clone(),
                PromotionSettings::default(),
                metrics.clone(),
            )),
            traffic: Arc::new(TrafficController::new(
                routing.clone(),
                TrafficSettings {
                    record_name: "db.example.com".into(),
                    ..TrafficSettings::default()
                },
                metrics.clone(),
            )),
            notifier: Arc::new(notifier.clone()),
            journal: journal.clone(),
            lease,
            gate: gate.clone(),
            status: Arc::new(StatusBoard::new(registry.clone())),
            metrics,
        };

        Fixture {
            engine: DecisionEngine::new(parts, settings),
            cluster,
            routing,
            notifier,
            journal,
            registry,
            gate,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(Arc::new(MemoryJournal::new()), EngineSettings::default()).await
    }

    fn lag_ok(region: &str, ms: u64) -> Signal {
        Signal::LagRecovered {
            region_id: region.into(),
            lag_ms: ms,
            at: Utc::now(),
        }
    }

    fn lag_bad(region: &str, ms: u64) -> Signal {
        Signal::LagDegraded {
            region_id: region.into(),
            lag_ms: Some(ms),
            at: Utc::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failover_when_lag_within_bound() {
        let mut f = fixture().await;
        f.engine.handle(lag_ok("usw2", 50)).await.unwrap();
        f.engine
            .handle(Signal::health("use1", HealthVerdict::Unhealthy))
            .await
            .unwrap();

        assert!(matches!(f.engine.state(), FailoverState::FailedOver { .. }));
        assert_eq!(f.registry.primary().unwrap().region_id.as_str(), "usw2");
        assert_eq!(f.cluster.promote_count("c-usw2"), 1);
        assert_eq!(f.routing.current("db.example.com").as_deref(), Some("db.usw2.internal"));
        assert!(!f.gate.failover_active());

        let last = f.engine.last_episode().unwrap();
        assert_eq!(last.outcome, EpisodeOutcome::FailedOver);
        assert_eq!(f.notifier.count(EventKind::FailedOver), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_lag_blocks_then_recovers() {
        let mut f = fixture().await;
        f.engine
            .handle(Signal::health("use1", HealthVerdict::Unhealthy))
            .await
            .unwrap();

        assert!(matches!(
            f.engine.state(),
            FailoverState::Blocked {
                reason: BlockReason::LagUnknown,
                ..
            }
        ));
        assert_eq!(f.cluster.promote_count("c-usw2"), 0);

        f.engine.handle(lag_ok("usw2", 20)).await.unwrap();
        assert!(matches!(f.engine.state(), FailoverState::FailedOver { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_aborts_when_primary_returns() {
        let mut f = fixture().await;
        f.engine.handle(lag_bad("usw2", 5000)).await.unwrap();
        f.engine
            .handle(Signal::health("use1", HealthVerdict::Unhealthy))
            .await
            .unwrap();
        f.engine
            .handle(Signal::health("use1", HealthVerdict::Healthy))
            .await
            .unwrap();

        assert_eq!(f.engine.state(), &FailoverState::Healthy);
        assert_eq!(f.engine.last_episode().unwrap().outcome, EpisodeOutcome::Aborted);
        assert!(f.cluster.calls().iter().all(|c| !c.starts_with("fence")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_escalation_on_tick() {
        let settings = EngineSettings {
            escalation_interval: Duration::from_secs(60),
            ..EngineSettings::default()
        };
        let mut f = fixture_with(Arc::new(MemoryJournal::new()), settings).await;
        f.engine.handle(lag_bad("usw2", 5000)).await.unwrap();
        f.engine
            .handle(Signal::health("use1", HealthVerdict::Unhealthy))
            .await
            .unwrap();

        f.engine.handle(Signal::tick()).await.unwrap();
        assert_eq!(f.notifier.count(EventKind::BlockEscalated), 0);

        tokio::time::advance(Duration::from_secs(61)).await;
        f.engine.handle(Signal::tick()).await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        f.engine.handle(Signal::tick()).await.unwrap();

        assert_eq!(f.notifier.count(EventKind::BlockEscalated), 2);
        assert!(matches!(
            f.engine.state(),
            FailoverState::Blocked { escalation: 2, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fencing_failure_aborts_and_retry_opens_new_episode() {
        let mut f = fixture().await;
        f.cluster.set_fence_failure("c-use1", true);
        f.engine.handle(lag_ok("usw2", 10)).await.unwrap();
        f.engine
            .handle(Signal::health("use1", HealthVerdict::Unhealthy))
            .await
            .unwrap();

        let first = f.engine.state().episode_id().unwrap();
        assert!(matches!(
            f.engine.state(),
            FailoverState::Blocked {
                reason: BlockReason::FencingFailed,
                ..
            }
        ));
        assert_eq!(f.registry.primary().unwrap().region_id.as_str(), "use1");
        assert_eq!(f.notifier.count(EventKind::FencingFailed), 1);

        // Still blocked until an operator retries
        f.engine.handle(lag_ok("usw2", 10)).await.unwrap();
        assert_eq!(f.engine.state().episode_id(), Some(first));

        f.cluster.set_fence_failure("c-use1", false);
        f.engine
            .handle(Signal::Operator(OperatorCommand::RetryFailover))
            .await
            .unwrap();

        assert!(matches!(f.engine.state(), FailoverState::FailedOver { .. }));
        assert_ne!(f.engine.state().episode_id(), Some(first));
    }

    #[tokio::test(start_paused = true)]
    async fn test_promotion_timeout_freezes_engine() {
        let mut f = fixture().await;
        f.cluster.set_promote_stalls("c-usw2", true);
        f.engine.handle(lag_ok("usw2", 10)).await.unwrap();
        f.engine
            .handle(Signal::health("use1", HealthVerdict::Unhealthy))
            .await
            .unwrap();

        assert!(f.engine.state().is_frozen());
        assert!(f.cluster.is_fenced("c-use1"));
        assert!(f.registry.get(&"use1".into()).unwrap().fenced);
        assert!(f.gate.failover_active());

        // Frozen: nothing automatic happens, commands other than resolve are rejected
        f.engine
            .handle(Signal::health("use1", HealthVerdict::Healthy))
            .await
            .unwrap();
        f.engine.handle(Signal::tick()).await.unwrap();
        let rejected = f
            .engine
            .handle(Signal::Operator(OperatorCommand::RebalanceRequested))
            .await;
        assert!(matches!(rejected, Err(EngineError::CommandRejected { .. })));
        assert!(f.engine.state().is_frozen());
        assert_eq!(f.notifier.count(EventKind::FailoverFailed), 1);
        assert_eq!(f.cluster.promote_count("c-usw2"), 1);

        f.engine
            .handle(Signal::Operator(OperatorCommand::ResolveManually {
                primary: "usw2".into(),
            }))
            .await
            .unwrap();
        assert_eq!(f.engine.state(), &FailoverState::Healthy);
        assert_eq!(f.registry.primary().unwrap().region_id.as_str(), "usw2");
        assert!(!f.gate.failover_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dns_pending_retries_on_tick() {
        let mut f = fixture().await;
        f.routing.fail_next(5);
        f.engine.handle(lag_ok("usw2", 10)).await.unwrap();
        f.engine
            .handle(Signal::health("use1", HealthVerdict::Unhealthy))
            .await
            .unwrap();

        assert!(matches!(
            f.engine.state(),
            FailoverState::FailingOver {
                dns_pending: true,
                ..
            }
        ));
        assert_eq!(f.registry.primary().unwrap().region_id.as_str(), "usw2");
        assert_eq!(f.notifier.count(EventKind::DnsDegraded), 1);

        f.engine.handle(Signal::tick()).await.unwrap();
        assert!(matches!(f.engine.state(), FailoverState::FailedOver { .. }));
        assert_eq!(f.cluster.promote_count("c-usw2"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rebalance_rebuilds_former_primary() {
        let mut f = fixture().await;
        f.engine.handle(lag_ok("usw2", 10)).await.unwrap();
        f.engine
            .handle(Signal::health("use1", HealthVerdict::Unhealthy))
            .await
            .unwrap();

        let early = f
            .engine
            .handle(Signal::Operator(OperatorCommand::RebalanceRequested))
            .await;
        assert!(matches!(early, Err(EngineError::CommandRejected { .. })));

        f.engine
            .handle(Signal::health("use1", HealthVerdict::Healthy))
            .await
            .unwrap();
        f.engine
            .handle(Signal::Operator(OperatorCommand::RebalanceRequested))
            .await
            .unwrap();

        assert_eq!(f.engine.state(), &FailoverState::Healthy);
        assert!(f.cluster.calls().contains(&"reprovision:c-use1".to_string()));
        assert!(!f.registry.get(&"use1".into()).unwrap().fenced);
        assert_eq!(f.engine.last_episode().unwrap().kind, EpisodeKind::Recovery);
        assert_eq!(f.registry.primary_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_stalls_on_catch_up_timeout() {
        let settings = EngineSettings {
            catch_up_timeout: Duration::from_secs(30),
            ..EngineSettings::default()
        };
        let mut f = fixture_with(Arc::new(MemoryJournal::new()), settings).await;
        f.cluster.set_rebuild_lag(Duration::from_secs(120));
        f.engine.handle(lag_ok("usw2", 10)).await.unwrap();
        f.engine
            .handle(Signal::health("use1", HealthVerdict::Unhealthy))
            .await
            .unwrap();
        f.engine
            .handle(Signal::health("use1", HealthVerdict::Healthy))
            .await
            .unwrap();
        f.engine
            .handle(Signal::Operator(OperatorCommand::RebalanceRequested))
            .await
            .unwrap();

        assert!(matches!(f.engine.state(), FailoverState::Recovering { .. }));
        assert_eq!(f.notifier.count(EventKind::RecoveryStalled), 1);

        f.cluster.set_rebuild_lag(Duration::ZERO);
        f.engine
            .handle(Signal::Operator(OperatorCommand::RebalanceRequested))
            .await
            .unwrap();
        assert_eq!(f.engine.state(), &FailoverState::Healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_mid_promotion_freezes() {
        let journal = Arc::new(MemoryJournal::new());
        let mut in_flight =
            FailoverEpisode::open(EpisodeKind::Failover, "use1".into(), "usw2".into(), "SUSPECT");
        in_flight.claim_failover().unwrap();
        journal.append(&in_flight).unwrap();

        let mut f = fixture_with(journal, EngineSettings::default()).await;
        f.engine.handle(Signal::tick()).await.unwrap();

        assert_eq!(
            f.engine.state(),
            &FailoverState::FailoverFailed {
                episode_id: in_flight.episode_id
            }
        );
        assert_eq!(f.notifier.count(EventKind::FailoverFailed), 1);
        assert_eq!(f.journal.len(), 2);

        // No second promotion for the same episode, even if lag is fine
        f.engine.handle(lag_ok("usw2", 10)).await.unwrap();
        assert_eq!(f.cluster.promote_count("c-usw2"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreadable_journal_freezes_new_leader() {
        let journal = Arc::new(MemoryJournal::new());
        journal.set_unreadable(true);
        let mut f = fixture_with(journal.clone(), EngineSettings::default()).await;

        f.engine.handle(lag_ok("usw2", 10)).await.unwrap();
        f.engine
            .handle(Signal::health("use1", HealthVerdict::Unhealthy))
            .await
            .unwrap();
        f.engine.handle(Signal::tick()).await.unwrap();

        assert_eq!(f.engine.state(), &FailoverState::RestoreFailed);
        assert_eq!(f.cluster.promote_count("c-usw2"), 0);
        assert!(f.cluster.calls().is_empty());
        assert!(f.journal.is_empty());
        assert!(f.gate.failover_active());
        assert_eq!(f.notifier.count(EventKind::RestoreFailed), 1);

        let retry = f
            .engine
            .handle(Signal::Operator(OperatorCommand::RetryFailover))
            .await;
        assert!(matches!(retry, Err(EngineError::CommandRejected { .. })));

        // Resolution needs a readable journal
        let resolve = OperatorCommand::ResolveManually {
            primary: "usw2".into(),
        };
        let still_broken = f.engine.handle(Signal::Operator(resolve.clone())).await;
        assert!(matches!(still_broken, Err(EngineError::Journal(_))));
        assert_eq!(f.engine.state(), &FailoverState::RestoreFailed);

        journal.set_unreadable(false);
        f.engine.handle(Signal::Operator(resolve)).await.unwrap();

        assert_eq!(f.engine.state(), &FailoverState::Healthy);
        assert_eq!(f.registry.primary().unwrap().region_id.as_str(), "usw2");
        assert!(!f.gate.failover_active());
        assert_eq!(f.notifier.count(EventKind::RestoreFailed), 1);
        assert_eq!(f.notifier.count(EventKind::ManualResolution), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_keeps_abandoned_block() {
        let journal = Arc::new(MemoryJournal::new());
        let mut abandoned =
            FailoverEpisode::open(EpisodeKind::Failover, "use1".into(), "usw2".into(), "SUSPECT");
        abandoned.claim_failover().unwrap();
        abandoned.blocked_reason = Some(BlockReason::FencingFailed);
        abandoned
            .finish("BLOCKED", EpisodeOutcome::Aborted, Some("fence refused".into()))
            .unwrap();
        journal.append(&abandoned).unwrap();

        let mut f = fixture_with(journal, EngineSettings::default()).await;
        f.engine.handle(lag_ok("usw2", 10)).await.unwrap();

        assert_eq!(
            f.engine.state(),
            &FailoverState::Blocked {
                episode_id: abandoned.episode_id,
                reason: BlockReason::FencingFailed,
                escalation: 0,
            }
        );
        assert_eq!(f.registry.primary().unwrap().region_id.as_str(), "use1");
        assert_eq!(f.cluster.promote_count("c-usw2"), 0);

        f.engine
            .handle(Signal::health("use1", HealthVerdict::Unhealthy))
            .await
            .unwrap();
        f.engine
            .handle(Signal::Operator(OperatorCommand::RetryFailover))
            .await
            .unwrap();

        assert!(matches!(f.engine.state(), FailoverState::FailedOver { .. }));
        assert_ne!(f.engine.state().episode_id(), Some(abandoned.episode_id));
        assert_eq!(f.cluster.promote_count("c-usw2"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_leader_does_not_act() {
        let mut f = fixture().await;
        f.engine.parts.lease.release().await;

        f.engine.handle(lag_ok("usw2", 10)).await.unwrap();
        f.engine
            .handle(Signal::health("use1", HealthVerdict::Unhealthy))
            .await
            .unwrap();
        assert_eq!(f.engine.state(), &FailoverState::Healthy);
        assert!(f.journal.is_empty());

        let command = f
            .engine
            .handle(Signal::Operator(OperatorCommand::RetryFailover))
            .await;
        assert!(matches!(command, Err(EngineError::Lease(LeaseError::NotLeader))));
    }
}
