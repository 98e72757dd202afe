//! CLI command implementations
//!
//! `run` owns the process until interrupted. `status` and `check-config`
//! are one-shot: they read files, print one JSON object and exit. Neither
//! of them takes the leader lease or touches a control plane.

use std::path::Path;

use serde_json::{json, Value};
use tokio::sync::watch;

use crate::config::OrchestratorConfig;
use crate::engine::{latest_versions, EpisodeKind, EpisodeOutcome, FailoverEpisode, FileJournal};
use crate::observability::{Event, Logger};
use crate::orchestrator::{Backends, Orchestrator};

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::write_response;

/// Dispatch a parsed command
pub fn run_command(command: Command) -> CliResult<()> {
    match command {
        Command::Run { config } => run(&config),
        Command::Status { config } => status(&config),
        Command::CheckConfig { config } => check_config(&config),
    }
}

fn load_config(path: &Path) -> CliResult<OrchestratorConfig> {
    let config = OrchestratorConfig::load(path)?;
    Logger::event(
        Event::ConfigLoaded,
        &[
            ("path", &path.display().to_string()),
            ("regions", &config.regions.len().to_string()),
        ],
    );
    Ok(config)
}

/// Start the control loop with simulated control planes; Ctrl-C stops it.
pub fn run(config_path: &Path) -> CliResult<()> {
    Logger::event(
        Event::BootStart,
        &[("config", &config_path.display().to_string())],
    );
    let config = load_config(config_path)?;

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::run_failed(format!("failed to start runtime: {}", e)))?;

    runtime.block_on(async move {
        let orchestrator = Orchestrator::build(&config, Backends::simulated(&config))?;

        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = stop_tx.send(true);
            }
        });

        orchestrator.run(stop_rx).await?;
        Ok::<(), CliError>(())
    })
}

/// Print the failover status recorded in the episode journal.
pub fn status(config_path: &Path) -> CliResult<()> {
    let config = load_config(config_path)?;
    let episodes = FileJournal::read(&config.journal_path)?;
    write_response(status_report(&config, episodes))
}

/// Validate the configuration and print what it resolves to.
pub fn check_config(config_path: &Path) -> CliResult<()> {
    let config = load_config(config_path)?;
    write_response(config_summary(&config))
}

/// Journal-derived status.
///
/// The primary is what the latest episode left behind; it is `null` while a
/// failed promotion awaits manual resolution.
pub fn status_report(config: &OrchestratorConfig, records: Vec<FailoverEpisode>) -> Value {
    let episodes = latest_versions(records);
    let seeded_primary = config
        .region_records()
        .into_iter()
        .find(|r| r.is_primary())
        .map(|r| r.region_id.as_str().to_string());

    let latest = episodes.last();
    let primary = match latest {
        None => seeded_primary,
        Some(ep) => match (ep.kind, ep.outcome) {
            (EpisodeKind::Failover, EpisodeOutcome::FailoverFailed) => None,
            (EpisodeKind::Failover, EpisodeOutcome::Aborted) => {
                Some(ep.from_region.as_str().to_string())
            }
            (EpisodeKind::Failover, EpisodeOutcome::InProgress) if ep.final_lag_ms.is_none() => {
                Some(ep.from_region.as_str().to_string())
            }
            _ => Some(ep.to_region.as_str().to_string()),
        },
    };
    let frozen = matches!(
        latest,
        Some(ep) if ep.kind == EpisodeKind::Failover && ep.outcome == EpisodeOutcome::FailoverFailed
    );
    let open = episodes
        .iter()
        .rev()
        .find(|ep| ep.outcome == EpisodeOutcome::InProgress);
    let last_closed = episodes.iter().rev().find(|ep| ep.is_terminal());

    json!({
        "journal": config.journal_path.display().to_string(),
        "episodes": episodes.len(),
        "primary": primary,
        "frozen": frozen,
        "open_episode": open,
        "last_episode": last_closed,
    })
}

/// Resolved settings, durations in the config's units.
pub fn config_summary(config: &OrchestratorConfig) -> Value {
    json!({
        "node_id": config.node_id,
        "regions": config.regions,
        "health": config.health,
        "lag": config.lag,
        "promotion": config.promotion,
        "dns": config.dns,
        "rotation": config.rotation,
        "engine": config.engine,
        "lease": config.lease,
        "http": config.http,
        "journal_path": config.journal_path,
        "alerts_path": config.alerts_path,
    })
}
