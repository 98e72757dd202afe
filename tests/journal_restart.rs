//! Restart from the episode journal
//!
//! A new process over the same journal file picks up where the last one
//! stopped, and `drorch status` reads the same outcome from disk.

mod common;

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use common::{elapse, Drill};
use dr_orchestrator::cli::status_report;
use dr_orchestrator::engine::{EpisodeJournal, EpisodeOutcome, FileJournal};
use dr_orchestrator::status::StatusBoard;
use dr_orchestrator::Orchestrator;
use tokio::sync::watch;

/// Run one orchestrator process over the drill world with a file journal.
async fn run_process(
    drill: &Drill,
    journal: &Path,
    secs: u64,
) -> Arc<StatusBoard> {
    let mut config = drill.config.clone();
    config.journal_path = journal.to_path_buf();
    let mut backends = drill.backends();
    backends.journal = None;

    let orchestrator = Orchestrator::build(&config, backends).unwrap();
    let status = orchestrator.status();
    let (stop, stop_rx) = watch::channel(false);
    let task = tokio::spawn(orchestrator.run(stop_rx));

    elapse(secs).await;
    stop.send(true).unwrap();
    task.await.unwrap().unwrap();
    status
}

#[tokio::test(start_paused = true)]
async fn test_failed_over_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let journal = dir.path().join("episodes.log");
    let drill = Drill::new();
    drill.lag("c-usw2", 50);
    drill.primary_down();

    let first = run_process(&drill, &journal, 30).await;
    assert_eq!(first.snapshot().engine_state, "FAILED_OVER");

    let records = FileJournal::read(&journal).unwrap();
    assert!(records.len() >= 2);
    assert!(records
        .iter()
        .any(|e| e.outcome == EpisodeOutcome::FailedOver));

    let second = run_process(&drill, &journal, 5).await;
    let snapshot = second.snapshot();
    assert_eq!(snapshot.engine_state, "FAILED_OVER");
    let primary: Vec<_> = snapshot
        .regions
        .iter()
        .filter(|r| r.is_primary())
        .map(|r| r.region_id.as_str().to_string())
        .collect();
    assert_eq!(primary, vec!["usw2".to_string()]);
    assert_eq!(drill.cluster.promote_count("c-usw2"), 1);

    // The second process journaled nothing new
    assert_eq!(FileJournal::read(&journal).unwrap().len(), records.len());

    let report = status_report(&drill.config, FileJournal::read(&journal).unwrap());
    assert_eq!(report["primary"], "usw2");
    assert_eq!(report["frozen"], false);
}

/// A crash mid-append leaves half a record behind. The next process cuts it
/// off, and later appends stay readable.
#[tokio::test(start_paused = true)]
async fn test_torn_tail_is_cut_on_restart() {
    let dir = tempfile::tempdir().unwrap();
    let journal = dir.path().join("episodes.log");
    let drill = Drill::new();
    drill.lag("c-usw2", 50);
    drill.primary_down();

    let first = run_process(&drill, &journal, 30).await;
    assert_eq!(first.snapshot().engine_state, "FAILED_OVER");
    let records = FileJournal::read(&journal).unwrap();

    let mut file = OpenOptions::new().append(true).open(&journal).unwrap();
    file.write_all(br#"0badc0de {"episode_id":"#).unwrap();
    drop(file);

    let second = run_process(&drill, &journal, 5).await;
    assert_eq!(second.snapshot().engine_state, "FAILED_OVER");
    assert!(std::fs::read_to_string(&journal).unwrap().ends_with('\n'));

    let reopened = FileJournal::open(&journal).unwrap();
    reopened.append(&records[0]).unwrap();
    assert_eq!(reopened.load().unwrap().len(), records.len() + 1);
    assert_eq!(drill.cluster.promote_count("c-usw2"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_frozen_engine_stays_frozen_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let journal = dir.path().join("episodes.log");
    let drill = Drill::new();
    drill.lag("c-usw2", 50);
    drill.cluster.set_promote_stalls("c-usw2", true);
    drill.primary_down();

    let first = run_process(&drill, &journal, 400).await;
    assert_eq!(first.snapshot().engine_state, "FAILOVER_FAILED");

    let second = run_process(&drill, &journal, 30).await;
    assert_eq!(second.snapshot().engine_state, "FAILOVER_FAILED");
    assert_eq!(drill.cluster.promote_count("c-usw2"), 1);
    assert_eq!(
        drill.alerts.count(dr_orchestrator::notify::EventKind::FailoverFailed),
        1
    );

    let report = status_report(&drill.config, FileJournal::read(&journal).unwrap());
    assert!(report["primary"].is_null());
    assert_eq!(report["frozen"], true);
}
