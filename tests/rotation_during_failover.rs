//! Credential rotation and failover
//!
//! Rotation and failover share the change gate: a rotation that comes due
//! while a promotion is in flight is deferred and retried after the episode
//! settles, and the previous credential stays active meanwhile.

mod common;

use std::time::Duration;

use common::{drill_config, elapse, Drill};
use dr_orchestrator::notify::EventKind;
use serde_json::json;

fn rotating_drill() -> Drill {
    let mut config = drill_config();
    config["rotation"] = json!({
        "enabled": true,
        "interval_secs": 40,
        "retry_delay_secs": 5,
        "grace_period_secs": 3600
    });
    Drill::with_config(config)
}

/// A rotation due mid-promotion waits for the failover to finish.
#[tokio::test(start_paused = true)]
async fn test_rotation_deferred_until_failover_settles() {
    let drill = rotating_drill();
    drill.lag("c-usw2", 50);
    drill
        .cluster
        .set_promote_delay("c-usw2", Duration::from_secs(60));
    let running = drill.start();

    elapse(5).await;
    drill.primary_down();
    elapse(10).await;
    assert_eq!(running.state(), "FAILING_OVER");
    assert!(running.gate.failover_active());

    // Rotation came due at t=40 and keeps being retried while failing over
    elapse(30).await;
    assert_eq!(running.state(), "FAILING_OVER");
    assert!(drill.alerts.count(EventKind::RotationDeferred) >= 1);
    assert_eq!(drill.secrets.active_version_id().as_deref(), Some("v0"));
    assert_eq!(drill.secrets.version_count(), 1);

    elapse(60).await;
    assert_eq!(running.state(), "FAILED_OVER");
    assert!(!running.gate.failover_active());
    assert_eq!(drill.alerts.count(EventKind::RotationCompleted), 1);
    assert_ne!(drill.secrets.active_version_id().as_deref(), Some("v0"));

    let deferred = running.metrics.snapshot().rotations_deferred;
    assert!(deferred >= 1);

    running.stop().await;
}

/// Without a failover the rotation runs on schedule.
#[tokio::test(start_paused = true)]
async fn test_rotation_runs_on_schedule() {
    let drill = rotating_drill();
    let running = drill.start();

    elapse(45).await;
    assert_eq!(drill.alerts.count(EventKind::RotationCompleted), 1);
    assert_eq!(drill.alerts.count(EventKind::RotationDeferred), 0);
    assert_eq!(drill.secrets.version_count(), 2);
    assert_eq!(running.state(), "HEALTHY");

    running.stop().await;
}
