//! Status board
//!
//! Read-only view of the control loop for the HTTP surface and the CLI. The
//! engine publishes after every signal; readers never block it for longer
//! than a clone.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::engine::{FailoverEpisode, FailoverState};
use crate::region::{RegionRecord, RegionRegistry};

/// What the engine last published.
#[derive(Debug, Clone, Default)]
pub struct EngineView {
    pub state: FailoverState,
    pub leader: bool,
    pub fencing_token: Option<u64>,
    pub active_episode: Option<FailoverEpisode>,
    pub last_episode: Option<FailoverEpisode>,
}

/// Point-in-time status.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub engine_state: &'static str,
    pub state: FailoverState,
    pub leader: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fencing_token: Option<u64>,
    pub regions: Vec<RegionRecord>,
    pub active_episode: Option<FailoverEpisode>,
    pub last_episode: Option<FailoverEpisode>,
    pub updated_at: DateTime<Utc>,
}

/// Shared status for queries.
#[derive(Debug)]
pub struct StatusBoard {
    registry: Arc<RegionRegistry>,
    view: RwLock<(EngineView, DateTime<Utc>)>,
}

impl StatusBoard {
    pub fn new(registry: Arc<RegionRegistry>) -> Self {
        Self {
            registry,
            view: RwLock::new((EngineView::default(), Utc::now())),
        }
    }

    /// Replace the engine view.
    pub fn publish(&self, view: EngineView) {
        if let Ok(mut current) = self.view.write() {
            *current = (view, Utc::now());
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let (view, updated_at) = self
            .view
            .read()
            .map(|v| v.clone())
            .unwrap_or_else(|_| (EngineView::default(), Utc::now()));

        StatusSnapshot {
            engine_state: view.state.state_name(),
            state: view.state,
            leader: view.leader,
            fencing_token: view.fencing_token,
            regions: self.registry.snapshot(),
            active_episode: view.active_episode,
            last_episode: view.last_episode,
            updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::RegionRole;
    use uuid::Uuid;

    #[test]
    fn test_snapshot_reflects_publish() {
        let registry = Arc::new(
            RegionRegistry::new(vec![
                RegionRecord::new("use1", RegionRole::Primary, "db.use1:5432", "c-use1"),
                RegionRecord::new("usw2", RegionRole::Secondary, "db.usw2:5432", "c-usw2"),
            ])
            .unwrap(),
        );
        let board = StatusBoard::new(registry);
        assert_eq!(board.snapshot().engine_state, "HEALTHY");

        board.publish(EngineView {
            state: FailoverState::Suspect {
                episode_id: Uuid::nil(),
            },
            leader: true,
            fencing_token: Some(4),
            ..EngineView::default()
        });

        let snapshot = board.snapshot();
        assert_eq!(snapshot.engine_state, "SUSPECT");
        assert!(snapshot.leader);
        assert_eq!(snapshot.regions.len(), 2);

        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains(r#""engine_state":"SUSPECT""#));
        assert!(json.contains(r#""fencing_token":4"#));
    }
}
