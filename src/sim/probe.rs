//! Simulated liveness

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::health::{LivenessProbe, ProbeError, ProbeResult};

/// Probe whose answer per endpoint is set by the caller. Unknown endpoints
/// are healthy.
#[derive(Debug, Default)]
pub struct SimProbe {
    down: Mutex<HashMap<String, bool>>,
}

impl SimProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_healthy(&self, endpoint: &str, healthy: bool) {
        if let Ok(mut down) = self.down.lock() {
            down.insert(endpoint.to_string(), !healthy);
        }
    }
}

#[async_trait]
impl LivenessProbe for SimProbe {
    async fn probe(&self, endpoint: &str) -> ProbeResult<Duration> {
        let down = self
            .down
            .lock()
            .map(|d| d.get(endpoint).copied().unwrap_or(false))
            .unwrap_or(false);
        if down {
            Err(ProbeError::Connect {
                endpoint: endpoint.to_string(),
                reason: "connection refused".into(),
            })
        } else {
            Ok(Duration::from_millis(1))
        }
    }
}
