//! Simulated DNS

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::traffic::{DnsError, DnsResult, RoutingApi};

/// In-memory routing table.
#[derive(Debug, Default)]
pub struct SimRouting {
    records: Mutex<HashMap<String, String>>,
    updates: Mutex<Vec<(String, String)>>,
    failures_left: AtomicU32,
}

impl SimRouting {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` update calls.
    pub fn fail_next(&self, count: u32) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// Current target of `name`.
    pub fn current(&self, name: &str) -> Option<String> {
        self.records.lock().ok().and_then(|r| r.get(name).cloned())
    }

    /// Successful updates as `(name, target)`.
    pub fn updates(&self) -> Vec<(String, String)> {
        self.updates.lock().map(|u| u.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl RoutingApi for SimRouting {
    async fn update_record(&self, name: &str, target: &str, _ttl: Duration) -> DnsResult<()> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(DnsError::UpdateFailed {
                record: name.to_string(),
                target: target.to_string(),
                reason: "throttled".into(),
            });
        }

        if let Ok(mut records) = self.records.lock() {
            records.insert(name.to_string(), target.to_string());
        }
        if let Ok(mut updates) = self.updates.lock() {
            updates.push((name.to_string(), target.to_string()));
        }
        Ok(())
    }
}
