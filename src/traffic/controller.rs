//! Routing record updates

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::sleep;
use uuid::Uuid;

use super::errors::{DnsError, DnsResult};
use super::retry::RetryPolicy;
use crate::observability::{Event, Logger, MetricsRegistry};
use crate::promotion::PromotionReport;

/// DNS / traffic routing backend.
#[async_trait]
pub trait RoutingApi: Send + Sync {
    /// Point record `name` at `target` with the given TTL.
    async fn update_record(&self, name: &str, target: &str, ttl: Duration) -> DnsResult<()>;
}

/// Routing tunables.
#[derive(Debug, Clone)]
pub struct TrafficSettings {
    /// Client-facing record name (e.g. `db.example.com`)
    pub record_name: String,
    pub ttl: Duration,
    pub retry: RetryPolicy,
}

impl Default for TrafficSettings {
    fn default() -> Self {
        Self {
            record_name: String::new(),
            ttl: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

/// Proof that routing now points at the promoted region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CutoverReceipt {
    pub episode_id: Uuid,
    pub record: String,
    pub target: String,
    pub ttl_secs: u64,
    pub attempts: u32,
    pub updated_at: DateTime<Utc>,
}

/// Moves client traffic after a confirmed promotion.
pub struct TrafficController {
    api: Arc<dyn RoutingApi>,
    settings: TrafficSettings,
    metrics: Arc<MetricsRegistry>,
}

impl TrafficController {
    pub fn new(
        api: Arc<dyn RoutingApi>,
        settings: TrafficSettings,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            api,
            settings,
            metrics,
        }
    }

    pub fn record_name(&self) -> &str {
        &self.settings.record_name
    }

    /// Point the record at `target_endpoint`'s host.
    ///
    /// Retries with backoff up to the policy's attempt limit, then returns
    /// `DnsError::Exhausted`; the caller decides when to try again.
    pub async fn cut_over(
        &self,
        report: &PromotionReport,
        target_endpoint: &str,
    ) -> DnsResult<CutoverReceipt> {
        let target = routing_target(target_endpoint);
        let record = &self.settings.record_name;
        let policy = &self.settings.retry;
        let max_attempts = policy.max_attempts.max(1);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.api.update_record(record, target, self.settings.ttl).await {
                Ok(()) => {
                    self.metrics.increment_dns_updates();
                    Logger::event(
                        Event::DnsUpdated,
                        &[
                            ("attempts", &attempt.to_string()),
                            ("episode_id", &report.episode_id.to_string()),
                            ("record", record),
                            ("target", target),
                            ("ttl_secs", &self.settings.ttl.as_secs().to_string()),
                        ],
                    );
                    return Ok(CutoverReceipt {
                        episode_id: report.episode_id,
                        record: record.clone(),
                        target: target.to_string(),
                        ttl_secs: self.settings.ttl.as_secs(),
                        attempts: attempt,
                        updated_at: Utc::now(),
                    });
                }
                Err(e) => {
                    self.metrics.increment_dns_retries();
                    Logger::event(
                        Event::DnsRetry,
                        &[
                            ("attempt", &attempt.to_string()),
                            ("error", &e.to_string()),
                            ("record", record),
                        ],
                    );
                    if attempt >= max_attempts {
                        return Err(DnsError::Exhausted {
                            record: record.clone(),
                            attempts: attempt,
                            last_error: e.to_string(),
                        });
                    }
                    sleep(policy.backoff(attempt)).await;
                }
            }
        }
    }
}

/// Host part of a `host:port` endpoint.
fn routing_target(endpoint: &str) -> &str {
    match endpoint.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => {
            host.trim_start_matches('[').trim_end_matches(']')
        }
        _ => endpoint,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::RegionId;
    use crate::sim::SimRouting;

    fn report() -> PromotionReport {
        PromotionReport {
            episode_id: Uuid::new_v4(),
            promoted_region: RegionId::from("usw2"),
            promoted_cluster: "c-usw2".into(),
            final_lag: Duration::ZERO,
            elapsed: Duration::from_secs(12),
            completed_at: Utc::now(),
        }
    }

    fn controller(routing: Arc<SimRouting>) -> TrafficController {
        TrafficController::new(
            routing,
            TrafficSettings {
                record_name: "db.example.com".into(),
                ..TrafficSettings::default()
            },
            Arc::new(MetricsRegistry::new()),
        )
    }

    #[test]
    fn test_routing_target() {
        assert_eq!(routing_target("db.usw2.internal:5432"), "db.usw2.internal");
        assert_eq!(routing_target("[::1]:5432"), "::1");
        assert_eq!(routing_target("db.usw2.internal"), "db.usw2.internal");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cut_over_updates_record() {
        let routing = Arc::new(SimRouting::new());
        let receipt = controller(routing.clone())
            .cut_over(&report(), "db.usw2.internal:5432")
            .await
            .unwrap();

        assert_eq!(receipt.attempts, 1);
        assert_eq!(receipt.ttl_secs, 30);
        assert_eq!(
            routing.current("db.example.com"),
            Some("db.usw2.internal".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let routing = Arc::new(SimRouting::new());
        routing.fail_next(3);

        let receipt = controller(routing.clone())
            .cut_over(&report(), "db.usw2.internal:5432")
            .await
            .unwrap();

        assert_eq!(receipt.attempts, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_after_max_attempts() {
        let routing = Arc::new(SimRouting::new());
        routing.fail_next(100);

        let err = controller(routing.clone())
            .cut_over(&report(), "db.usw2.internal:5432")
            .await
            .unwrap_err();

        assert!(matches!(err, DnsError::Exhausted { attempts: 5, .. }));
        assert_eq!(routing.current("db.example.com"), None);
    }
}
