//! Metrics registry
//!
//! - Counters only, monotonic, reset on process start
//! - Relaxed atomics; exact values, no ordering guarantees between counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

macro_rules! counters {
    ($( $(#[$doc:meta])* $field:ident => $incr:ident ),* $(,)?) => {
        /// Operational counters for the control loop.
        #[derive(Debug, Default)]
        pub struct MetricsRegistry {
            $( $(#[$doc])* $field: AtomicU64, )*
        }

        /// A point-in-time snapshot of all counters.
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
        pub struct MetricsSnapshot {
            $( pub $field: u64, )*
        }

        impl MetricsRegistry {
            $(
                $(#[$doc])*
                pub fn $incr(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                }
            )*

            /// Read every counter.
            pub fn snapshot(&self) -> MetricsSnapshot {
                MetricsSnapshot {
                    $( $field: self.$field.load(Ordering::Relaxed), )*
                }
            }
        }
    };
}

counters! {
    /// Liveness probes issued
    probes_sent => increment_probes_sent,
    /// Liveness probes that failed or timed out
    probe_failures => increment_probe_failures,
    /// Debounced health verdict transitions
    health_transitions => increment_health_transitions,
    /// Replication lag samples read
    lag_samples => increment_lag_samples,
    /// Replication lag reads that failed
    lag_unavailable => increment_lag_unavailable,
    /// Failover episodes opened
    episodes_opened => increment_episodes_opened,
    /// Transitions into BLOCKED
    failovers_blocked => increment_failovers_blocked,
    /// Promotion sequences started
    promotions_attempted => increment_promotions_attempted,
    /// Promotions that reached writer-capable
    promotions_succeeded => increment_promotions_succeeded,
    /// Promotions that ended in FAILOVER_FAILED
    promotions_failed => increment_promotions_failed,
    /// Successful routing updates
    dns_updates => increment_dns_updates,
    /// Failed routing update attempts
    dns_retries => increment_dns_retries,
    /// Completed credential rotations
    rotations_completed => increment_rotations_completed,
    /// Rotations deferred by a failover
    rotations_deferred => increment_rotations_deferred,
    /// Rotations rolled back
    rotations_rolled_back => increment_rotations_rolled_back,
    /// Alerts that could not be delivered
    notifications_failed => increment_notifications_failed,
    /// Times this instance lost its lease
    lease_losses => increment_lease_losses,
}

impl MetricsRegistry {
    /// Create a new registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Current counters as a JSON object
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_is_zeroed() {
        let registry = MetricsRegistry::new();
        assert_eq!(registry.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_increment_counters() {
        let registry = MetricsRegistry::new();

        registry.increment_probes_sent();
        registry.increment_probes_sent();
        registry.increment_probe_failures();
        registry.increment_promotions_attempted();
        registry.increment_dns_retries();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.probes_sent, 2);
        assert_eq!(snapshot.probe_failures, 1);
        assert_eq!(snapshot.promotions_attempted, 1);
        assert_eq!(snapshot.dns_retries, 1);
        assert_eq!(snapshot.promotions_failed, 0);
    }

    #[test]
    fn test_to_json() {
        let registry = MetricsRegistry::new();
        registry.increment_episodes_opened();

        let parsed: serde_json::Value = serde_json::from_str(&registry.to_json()).unwrap();
        assert_eq!(parsed["episodes_opened"], 1);
        assert_eq!(parsed["lease_losses"], 0);
    }

    #[test]
    fn test_thread_safety() {
        use std::sync::Arc;
        use std::thread;

        let registry = Arc::new(MetricsRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = Arc::clone(&registry);
                thread::spawn(move || {
                    for _ in 0..100 {
                        reg.increment_lag_samples();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.snapshot().lag_samples, 800);
    }
}
