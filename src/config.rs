//! Orchestrator configuration
//!
//! One JSON file (`./drorch.json` by default). Only `regions` and
//! `dns.record_name` are required; every tunable has a default.
//!
//! ```json
//! {
//!   "node_id": "drorch-a",
//!   "regions": [
//!     {"region_id": "us-east-1", "role": "PRIMARY", "endpoint": "db.use1:5432", "cluster_id": "c-use1"},
//!     {"region_id": "us-west-2", "role": "SECONDARY", "endpoint": "db.usw2:5432", "cluster_id": "c-usw2",
//!      "probe": {"kind": "http", "path": "/healthz"}}
//!   ],
//!   "dns": {"record_name": "db.example.com"}
//! }
//! ```

use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::EngineSettings;
use crate::health::{HealthSettings, ProbeKind};
use crate::lag::LagSettings;
use crate::promotion::PromotionSettings;
use crate::region::{RegionRecord, RegionRole};
use crate::rotation::RotationSettings;
use crate::traffic::{RetryPolicy, TrafficSettings};

/// Hard ceiling on a single liveness probe.
pub const MAX_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default configuration path
pub const DEFAULT_CONFIG_PATH: &str = "./drorch.json";

/// Result type for configuration
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

/// One seeded region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionConfig {
    pub region_id: String,
    pub role: RegionRole,
    pub endpoint: String,
    pub cluster_id: String,
    #[serde(default)]
    pub probe: ProbeKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// N: consecutive failures before UNHEALTHY
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// M: consecutive successes before HEALTHY
    #[serde(default = "default_recovery_threshold")]
    pub recovery_threshold: u32,
    #[serde(default = "default_history_size")]
    pub history_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LagConfig {
    #[serde(default = "default_lag_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_lag_threshold_ms")]
    pub threshold_ms: u64,
    /// K: consecutive in-bound samples before a lag recovery
    #[serde(default = "default_samples_required")]
    pub samples_required: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionConfig {
    #[serde(default = "default_promotion_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_fence_timeout_secs")]
    pub fence_timeout_secs: u64,
    #[serde(default)]
    pub max_staleness_ms: u64,
    #[serde(default = "default_describe_poll_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    #[serde(default)]
    pub record_name: String,
    #[serde(default = "default_dns_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_dns_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_dns_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_dns_max_delay_ms")]
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_rotation_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
    #[serde(default = "default_rotation_retry_secs")]
    pub retry_delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_escalation_interval_secs")]
    pub escalation_interval_secs: u64,
    #[serde(default)]
    pub auto_rebalance: bool,
    #[serde(default = "default_catch_up_timeout_secs")]
    pub catch_up_timeout_secs: u64,
    #[serde(default = "default_rotation_wait_secs")]
    pub rotation_wait_timeout_secs: u64,
    #[serde(default = "default_signal_capacity")]
    pub signal_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseConfig {
    #[serde(default = "default_lease_ttl_secs")]
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_http_bind")]
    pub bind: String,
}

/// Full configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Lease holder identity of this instance
    #[serde(default = "default_node_id")]
    pub node_id: String,
    pub regions: Vec<RegionConfig>,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub lag: LagConfig,
    #[serde(default)]
    pub promotion: PromotionConfig,
    #[serde(default)]
    pub dns: DnsConfig,
    #[serde(default)]
    pub rotation: RotationConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub lease: LeaseConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default = "default_journal_path")]
    pub journal_path: PathBuf,
    /// JSON-lines alert file; alerts only go to the log when unset
    #[serde(default)]
    pub alerts_path: Option<PathBuf>,
}

fn default_node_id() -> String {
    "drorch-1".to_string()
}
fn default_probe_interval_secs() -> u64 {
    30
}
fn default_probe_timeout_ms() -> u64 {
    5000
}
fn default_failure_threshold() -> u32 {
    3
}
fn default_recovery_threshold() -> u32 {
    2
}
fn default_history_size() -> usize {
    crate::health::DEFAULT_HISTORY_SIZE
}
fn default_lag_poll_interval_secs() -> u64 {
    10
}
fn default_lag_threshold_ms() -> u64 {
    1000
}
fn default_samples_required() -> u32 {
    3
}
fn default_promotion_timeout_secs() -> u64 {
    300
}
fn default_fence_timeout_secs() -> u64 {
    30
}
fn default_describe_poll_ms() -> u64 {
    2000
}
fn default_dns_ttl_secs() -> u64 {
    30
}
fn default_dns_attempts() -> u32 {
    5
}
fn default_dns_base_delay_ms() -> u64 {
    500
}
fn default_dns_max_delay_ms() -> u64 {
    10_000
}
fn default_rotation_interval_secs() -> u64 {
    30 * 24 * 60 * 60
} // 30 days
fn default_grace_period_secs() -> u64 {
    60 * 60
}
fn default_rotation_retry_secs() -> u64 {
    10 * 60
}
fn default_tick_interval_secs() -> u64 {
    10
}
fn default_escalation_interval_secs() -> u64 {
    15 * 60
}
fn default_catch_up_timeout_secs() -> u64 {
    30 * 60
}
fn default_rotation_wait_secs() -> u64 {
    60
}
fn default_signal_capacity() -> usize {
    256
}
fn default_lease_ttl_secs() -> u64 {
    15
}
fn default_http_bind() -> String {
    "127.0.0.1:9180".to_string()
}
fn default_journal_path() -> PathBuf {
    PathBuf::from("./drorch-episodes.log")
}
fn default_true() -> bool {
    true
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: default_probe_interval_secs(),
            probe_timeout_ms: default_probe_timeout_ms(),
            failure_threshold: default_failure_threshold(),
            recovery_threshold: default_recovery_threshold(),
            history_size: default_history_size(),
        }
    }
}

impl Default for LagConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_lag_poll_interval_secs(),
            threshold_ms: default_lag_threshold_ms(),
            samples_required: default_samples_required(),
        }
    }
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_promotion_timeout_secs(),
            fence_timeout_secs: default_fence_timeout_secs(),
            max_staleness_ms: 0,
            poll_interval_ms: default_describe_poll_ms(),
        }
    }
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            record_name: String::new(),
            ttl_secs: default_dns_ttl_secs(),
            max_attempts: default_dns_attempts(),
            base_delay_ms: default_dns_base_delay_ms(),
            max_delay_ms: default_dns_max_delay_ms(),
        }
    }
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_rotation_interval_secs(),
            grace_period_secs: default_grace_period_secs(),
            retry_delay_secs: default_rotation_retry_secs(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            escalation_interval_secs: default_escalation_interval_secs(),
            auto_rebalance: false,
            catch_up_timeout_secs: default_catch_up_timeout_secs(),
            rotation_wait_timeout_secs: default_rotation_wait_secs(),
            signal_capacity: default_signal_capacity(),
        }
    }
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_lease_ttl_secs(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_http_bind(),
        }
    }
}

impl OrchestratorConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    /// Parse and validate configuration text.
    pub fn from_json(content: &str) -> ConfigResult<Self> {
        let config: OrchestratorConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.node_id.trim().is_empty() {
            return Err(invalid("node_id must not be empty"));
        }

        if self.regions.len() < 2 {
            return Err(invalid(format!(
                "at least two regions are required, found {}",
                self.regions.len()
            )));
        }
        let mut seen = HashSet::new();
        for region in &self.regions {
            if region.region_id.trim().is_empty() {
                return Err(invalid("region_id must not be empty"));
            }
            if region.endpoint.trim().is_empty() || region.cluster_id.trim().is_empty() {
                return Err(invalid(format!(
                    "region '{}' needs an endpoint and a cluster_id",
                    region.region_id
                )));
            }
            if !seen.insert(region.region_id.as_str()) {
                return Err(invalid(format!(
                    "duplicate region id '{}'",
                    region.region_id
                )));
            }
        }
        let primaries = self
            .regions
            .iter()
            .filter(|r| r.role == RegionRole::Primary)
            .count();
        if primaries != 1 {
            return Err(invalid(format!(
                "exactly one PRIMARY region is required, found {}",
                primaries
            )));
        }

        let health = &self.health;
        if health.failure_threshold == 0 || health.recovery_threshold == 0 {
            return Err(invalid("health thresholds must be > 0"));
        }
        if health.probe_timeout_ms == 0 || health.probe_interval_secs == 0 {
            return Err(invalid("probe interval and timeout must be > 0"));
        }
        if Duration::from_millis(health.probe_timeout_ms) > MAX_PROBE_TIMEOUT {
            return Err(invalid(format!(
                "probe_timeout_ms {} exceeds the {}ms ceiling",
                health.probe_timeout_ms,
                MAX_PROBE_TIMEOUT.as_millis()
            )));
        }
        if health.history_size == 0 {
            return Err(invalid("history_size must be > 0"));
        }

        if self.lag.samples_required == 0 || self.lag.threshold_ms == 0 {
            return Err(invalid("lag threshold and samples_required must be > 0"));
        }
        if self.lag.poll_interval_secs == 0 {
            return Err(invalid("lag poll_interval_secs must be > 0"));
        }

        if self.promotion.timeout_secs == 0 || self.promotion.fence_timeout_secs == 0 {
            return Err(invalid("promotion timeouts must be > 0"));
        }

        if self.dns.record_name.trim().is_empty() {
            return Err(invalid("dns.record_name must not be empty"));
        }
        if self.dns.max_attempts == 0 {
            return Err(invalid("dns.max_attempts must be > 0"));
        }

        if self.rotation.interval_secs == 0 {
            return Err(invalid("rotation interval_secs must be > 0"));
        }
        if self.engine.tick_interval_secs == 0 || self.engine.signal_capacity == 0 {
            return Err(invalid("engine tick interval and signal capacity must be > 0"));
        }
        if self.lease.ttl_secs == 0 {
            return Err(invalid("lease ttl_secs must be > 0"));
        }
        if self.http.enabled {
            self.http_addr()?;
        }

        Ok(())
    }

    /// Seeded region records.
    pub fn region_records(&self) -> Vec<RegionRecord> {
        self.regions
            .iter()
            .map(|r| RegionRecord::new(r.region_id.as_str(), r.role, &r.endpoint, &r.cluster_id))
            .collect()
    }

    pub fn http_addr(&self) -> ConfigResult<SocketAddr> {
        self.http
            .bind
            .parse()
            .map_err(|_| invalid(format!("http.bind '{}' is not a socket address", self.http.bind)))
    }

    pub fn health_settings(&self) -> HealthSettings {
        HealthSettings {
            probe_interval: Duration::from_secs(self.health.probe_interval_secs),
            probe_timeout: Duration::from_millis(self.health.probe_timeout_ms),
            failure_threshold: self.health.failure_threshold,
            recovery_threshold: self.health.recovery_threshold,
            history_size: self.health.history_size,
        }
    }

    pub fn lag_settings(&self) -> LagSettings {
        LagSettings {
            poll_interval: Duration::from_secs(self.lag.poll_interval_secs),
            threshold: Duration::from_millis(self.lag.threshold_ms),
            samples_required: self.lag.samples_required,
        }
    }

    pub fn promotion_settings(&self) -> PromotionSettings {
        PromotionSettings {
            promotion_timeout: Duration::from_secs(self.promotion.timeout_secs),
            fence_timeout: Duration::from_secs(self.promotion.fence_timeout_secs),
            max_staleness: Duration::from_millis(self.promotion.max_staleness_ms),
            poll_interval: Duration::from_millis(self.promotion.poll_interval_ms.max(1)),
        }
    }

    pub fn traffic_settings(&self) -> TrafficSettings {
        TrafficSettings {
            record_name: self.dns.record_name.clone(),
            ttl: Duration::from_secs(self.dns.ttl_secs),
            retry: RetryPolicy {
                max_attempts: self.dns.max_attempts,
                base_delay: Duration::from_millis(self.dns.base_delay_ms),
                max_delay: Duration::from_millis(self.dns.max_delay_ms),
                ..RetryPolicy::default()
            },
        }
    }

    pub fn rotation_settings(&self) -> RotationSettings {
        RotationSettings {
            rotation_interval: Duration::from_secs(self.rotation.interval_secs),
            grace_period: Duration::from_secs(self.rotation.grace_period_secs),
            retry_delay: Duration::from_secs(self.rotation.retry_delay_secs),
            ..RotationSettings::default()
        }
    }

    /// Engine settings; recovery catches up to the lag threshold.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            tick_interval: Duration::from_secs(self.engine.tick_interval_secs),
            escalation_interval: Duration::from_secs(self.engine.escalation_interval_secs),
            auto_rebalance: self.engine.auto_rebalance,
            catch_up_bound: Duration::from_millis(self.lag.threshold_ms),
            catch_up_timeout: Duration::from_secs(self.engine.catch_up_timeout_secs),
            rotation_wait_timeout: Duration::from_secs(self.engine.rotation_wait_timeout_secs),
        }
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease.ttl_secs)
    }
}
