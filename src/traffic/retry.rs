//! Exponential backoff with jitter

use std::time::Duration;

use rand::Rng;

/// Retry schedule for routing updates.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the delay added at random (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), without jitter.
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let millis = self.base_delay.as_millis() as f64 * self.multiplier.max(1.0).powi(exponent);
        Duration::from_millis(millis as u64).min(self.max_delay)
    }

    /// Delay before retry number `attempt`, with jitter applied.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.base_backoff(attempt);
        let range = (base.as_millis() as f64 * self.jitter.clamp(0.0, 1.0)) as u64;
        if range == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..range))
    }
}
