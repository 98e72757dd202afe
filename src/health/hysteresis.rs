//! Consecutive-outcome debouncing
//!
//! A region flips to UNHEALTHY only after exactly `failure_threshold`
//! consecutive failed probes, and back to HEALTHY only after exactly
//! `recovery_threshold` consecutive successes. A single contrary outcome
//! resets the opposing run.

use crate::region::HealthVerdict;

/// Per-region hysteresis state.
#[derive(Debug, Clone)]
pub struct HysteresisCounter {
    failure_threshold: u32,
    recovery_threshold: u32,
    consecutive_failures: u32,
    consecutive_successes: u32,
    verdict: HealthVerdict,
}

impl HysteresisCounter {
    /// Start in HEALTHY. Thresholds below 1 are treated as 1.
    pub fn new(failure_threshold: u32, recovery_threshold: u32) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            recovery_threshold: recovery_threshold.max(1),
            consecutive_failures: 0,
            consecutive_successes: 0,
            verdict: HealthVerdict::Healthy,
        }
    }

    /// Current debounced verdict.
    pub fn verdict(&self) -> HealthVerdict {
        self.verdict
    }

    /// Current failure run length.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Current success run length.
    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes
    }

    /// Feed one probe outcome. Returns the new verdict only on a transition.
    pub fn observe(&mut self, healthy: bool) -> Option<HealthVerdict> {
        if healthy {
            self.consecutive_failures = 0;
            self.consecutive_successes = self.consecutive_successes.saturating_add(1);

            if self.verdict == HealthVerdict::Unhealthy
                && self.consecutive_successes >= self.recovery_threshold
            {
                self.verdict = HealthVerdict::Healthy;
                return Some(self.verdict);
            }
        } else {
            self.consecutive_successes = 0;
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);

            if self.verdict == HealthVerdict::Healthy
                && self.consecutive_failures >= self.failure_threshold
            {
                self.verdict = HealthVerdict::Unhealthy;
                return Some(self.verdict);
            }
        }
        None
    }
}
