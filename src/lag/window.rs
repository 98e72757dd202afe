//! Lag verdicts
//!
//! Degradation is immediate: one sample at or above the threshold, or one
//! unreadable sample, marks the secondary DEGRADED. Recovery needs K
//! consecutive samples below the threshold.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::region::RegionId;

/// One lag reading. `lag` is `None` when the replica could not be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LagSample {
    pub region_id: RegionId,
    pub lag: Option<Duration>,
    pub timestamp: DateTime<Utc>,
}

/// Debounced lag state of one secondary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LagVerdict {
    /// Fewer than K in-bound samples since tracking (re)started
    Unknown,
    /// Below the threshold for K consecutive samples
    WithinBound,
    /// The latest sample was at or above the threshold, or unreadable
    Degraded,
}

impl LagVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            LagVerdict::Unknown => "UNKNOWN",
            LagVerdict::WithinBound => "WITHIN_BOUND",
            LagVerdict::Degraded => "DEGRADED",
        }
    }

    /// Only a confirmed in-bound verdict allows promotion.
    pub fn is_safe_for_promotion(&self) -> bool {
        *self == LagVerdict::WithinBound
    }
}

impl fmt::Display for LagVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Consecutive-sample window for a single secondary.
#[derive(Debug, Clone)]
pub struct LagWindow {
    threshold: Duration,
    required: u32,
    within_run: u32,
    verdict: LagVerdict,
    last_lag: Option<Duration>,
}

impl LagWindow {
    pub fn new(threshold: Duration, required: u32) -> Self {
        Self {
            threshold,
            required: required.max(1),
            within_run: 0,
            verdict: LagVerdict::Unknown,
            last_lag: None,
        }
    }

    pub fn verdict(&self) -> LagVerdict {
        self.verdict
    }

    /// Most recent readable lag.
    pub fn last_lag(&self) -> Option<Duration> {
        self.last_lag
    }

    /// Feed one sample. Returns the new verdict only on a transition.
    pub fn observe(&mut self, lag: Option<Duration>) -> Option<LagVerdict> {
        let degraded = match lag {
            Some(value) => {
                self.last_lag = Some(value);
                value >= self.threshold
            }
            None => true,
        };

        if degraded {
            self.within_run = 0;
            if self.verdict != LagVerdict::Degraded {
                self.verdict = LagVerdict::Degraded;
                return Some(self.verdict);
            }
        } else {
            self.within_run = self.within_run.saturating_add(1);
            if self.verdict != LagVerdict::WithinBound && self.within_run >= self.required {
                self.verdict = LagVerdict::WithinBound;
                return Some(self.verdict);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Option<Duration> {
        Some(Duration::from_millis(v))
    }

    #[test]
    fn test_unknown_until_k_samples() {
        let mut window = LagWindow::new(Duration::from_millis(1000), 3);

        assert_eq!(window.observe(ms(50)), None);
        assert_eq!(window.observe(ms(50)), None);
        assert_eq!(window.verdict(), LagVerdict::Unknown);
        assert!(!window.verdict().is_safe_for_promotion());
        assert_eq!(window.observe(ms(50)), Some(LagVerdict::WithinBound));
        assert!(window.verdict().is_safe_for_promotion());
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let mut window = LagWindow::new(Duration::from_millis(1000), 1);
        assert_eq!(window.observe(ms(1000)), Some(LagVerdict::Degraded));
        assert_eq!(window.observe(ms(999)), Some(LagVerdict::WithinBound));
    }

    #[test]
    fn test_unavailable_counts_as_degraded() {
        let mut window = LagWindow::new(Duration::from_millis(1000), 3);
        for _ in 0..3 {
            window.observe(ms(10));
        }

        assert_eq!(window.observe(None), Some(LagVerdict::Degraded));
        assert_eq!(window.observe(ms(5000)), None);
        assert_eq!(window.last_lag(), Some(Duration::from_millis(5000)));
    }

    #[test]
    fn test_single_sample_over_threshold_degrades() {
        let mut window = LagWindow::new(Duration::from_millis(1000), 3);
        for _ in 0..3 {
            window.observe(ms(50));
        }
        assert!(window.verdict().is_safe_for_promotion());

        assert_eq!(window.observe(ms(5000)), Some(LagVerdict::Degraded));
        assert!(!window.verdict().is_safe_for_promotion());
    }

    #[test]
    fn test_degraded_sample_before_k_resets_count() {
        let mut window = LagWindow::new(Duration::from_millis(1000), 3);
        window.observe(ms(50));
        window.observe(ms(50));
        assert_eq!(window.observe(ms(2000)), Some(LagVerdict::Degraded));

        assert_eq!(window.observe(ms(50)), None);
        assert_eq!(window.observe(ms(50)), None);
        assert_eq!(window.observe(ms(50)), Some(LagVerdict::WithinBound));
    }

    #[test]
    fn test_recovery_needs_k_consecutive() {
        let mut window = LagWindow::new(Duration::from_millis(1000), 2);
        window.observe(ms(5000));
        window.observe(ms(5000));
        assert_eq!(window.verdict(), LagVerdict::Degraded);

        assert_eq!(window.observe(ms(10)), None);
        assert_eq!(window.observe(ms(5000)), None);
        assert_eq!(window.observe(ms(10)), None);
        assert_eq!(window.observe(ms(10)), Some(LagVerdict::WithinBound));
    }
}
