//! Leader lease
//!
//! Only the lease holder may change engine state. Every grant carries a
//! fencing token that strictly increases across holders, so a stale leader
//! can always be told apart from the current one.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

use crate::observability::{Event, Logger, MetricsRegistry};

/// Result type for lease operations
pub type LeaseResult<T> = Result<T, LeaseError>;

/// Lease errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LeaseError {
    /// This instance does not hold the lease
    #[error("not the leader")]
    NotLeader,

    /// The lease expired or was taken over before renewal
    #[error("lease held by {holder} was lost")]
    Lost { holder: String },

    /// Lock backend failure
    #[error("lease backend error: {0}")]
    Backend(String),
}

/// A granted lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseToken {
    pub holder: String,
    pub fencing_token: u64,
    pub expires_at: Instant,
}

impl LeaseToken {
    pub fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Distributed lock with fencing tokens.
#[async_trait]
pub trait LeaderLock: Send + Sync {
    /// Grant the lease if free or expired. `Ok(None)` if someone else holds it.
    async fn try_acquire(&self, holder: &str, ttl: Duration) -> LeaseResult<Option<LeaseToken>>;

    /// Extend a held lease. Fails with `Lost` if it expired or changed hands.
    async fn renew(&self, token: &LeaseToken, ttl: Duration) -> LeaseResult<LeaseToken>;

    async fn release(&self, token: &LeaseToken) -> LeaseResult<()>;
}

#[derive(Debug, Default)]
struct LockState {
    current: Option<LeaseToken>,
    last_token: u64,
}

/// Process-local lock; share one instance between contenders.
#[derive(Debug, Default)]
pub struct MemoryLeaderLock {
    state: Mutex<LockState>,
}

impl MemoryLeaderLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current holder, if the lease is live.
    pub fn holder(&self) -> Option<String> {
        self.state.lock().ok().and_then(|s| {
            s.current
                .as_ref()
                .filter(|t| t.is_valid())
                .map(|t| t.holder.clone())
        })
    }

    fn locked(&self) -> LeaseResult<std::sync::MutexGuard<'_, LockState>> {
        self.state
            .lock()
            .map_err(|_| LeaseError::Backend("lock state poisoned".into()))
    }
}

#[async_trait]
impl LeaderLock for MemoryLeaderLock {
    async fn try_acquire(&self, holder: &str, ttl: Duration) -> LeaseResult<Option<LeaseToken>> {
        let mut state = self.locked()?;
        let now = Instant::now();

        if let Some(current) = &state.current {
            if current.is_valid() {
                if current.holder != holder {
                    return Ok(None);
                }
                let renewed = LeaseToken {
                    expires_at: now + ttl,
                    ..current.clone()
                };
                state.current = Some(renewed.clone());
                return Ok(Some(renewed));
            }
        }

        state.last_token += 1;
        let token = LeaseToken {
            holder: holder.to_string(),
            fencing_token: state.last_token,
            expires_at: now + ttl,
        };
        state.current = Some(token.clone());
        Ok(Some(token))
    }

    async fn renew(&self, token: &LeaseToken, ttl: Duration) -> LeaseResult<LeaseToken> {
        let mut state = self.locked()?;
        match &state.current {
            Some(current)
                if current.is_valid()
                    && current.holder == token.holder
                    && current.fencing_token == token.fencing_token =>
            {
                let renewed = LeaseToken {
                    expires_at: Instant::now() + ttl,
                    ..current.clone()
                };
                state.current = Some(renewed.clone());
                Ok(renewed)
            }
            _ => Err(LeaseError::Lost {
                holder: token.holder.clone(),
            }),
        }
    }

    async fn release(&self, token: &LeaseToken) -> LeaseResult<()> {
        let mut state = self.locked()?;
        let held = state
            .current
            .as_ref()
            .map(|c| c.fencing_token == token.fencing_token)
            .unwrap_or(false);
        if held {
            state.current = None;
        }
        Ok(())
    }
}

/// One instance's view of its leadership.
pub struct LeaseHandle {
    lock: Arc<dyn LeaderLock>,
    holder: String,
    ttl: Duration,
    current: Mutex<Option<LeaseToken>>,
    metrics: Arc<MetricsRegistry>,
}

impl LeaseHandle {
    pub fn new(
        lock: Arc<dyn LeaderLock>,
        holder: impl Into<String>,
        ttl: Duration,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            lock,
            holder: holder.into(),
            ttl,
            current: Mutex::new(None),
            metrics,
        }
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Holds an unexpired lease.
    pub fn is_leader(&self) -> bool {
        self.token().map(|t| t.is_valid()).unwrap_or(false)
    }

    /// Fencing token of the live lease, or `NotLeader`.
    pub fn ensure_leader(&self) -> LeaseResult<u64> {
        match self.token() {
            Some(token) if token.is_valid() => Ok(token.fencing_token),
            _ => Err(LeaseError::NotLeader),
        }
    }

    pub fn fencing_token(&self) -> Option<u64> {
        self.token().map(|t| t.fencing_token)
    }

    fn token(&self) -> Option<LeaseToken> {
        self.current.lock().ok().and_then(|t| t.clone())
    }

    fn store(&self, token: Option<LeaseToken>) {
        if let Ok(mut current) = self.current.lock() {
            *current = token;
        }
    }

    /// Try to become leader. Returns whether this instance now leads.
    pub async fn acquire(&self) -> LeaseResult<bool> {
        let was_leader = self.is_leader();
        match self.lock.try_acquire(&self.holder, self.ttl).await? {
            Some(token) => {
                if !was_leader {
                    Logger::event(
                        Event::LeaseAcquired,
                        &[
                            ("fencing_token", &token.fencing_token.to_string()),
                            ("holder", &self.holder),
                        ],
                    );
                }
                self.store(Some(token));
                Ok(true)
            }
            None => {
                self.store(None);
                Ok(false)
            }
        }
    }

    /// Renew the held lease, or try to acquire one if none is held.
    pub async fn renew(&self) -> LeaseResult<()> {
        let Some(token) = self.token() else {
            return match self.acquire().await? {
                true => Ok(()),
                false => Err(LeaseError::NotLeader),
            };
        };

        match self.lock.renew(&token, self.ttl).await {
            Ok(renewed) => {
                self.store(Some(renewed));
                Ok(())
            }
            Err(e) => {
                self.store(None);
                self.metrics.increment_lease_losses();
                Logger::event(
                    Event::LeaseLost,
                    &[("error", &e.to_string()), ("holder", &self.holder)],
                );
                Err(e)
            }
        }
    }

    pub async fn release(&self) {
        if let Some(token) = self.token() {
            let _ = self.lock.release(&token).await;
        }
        self.store(None);
    }

    /// Renew every `ttl / 3` until shutdown; releases the lease on exit.
    pub async fn run_renewal(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = (self.ttl / 3).max(Duration::from_millis(10));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Errors are logged inside; leadership is re-read by the engine
                    let _ = self.renew().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        self.release().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(lock: &Arc<MemoryLeaderLock>, holder: &str) -> LeaseHandle {
        LeaseHandle::new(
            lock.clone(),
            holder,
            Duration::from_secs(15),
            Arc::new(MetricsRegistry::new()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_holder() {
        let lock = Arc::new(MemoryLeaderLock::new());
        let a = handle(&lock, "node-a");
        let b = handle(&lock, "node-b");

        assert!(a.acquire().await.unwrap());
        assert!(!b.acquire().await.unwrap());
        assert!(a.is_leader());
        assert_eq!(b.ensure_leader(), Err(LeaseError::NotLeader));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_hands_over_with_higher_token() {
        let lock = Arc::new(MemoryLeaderLock::new());
        let a = handle(&lock, "node-a");
        let b = handle(&lock, "node-b");

        a.acquire().await.unwrap();
        let first = a.fencing_token().unwrap();

        tokio::time::advance(Duration::from_secs(16)).await;
        assert!(!a.is_leader());
        assert!(b.acquire().await.unwrap());
        assert!(b.fencing_token().unwrap() > first);

        // The old holder cannot renew its way back in
        assert!(matches!(a.renew().await, Err(LeaseError::Lost { .. })));
        assert!(!a.is_leader());
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_keeps_lease_alive() {
        let lock = Arc::new(MemoryLeaderLock::new());
        let a = Arc::new(handle(&lock, "node-a"));
        let (stop_tx, stop_rx) = watch::channel(false);

        let task = tokio::spawn(Arc::clone(&a).run_renewal(stop_rx));
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert!(a.is_leader());
        assert_eq!(lock.holder().as_deref(), Some("node-a"));

        stop_tx.send(true).unwrap();
        task.await.unwrap();
        assert_eq!(lock.holder(), None);
    }
}
