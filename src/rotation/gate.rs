//! Change gate shared by rotation and failover
//!
//! - A rotation may start only when no failover is active
//! - A failover may always start; a running rotation sees the request at
//!   its next step boundary and rolls back
//! - The engine waits for the rotation to release the gate before fencing

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;

use super::errors::{RotationError, RotationResult};

#[derive(Debug, Default)]
struct GateState {
    rotation_active: bool,
    failover_active: bool,
}

/// Mutual exclusion between credential rotation and failover.
#[derive(Debug)]
pub struct ChangeGate {
    state: Mutex<GateState>,
    rotation_running: watch::Sender<bool>,
}

impl Default for ChangeGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeGate {
    pub fn new() -> Self {
        let (rotation_running, _) = watch::channel(false);
        Self {
            state: Mutex::new(GateState::default()),
            rotation_running,
        }
    }

    /// Claim the gate for a rotation.
    ///
    /// Fails with `Conflict` while a failover is active or another rotation
    /// holds the gate.
    pub fn try_begin_rotation(self: &Arc<Self>) -> RotationResult<RotationPermit> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| RotationError::Conflict("change gate poisoned".into()))?;

        if state.failover_active {
            return Err(RotationError::Conflict("failover in progress".into()));
        }
        if state.rotation_active {
            return Err(RotationError::Conflict("rotation already running".into()));
        }

        state.rotation_active = true;
        self.rotation_running.send_replace(true);
        Ok(RotationPermit {
            gate: Arc::clone(self),
        })
    }

    /// Mark a failover as active. Idempotent.
    pub fn begin_failover(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.failover_active = true;
        }
    }

    /// The failover episode settled. Idempotent.
    pub fn end_failover(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.failover_active = false;
        }
    }

    pub fn failover_active(&self) -> bool {
        self.state.lock().map(|s| s.failover_active).unwrap_or(true)
    }

    pub fn rotation_active(&self) -> bool {
        self.state.lock().map(|s| s.rotation_active).unwrap_or(true)
    }

    /// Wait until no rotation holds the gate. Returns `false` on timeout.
    pub async fn wait_for_rotation_idle(&self, within: Duration) -> bool {
        let mut running = self.rotation_running.subscribe();
        let idle = matches!(
            tokio::time::timeout(within, running.wait_for(|active| !*active)).await,
            Ok(Ok(_))
        );
        idle
    }

    fn release_rotation(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.rotation_active = false;
        }
        self.rotation_running.send_replace(false);
    }
}

/// Held by the running rotation; releases the gate on drop.
#[derive(Debug)]
pub struct RotationPermit {
    gate: Arc<ChangeGate>,
}

impl RotationPermit {
    /// A failover started since this permit was granted.
    pub fn failover_requested(&self) -> bool {
        self.gate.failover_active()
    }
}

impl Drop for RotationPermit {
    fn drop(&mut self) {
        self.gate.release_rotation();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_deferred_during_failover() {
        let gate = Arc::new(ChangeGate::new());
        gate.begin_failover();

        let result = gate.try_begin_rotation();
        assert!(matches!(result, Err(RotationError::Conflict(_))));

        gate.end_failover();
        assert!(gate.try_begin_rotation().is_ok());
    }

    #[test]
    fn test_single_rotation_at_a_time() {
        let gate = Arc::new(ChangeGate::new());
        let permit = gate.try_begin_rotation().unwrap();
        assert!(gate.try_begin_rotation().is_err());

        drop(permit);
        assert!(!gate.rotation_active());
        assert!(gate.try_begin_rotation().is_ok());
    }

    #[test]
    fn test_permit_sees_failover_request() {
        let gate = Arc::new(ChangeGate::new());
        let permit = gate.try_begin_rotation().unwrap();
        assert!(!permit.failover_requested());

        gate.begin_failover();
        assert!(permit.failover_requested());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_idle() {
        let gate = Arc::new(ChangeGate::new());
        assert!(gate.wait_for_rotation_idle(Duration::from_secs(1)).await);

        let permit = gate.try_begin_rotation().unwrap();
        assert!(!gate.wait_for_rotation_idle(Duration::from_secs(1)).await);

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.wait_for_rotation_idle(Duration::from_secs(30)).await })
        };
        tokio::time::sleep(Duration::from_secs(2)).await;
        drop(permit);

        assert!(waiter.await.unwrap());
    }
}
