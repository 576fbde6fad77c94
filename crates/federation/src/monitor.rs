//! Idle health monitor.
//!
//! A periodic background task that re-validates a peer and flips the
//! owning backend between `Running` and `Idle`. Unavailability is not an
//! error here: an idle backend simply cannot take work until the next
//! successful probe.

use std::sync::Weak;
use std::time::Duration;

use async_trait::async_trait;
use hivelink_core::status::BackendStatus;
use hivelink_core::types::BackendId;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::FederationError;

/// What the monitor probes and updates.
#[async_trait]
pub trait HealthProbe: Send + Sync + 'static {
    /// Id used in log fields.
    fn backend_id(&self) -> BackendId;

    /// One validation round trip to the peer.
    async fn validate(&self) -> Result<(), FederationError>;

    fn current_status(&self) -> BackendStatus;

    /// Apply and broadcast a status change.
    fn apply_status(&self, status: BackendStatus);

    /// Re-push the current status to anything that mirrors it. Runs after
    /// every tick that leaves the probe in a non-terminal state.
    async fn resync(&self) {}
}

/// Handle to a running monitor task.
pub struct HealthMonitor {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl HealthMonitor {
    /// Spawn the monitor. It stops when `parent` is cancelled, when
    /// [`stop`](Self::stop) is called, or when the probe is dropped.
    pub fn start<P: HealthProbe>(
        probe: Weak<P>,
        period: Duration,
        parent: &CancellationToken,
    ) -> Self {
        let cancel = parent.child_token();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            run_monitor(probe, period, task_cancel).await;
        });

        Self {
            cancel,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the monitor and wait (up to `grace`) for an in-flight tick to
    /// finish. No status change is applied after this returns. Calling it
    /// again is a no-op.
    pub async fn stop(&mut self, grace: Duration) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if tokio::time::timeout(grace, handle).await.is_err() {
                tracing::warn!("Health monitor did not stop within grace period");
            }
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_monitor<P: HealthProbe>(probe: Weak<P>, period: Duration, cancel: CancellationToken) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(probe) = probe.upgrade() else {
            break;
        };
        let backend_id = probe.backend_id();

        let result = probe.validate().await;
        if cancel.is_cancelled() {
            break;
        }

        let next = match result {
            Ok(()) => BackendStatus::Running,
            Err(FederationError::ShutdownInProgress) => break,
            Err(e) => {
                tracing::debug!(backend_id, error = %e, "Health probe failed");
                BackendStatus::Idle
            }
        };

        let current = probe.current_status();
        if current.is_terminal() {
            continue;
        }
        if current != next {
            tracing::debug!(backend_id, from = %current, to = %next, "Health probe flipped status");
            probe.apply_status(next);
        }
        probe.resync().await;
    }

    tracing::debug!("Health monitor stopped");
}
