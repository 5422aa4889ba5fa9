//! Start/stop bookkeeping shared by every component that owns background loops.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

use crate::error::MonitorError;

#[derive(Debug, Clone)]
pub(crate) struct Running {
    pub(crate) cancel: CancellationToken,
    pub(crate) tracker: TaskTracker,
}

/// `stopped -> running -> stopped` state for a set of background tasks.
///
/// Every task spawned on the tracker handed out by [`Lifecycle::begin`] is
/// awaited by [`Lifecycle::end`].
#[derive(Debug, Default)]
pub(crate) struct Lifecycle {
    running: Mutex<Option<Running>>,
}

impl Lifecycle {
    /// Transition to running.
    ///
    /// Returns `Ok(None)` when already running so callers can make `start`
    /// idempotent.
    pub(crate) fn begin(&self) -> Result<Option<Running>, MonitorError> {
        tokio::runtime::Handle::try_current().map_err(|_| MonitorError::NoRuntime)?;

        let mut running = self.running.lock();
        if running.is_some() {
            return Ok(None);
        }
        let state = Running {
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        };
        *running = Some(state.clone());
        Ok(Some(state))
    }

    /// Cancel and wait for every tracked task. Returns false if not running.
    pub(crate) async fn end(&self) -> bool {
        let Some(state) = self.running.lock().take() else {
            return false;
        };
        state.cancel.cancel();
        state.tracker.close();
        state.tracker.wait().await;
        true
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// The current state, if running.
    pub(crate) fn current(&self) -> Option<Running> {
        self.running.lock().clone()
    }
}

/// Run `iteration` immediately and then every `period` until cancelled.
///
/// Iterations of one loop never overlap. An iteration that has started runs
/// to completion even if cancellation arrives meanwhile.
pub(crate) fn spawn_periodic<F, Fut>(
    running: &Running,
    name: &'static str,
    period: Duration,
    mut iteration: F,
) where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let cancel = running.cancel.clone();
    running.tracker.spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            iteration().await;
        }
        debug!(task = name, "loop stopped");
    });
}
