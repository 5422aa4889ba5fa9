use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use super::reconciler::DiscoveryReconciler;
use crate::error::MonitorError;
use crate::lifecycle::{spawn_periodic, Lifecycle};

/// Statuses buffered for the consumer. When full, new statuses are dropped
/// so an absent consumer never delays the next poll.
const STATUS_CAPACITY: usize = 16;

/// Result of one discovery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryStatus {
    Success,
    Failure,
}

/// Runs the reconciler immediately and then on every interval.
pub struct DiscoveryDriver {
    reconciler: Arc<DiscoveryReconciler>,
    interval: Duration,
    status_tx: mpsc::Sender<DiscoveryStatus>,
    status_rx: Mutex<Option<mpsc::Receiver<DiscoveryStatus>>>,
    lifecycle: Lifecycle,
}

impl DiscoveryDriver {
    pub fn new(reconciler: DiscoveryReconciler, interval: Duration) -> Self {
        let (status_tx, status_rx) = mpsc::channel(STATUS_CAPACITY);
        Self {
            reconciler: Arc::new(reconciler),
            interval,
            status_tx,
            status_rx: Mutex::new(Some(status_rx)),
            lifecycle: Lifecycle::default(),
        }
    }

    /// The status channel. Can only be taken once.
    pub fn take_status_receiver(&self) -> Option<mpsc::Receiver<DiscoveryStatus>> {
        self.status_rx.lock().take()
    }

    pub fn start(&self) -> Result<(), MonitorError> {
        let Some(running) = self.lifecycle.begin()? else {
            return Ok(());
        };
        let reconciler = self.reconciler.clone();
        let status_tx = self.status_tx.clone();

        spawn_periodic(&running, "discovery", self.interval, move || {
            let reconciler = reconciler.clone();
            let status_tx = status_tx.clone();
            async move {
                let status = match reconciler.discover().await {
                    Ok(outcome) => {
                        debug!(
                            added = outcome.added.len(),
                            removed = outcome.removed.len(),
                            skipped = outcome.skipped,
                            "discovery poll finished"
                        );
                        DiscoveryStatus::Success
                    }
                    Err(e) => {
                        warn!(error = %e, "discovery poll failed");
                        DiscoveryStatus::Failure
                    }
                };
                match status_tx.try_send(status) {
                    Ok(()) | Err(TrySendError::Closed(_)) => {}
                    Err(TrySendError::Full(_)) => debug!(?status, "discovery status dropped"),
                }
            }
        });
        info!(interval = ?self.interval, "discovery started");
        Ok(())
    }

    pub async fn stop(&self) {
        if self.lifecycle.end().await {
            info!("discovery stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }
}

impl std::fmt::Debug for DiscoveryDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryDriver")
            .field("reconciler", &self.reconciler)
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Store};
    use crate::testing::{target, FakeCluster, FakeConnector, FakeTargetSource};
    use std::collections::BTreeMap;

    fn driver() -> (DiscoveryDriver, Arc<FakeTargetSource>, Arc<FakeConnector>, Arc<MemoryStore>) {
        let source = Arc::new(FakeTargetSource::default());
        let connector = Arc::new(FakeConnector::default());
        let store = Arc::new(MemoryStore::new());
        let reconciler = DiscoveryReconciler::new(
            source.clone(),
            connector.clone(),
            store.clone(),
            BTreeMap::new(),
            "admin",
            "password",
        );
        (
            DiscoveryDriver::new(reconciler, Duration::from_secs(60)),
            source,
            connector,
            store,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_reports_every_attempt() {
        let (driver, source, _, _) = driver();
        let mut statuses = driver.take_status_receiver().unwrap();
        assert!(driver.take_status_receiver().is_none());

        driver.start().unwrap();
        assert_eq!(statuses.recv().await, Some(DiscoveryStatus::Success));

        source.set_failing(true);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(statuses.recv().await, Some(DiscoveryStatus::Failure));

        driver.stop().await;
        driver.stop().await;
        assert!(!driver.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keeps_polling_without_consumer() {
        let (driver, source, connector, store) = driver();
        driver.start().unwrap();

        // Far more polls than the status buffer holds.
        tokio::time::sleep(Duration::from_secs(60 * 40)).await;
        assert!(store.get_clusters().unwrap().is_empty());

        connector.serve("http://10.0.0.1:8091", FakeCluster::new("c1", &["10.0.0.1"]));
        source.set(vec![target("10.0.0.1:8091", &[])]);
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(store.get_clusters().unwrap().len(), 1);

        let mut statuses = driver.take_status_receiver().unwrap();
        let mut buffered = 0;
        while statuses.try_recv().is_ok() {
            buffered += 1;
        }
        assert_eq!(buffered, STATUS_CAPACITY);

        driver.stop().await;
    }
}
