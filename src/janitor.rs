//! Periodic cleanup of stale results and dismissals.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use cbwatch_types::chrono::{self, DateTime, Utc};
use cbwatch_types::{CheckerSearch, CheckerType, DismissalSearch};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::checks::CheckerDefinitions;
use crate::error::{MonitorError, StoreError};
use crate::lifecycle::Lifecycle;
use crate::store::Store;

/// Forced runs buffered before `force` starts dropping requests.
const FORCE_CAPACITY: usize = 20;

/// Counts from one cleanup pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct JanitorReport {
    pub expired_dismissals: usize,
    pub old_log_results: usize,
    pub orphaned_results: usize,
    pub orphaned_dismissals: usize,
}

pub struct Janitor {
    store: Arc<dyn Store>,
    definitions: CheckerDefinitions,
    log_alert_max_age: Duration,
    interval: Duration,
    force_tx: mpsc::Sender<()>,
    force_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<()>>>,
    lifecycle: Lifecycle,
}

impl Janitor {
    pub fn new(
        store: Arc<dyn Store>,
        definitions: CheckerDefinitions,
        log_alert_max_age: Duration,
        interval: Duration,
    ) -> Self {
        let (force_tx, force_rx) = mpsc::channel(FORCE_CAPACITY);
        Self {
            store,
            definitions,
            log_alert_max_age,
            interval,
            force_tx,
            force_rx: Arc::new(tokio::sync::Mutex::new(force_rx)),
            lifecycle: Lifecycle::default(),
        }
    }

    /// Start the cleanup loop. Runs immediately, then every interval or when forced.
    pub fn start(self: &Arc<Self>) -> Result<(), MonitorError> {
        let Some(running) = self.lifecycle.begin()? else {
            return Ok(());
        };
        let janitor = self.clone();
        let cancel = running.cancel.clone();

        running.tracker.spawn(async move {
            let mut force = janitor.force_rx.lock().await;
            let mut ticker = tokio::time::interval(janitor.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                    Some(()) = force.recv() => {}
                }
                if let Err(e) = janitor.run_once(Utc::now()) {
                    warn!(error = %e, "janitor pass failed");
                }
            }
            debug!("janitor stopped");
        });
        info!(interval = ?self.interval, "janitor started");
        Ok(())
    }

    pub async fn stop(&self) {
        if self.lifecycle.end().await {
            info!("janitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    /// Request an extra pass. Returns false if too many are already queued.
    pub fn force(&self) -> bool {
        self.force_tx.try_send(()).is_ok()
    }

    /// Run every cleanup step once.
    pub fn run_once(&self, now: DateTime<Utc>) -> Result<JanitorReport, StoreError> {
        let mut report = JanitorReport {
            expired_dismissals: self.store.delete_expired_dismissals(now)?,
            ..Default::default()
        };
        info!(count = report.expired_dismissals, "deleted expired dismissals");

        report.old_log_results = self.delete_old_log_results(now)?;
        info!(count = report.old_log_results, "deleted old log checker results");

        let (results, dismissals) = self.delete_orphans()?;
        report.orphaned_results = results;
        report.orphaned_dismissals = dismissals;
        info!(
            results,
            dismissals, "deleted results and dismissals for removed nodes and buckets"
        );

        Ok(report)
    }

    fn delete_old_log_results(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let max_age =
            chrono::Duration::from_std(self.log_alert_max_age).unwrap_or(chrono::Duration::MAX);
        let Some(cutoff) = now.checked_sub_signed(max_age) else {
            return Ok(0);
        };

        let mut deleted = 0;
        for definition in self
            .definitions
            .iter()
            .filter(|d| matches!(d.checker_type, CheckerType::Log))
        {
            deleted += self.store.delete_checker_results(&CheckerSearch {
                name: Some(definition.name.clone()),
                older_than: Some(cutoff),
                ..Default::default()
            })?;
        }
        Ok(deleted)
    }

    fn delete_orphans(&self) -> Result<(usize, usize), StoreError> {
        let mut results = 0;
        let mut dismissals = 0;

        for cluster in self.store.get_clusters()? {
            let stored = self
                .store
                .get_checker_results(&CheckerSearch::for_cluster(&cluster.uuid))?;
            let gone_nodes: BTreeSet<String> = stored
                .iter()
                .filter_map(|r| r.scope.node.clone())
                .filter(|n| cluster.nodes.find(n).is_none())
                .collect();
            let gone_buckets: BTreeSet<String> = stored
                .iter()
                .filter_map(|r| r.scope.bucket.clone())
                .filter(|b| cluster.bucket(b).is_none())
                .collect();

            for node in gone_nodes {
                results += self.store.delete_checker_results(&CheckerSearch {
                    node: Some(node),
                    ..CheckerSearch::for_cluster(&cluster.uuid)
                })?;
            }
            for bucket in gone_buckets {
                results += self.store.delete_checker_results(&CheckerSearch {
                    bucket: Some(bucket),
                    ..CheckerSearch::for_cluster(&cluster.uuid)
                })?;
            }

            let stale = self
                .store
                .get_dismissals(&DismissalSearch::for_cluster(&cluster.uuid))?
                .into_iter()
                .filter(|d| {
                    d.node_uuid.as_deref().is_some_and(|n| cluster.nodes.find(n).is_none())
                        || d.bucket_name.as_deref().is_some_and(|b| cluster.bucket(b).is_none())
                });
            for dismissal in stale {
                dismissals += self.store.delete_dismissals(&DismissalSearch {
                    id: Some(dismissal.id),
                    ..Default::default()
                })?;
            }
        }

        Ok((results, dismissals))
    }
}

impl std::fmt::Debug for Janitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Janitor")
            .field("interval", &self.interval)
            .field("log_alert_max_age", &self.log_alert_max_age)
            .field("running", &self.is_running())
            .finish()
    }
}
