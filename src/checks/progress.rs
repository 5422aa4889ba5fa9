//! Live progress of check batches.

use std::collections::HashMap;

use cbwatch_types::chrono::Utc;
use cbwatch_types::{ClusterProgress, RunStatus};
use parking_lot::RwLock;

/// Per-cluster counters for the batch currently running (or last run).
///
/// Written only by the check scheduler; anyone may read.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    runs: RwLock<HashMap<String, ClusterProgress>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the counters for a new batch of `total` checkers.
    pub fn cluster_run_start(&self, uuid: &str, total: usize) {
        self.runs
            .write()
            .insert(uuid.to_string(), ClusterProgress::started(total, Utc::now()));
    }

    /// Record one finished checker.
    pub fn checker_done(&self, uuid: &str, errored: bool) {
        if let Some(progress) = self.runs.write().get_mut(uuid) {
            if errored {
                progress.failed += 1;
            } else {
                progress.done += 1;
            }
        }
    }

    /// Mark the batch finished.
    pub fn cluster_run_end(&self, uuid: &str) {
        if let Some(progress) = self.runs.write().get_mut(uuid) {
            progress.status = RunStatus::Done;
            progress.end = Some(Utc::now());
        }
    }

    /// Copy of the cluster's counters, if a batch has ever started.
    pub fn get(&self, uuid: &str) -> Option<ClusterProgress> {
        self.runs.read().get(uuid).cloned()
    }

    pub fn forget(&self, uuid: &str) {
        self.runs.write().remove(uuid);
    }
}

/// Ends a run when dropped so every exit path reports completion.
pub(crate) struct RunGuard<'a> {
    tracker: &'a ProgressTracker,
    uuid: &'a str,
}

impl<'a> RunGuard<'a> {
    pub(crate) fn start(tracker: &'a ProgressTracker, uuid: &'a str, total: usize) -> Self {
        tracker.cluster_run_start(uuid, total);
        Self { tracker, uuid }
    }

    pub(crate) fn checker_done(&self, errored: bool) {
        self.tracker.checker_done(self.uuid, errored);
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.tracker.cluster_run_end(self.uuid);
    }
}
