//! Per-cluster status view served to operators.

use cbwatch_types::chrono::{DateTime, Utc};
use cbwatch_types::{CheckerSearch, ClusterProgress, HeartIssue, WrappedCheckerResult};
use serde::Serialize;

use crate::checks::ProgressTracker;
use crate::dismissal;
use crate::error::MonitorError;
use crate::store::Store;

/// The current results for one cluster with dismissed findings hidden.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterStatusReport {
    pub uuid: String,
    pub name: String,
    pub heart_issue: HeartIssue,
    /// Most severe first.
    pub results: Vec<WrappedCheckerResult>,
    pub dismissed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ClusterProgress>,
    pub last_update: DateTime<Utc>,
}

/// Build the status report for `uuid`.
///
/// Results are returned even while the cluster has a heartbeat issue so the
/// last known state stays visible next to the flag.
pub fn cluster_status(
    store: &dyn Store,
    progress: &ProgressTracker,
    uuid: &str,
    now: DateTime<Utc>,
) -> Result<ClusterStatusReport, MonitorError> {
    let cluster = match store.get_cluster(uuid) {
        Ok(cluster) => cluster,
        Err(e) if e.is_not_found() => return Err(MonitorError::ClusterNotFound(uuid.to_string())),
        Err(e) => return Err(e.into()),
    };

    let results = store.get_checker_results(&CheckerSearch::for_cluster(uuid))?;
    let rules = dismissal::dismissals_for_cluster(store, uuid)?;
    let (mut results, dismissed) = dismissal::filter(results, &rules, now);
    results.sort_by(|a, b| {
        b.status()
            .as_int()
            .cmp(&a.status().as_int())
            .then_with(|| a.name().cmp(b.name()))
    });

    Ok(ClusterStatusReport {
        uuid: cluster.uuid,
        name: cluster.name,
        heart_issue: cluster.heart_issue,
        results,
        dismissed,
        progress: progress.get(uuid),
        last_update: cluster.last_update,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ClusterUpdate, MemoryStore};
    use cbwatch_types::{
        CheckerResult, CheckerStatus, ClusterSnapshot, DismissLevel, Dismissal, ResultScope,
    };

    fn add(store: &MemoryStore, name: &str, status: CheckerStatus) {
        store
            .set_checker_result(WrappedCheckerResult::new(
                CheckerResult::new(name, status),
                ResultScope::cluster("c1"),
            ))
            .unwrap();
    }

    #[test]
    fn test_report_sorts_and_counts_dismissed() {
        let store = MemoryStore::new();
        store.add_cluster(ClusterSnapshot::new("c1", "one")).unwrap();
        add(&store, "b", CheckerStatus::Warn);
        add(&store, "a", CheckerStatus::Warn);
        add(&store, "c", CheckerStatus::Alert);
        add(&store, "d", CheckerStatus::Good);
        store
            .add_dismissal(Dismissal {
                id: "x".to_string(),
                checker_name: "d".to_string(),
                level: DismissLevel::All,
                forever: true,
                until: None,
                cluster_uuid: None,
                bucket_name: None,
                node_uuid: None,
                log_file: None,
            })
            .unwrap();

        let report = cluster_status(&store, &ProgressTracker::new(), "c1", Utc::now()).unwrap();
        let names: Vec<&str> = report.results.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
        assert_eq!(report.dismissed, 1);
        assert!(report.progress.is_none());
    }

    #[test]
    fn test_stale_results_kept_with_heart_issue() {
        let store = MemoryStore::new();
        store.add_cluster(ClusterSnapshot::new("c1", "one")).unwrap();
        add(&store, "a", CheckerStatus::Warn);
        store
            .update_cluster(ClusterUpdate::heart_issue("c1", HeartIssue::NoConnection))
            .unwrap();

        let progress = ProgressTracker::new();
        progress.cluster_run_start("c1", 3);
        let report = cluster_status(&store, &progress, "c1", Utc::now()).unwrap();
        assert_eq!(report.heart_issue, HeartIssue::NoConnection);
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.progress.unwrap().total_checkers, 3);
    }

    #[test]
    fn test_unknown_cluster() {
        let err = cluster_status(&MemoryStore::new(), &ProgressTracker::new(), "x", Utc::now())
            .unwrap_err();
        assert!(matches!(err, MonitorError::ClusterNotFound(_)));
    }
}
