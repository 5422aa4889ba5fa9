//! Per-cluster handle for recording checker metrics.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use cbwatch_types::WrappedCheckerResult;

use crate::state::{Labels, MetricsState};

/// A handle for recording metrics for a specific cluster.
///
/// Obtain a handle by calling [`CheckerMetrics::cluster`](crate::CheckerMetrics::cluster).
///
/// # Example
///
/// ```rust
/// use cbwatch_metrics::CheckerMetrics;
/// use cbwatch_types::{CheckerResult, CheckerStatus, ResultScope, WrappedCheckerResult};
///
/// let metrics = CheckerMetrics::new();
/// let handle = metrics.cluster("9d1bd2c5", "prod-eu");
///
/// let result = WrappedCheckerResult::new(
///     CheckerResult::new("singleOrTwoNodeCluster", CheckerStatus::Warn),
///     ResultScope::cluster("9d1bd2c5"),
/// );
/// handle.record_result(&result, "CB90001", None);
/// handle.record_error("mixedMode");
/// ```
#[derive(Clone)]
pub struct ClusterHandle {
    pub(crate) state: Arc<MetricsState>,
    pub(crate) uuid: String,
    pub(crate) name: String,
}

impl ClusterHandle {
    /// Record the status of one result as a gauge.
    ///
    /// The family is chosen from the result scope: bucket results go to the
    /// bucket gauge, node (and node log file) results to the node gauge,
    /// everything else to the cluster gauge.
    ///
    /// # Arguments
    ///
    /// * `result` - The checker result
    /// * `checker_id` - Stable checker identifier from the definitions table
    /// * `node_name` - Display name of the node, for node-scoped results
    pub fn record_result(
        &self,
        result: &WrappedCheckerResult,
        checker_id: &str,
        node_name: Option<&str>,
    ) {
        let value = result.status().as_int() as f64;
        let mut labels: Labels = vec![
            ("cluster_uuid", self.uuid.clone()),
            ("cluster_name", self.name.clone()),
            ("name", result.name().to_string()),
            ("id", checker_id.to_string()),
        ];

        if let Some(bucket) = &result.scope.bucket {
            labels.push(("bucket", bucket.clone()));
            self.state.bucket_status.set(labels, value);
        } else if let Some(node) = &result.scope.node {
            labels.push(("node_uuid", node.clone()));
            labels.push(("node_name", node_name.unwrap_or(node).to_string()));
            self.state.node_status.set(labels, value);
        } else {
            self.state.cluster_status.set(labels, value);
        }
    }

    /// Count a checker that raised an error instead of producing a result.
    pub fn record_error(&self, checker: &str) {
        let counter = self.state.checker_errored.get_or_create(vec![
            ("name", checker.to_string()),
            ("cluster", self.uuid.clone()),
        ]);
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the cluster UUID this handle records for.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }
}

impl std::fmt::Debug for ClusterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterHandle")
            .field("uuid", &self.uuid)
            .field("name", &self.name)
            .finish()
    }
}
