//! The main CheckerMetrics type.

use std::sync::Arc;

use crate::handle::ClusterHandle;
use crate::state::MetricsState;

/// Registry of checker status gauges and error counters for the whole fleet.
///
/// Cheap to clone; clones share the same series.
///
/// # Example
///
/// ```rust
/// use cbwatch_metrics::CheckerMetrics;
///
/// let metrics = CheckerMetrics::new();
/// let handle = metrics.cluster("9d1bd2c5", "prod-eu");
/// handle.record_error("mixedMode");
///
/// // When the cluster leaves the fleet, drop its series
/// metrics.forget_cluster("9d1bd2c5");
/// ```
#[derive(Debug, Clone, Default)]
pub struct CheckerMetrics {
    pub(crate) state: Arc<MetricsState>,
}

impl CheckerMetrics {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a handle for recording one cluster's metrics.
    ///
    /// # Arguments
    ///
    /// * `uuid` - The cluster UUID
    /// * `name` - The cluster's display name, used as a label
    pub fn cluster(&self, uuid: &str, name: &str) -> ClusterHandle {
        ClusterHandle {
            state: self.state.clone(),
            uuid: uuid.to_string(),
            name: name.to_string(),
        }
    }

    /// Remove every series recorded for a cluster.
    ///
    /// Returns the number of series removed.
    pub fn forget_cluster(&self, uuid: &str) -> usize {
        self.state.forget_cluster(uuid)
    }

    /// Number of status series currently held.
    pub fn series_count(&self) -> usize {
        self.state.cluster_status.collect().len()
            + self.state.node_status.collect().len()
            + self.state.bucket_status.collect().len()
    }
}
