//! Internal state for checker metrics.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// Ordered `(label, value)` pairs identifying one series.
pub type Labels = Vec<(&'static str, String)>;

/// A gauge family: one value per label set.
#[derive(Debug, Default)]
pub struct GaugeFamily {
    pub series: RwLock<BTreeMap<Labels, f64>>,
}

impl GaugeFamily {
    pub fn set(&self, labels: Labels, value: f64) {
        self.series.write().insert(labels, value);
    }

    #[cfg(test)]
    pub fn get(&self, labels: &Labels) -> Option<f64> {
        self.series.read().get(labels).copied()
    }

    /// Drop every series whose `label` equals `value`.
    pub fn forget(&self, label: &str, value: &str) -> usize {
        let mut series = self.series.write();
        let before = series.len();
        series.retain(|labels, _| !has_label(labels, label, value));
        before - series.len()
    }

    pub fn collect(&self) -> Vec<(Labels, f64)> {
        self.series
            .read()
            .iter()
            .map(|(labels, value)| (labels.clone(), *value))
            .collect()
    }
}

/// A counter family: one monotonically increasing value per label set.
#[derive(Debug, Default)]
pub struct CounterFamily {
    pub series: RwLock<BTreeMap<Labels, Arc<AtomicU64>>>,
}

impl CounterFamily {
    /// Get or create the counter for a label set.
    pub fn get_or_create(&self, labels: Labels) -> Arc<AtomicU64> {
        // Fast path: check if it exists
        {
            let series = self.series.read();
            if let Some(counter) = series.get(&labels) {
                return counter.clone();
            }
        }

        // Slow path: create it
        let mut series = self.series.write();
        series
            .entry(labels)
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .clone()
    }

    pub fn forget(&self, label: &str, value: &str) -> usize {
        let mut series = self.series.write();
        let before = series.len();
        series.retain(|labels, _| !has_label(labels, label, value));
        before - series.len()
    }

    pub fn collect(&self) -> Vec<(Labels, u64)> {
        self.series
            .read()
            .iter()
            .map(|(labels, counter)| (labels.clone(), counter.load(Ordering::Relaxed)))
            .collect()
    }
}

/// All metric families exported by cbwatch.
#[derive(Debug, Default)]
pub struct MetricsState {
    pub cluster_status: GaugeFamily,
    pub node_status: GaugeFamily,
    pub bucket_status: GaugeFamily,
    pub checker_errored: CounterFamily,
}

impl MetricsState {
    /// Remove every series belonging to a cluster.
    pub fn forget_cluster(&self, uuid: &str) -> usize {
        self.cluster_status.forget("cluster_uuid", uuid)
            + self.node_status.forget("cluster_uuid", uuid)
            + self.bucket_status.forget("cluster_uuid", uuid)
            + self.checker_errored.forget("cluster", uuid)
    }
}

fn has_label(labels: &Labels, label: &str, value: &str) -> bool {
    labels.iter().any(|(k, v)| *k == label && v == value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(cluster: &str, name: &str) -> Labels {
        vec![("cluster_uuid", cluster.to_string()), ("name", name.to_string())]
    }

    #[test]
    fn gauge_set_overwrites() {
        let family = GaugeFamily::default();
        family.set(labels("c1", "a"), 20.0);
        family.set(labels("c1", "a"), 0.0);
        assert_eq!(family.get(&labels("c1", "a")), Some(0.0));
        assert_eq!(family.collect().len(), 1);
    }

    #[test]
    fn get_or_create_returns_same_arc_on_second_call() {
        let family = CounterFamily::default();

        let c1 = family.get_or_create(vec![("name", "x".to_string())]);
        let c2 = family.get_or_create(vec![("name", "x".to_string())]);

        // Should be the same Arc (pointer equality)
        assert!(Arc::ptr_eq(&c1, &c2));

        c1.fetch_add(3, Ordering::Relaxed);
        assert_eq!(c2.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn forget_cluster_drops_only_that_cluster() {
        let state = MetricsState::default();
        state.cluster_status.set(labels("c1", "a"), 0.0);
        state.cluster_status.set(labels("c2", "a"), 0.0);
        state.node_status.set(labels("c1", "b"), 20.0);
        state
            .checker_errored
            .get_or_create(vec![("name", "a".to_string()), ("cluster", "c1".to_string())])
            .fetch_add(1, Ordering::Relaxed);

        assert_eq!(state.forget_cluster("c1"), 3);
        assert_eq!(state.cluster_status.collect().len(), 1);
        assert!(state.node_status.collect().is_empty());
        assert!(state.checker_errored.collect().is_empty());
    }
}
