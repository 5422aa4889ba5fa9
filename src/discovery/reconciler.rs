use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use cbwatch_adapters::prometheus::{PrometheusTargets, Target};
use cbwatch_adapters::AdapterError;
use tracing::{debug, info, warn};

use crate::client::{new_cluster, ClusterClient, ClusterConnector};
use crate::error::{MonitorError, StoreError};
use crate::store::Store;

const SECURE_MANAGEMENT_PORT: &str = "18091";
const MANAGEMENT_PORT: &str = "8091";

/// Where scrape targets come from.
#[async_trait]
pub trait TargetSource: Send + Sync {
    async fn targets(&self) -> Result<Vec<Target>, AdapterError>;
}

/// Active targets from the Prometheus HTTP API.
#[derive(Debug, Clone)]
pub struct PrometheusTargetSource(pub PrometheusTargets);

#[async_trait]
impl TargetSource for PrometheusTargetSource {
    async fn targets(&self) -> Result<Vec<Target>, AdapterError> {
        self.0.active_targets().await
    }
}

/// What one discovery poll changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DiscoveryOutcome {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Targets that could not be resolved to a cluster.
    pub skipped: usize,
}

impl DiscoveryOutcome {
    pub fn changed(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

pub struct DiscoveryReconciler {
    source: Arc<dyn TargetSource>,
    connector: Arc<dyn ClusterConnector>,
    store: Arc<dyn Store>,
    selector: BTreeMap<String, String>,
    cluster_user: String,
    cluster_password: String,
}

impl DiscoveryReconciler {
    pub fn new(
        source: Arc<dyn TargetSource>,
        connector: Arc<dyn ClusterConnector>,
        store: Arc<dyn Store>,
        selector: BTreeMap<String, String>,
        cluster_user: impl Into<String>,
        cluster_password: impl Into<String>,
    ) -> Self {
        Self {
            source,
            connector,
            store,
            selector,
            cluster_user: cluster_user.into(),
            cluster_password: cluster_password.into(),
        }
    }

    /// Poll the targets once and reconcile the registered clusters.
    ///
    /// A target that cannot be resolved is logged and skipped. Registered
    /// clusters not reachable from any target are deleted.
    pub async fn discover(&self) -> Result<DiscoveryOutcome, MonitorError> {
        let targets = self.source.targets().await?;
        let known: BTreeSet<String> = self
            .store
            .get_clusters()?
            .into_iter()
            .map(|c| c.uuid)
            .collect();

        let mut seen = BTreeSet::new();
        let mut outcome = DiscoveryOutcome::default();

        for target in targets.iter().filter(|t| t.matches(&self.selector)) {
            let Some(address) = target.address() else {
                debug!(scrape_url = %target.scrape_url, "target has no address");
                continue;
            };

            let client = match self.resolve(address).await {
                Ok(client) => client,
                Err(e) => {
                    warn!(
                        %address,
                        "could not create cluster client; last error: {}", e
                    );
                    outcome.skipped += 1;
                    continue;
                }
            };

            // A cluster only counts as seen once it is known or stored, so a
            // failed target leaves later targets of the same cluster a chance.
            let uuid = client.info().uuid.clone();
            if seen.contains(&uuid) {
                continue;
            }
            if known.contains(&uuid) {
                seen.insert(uuid);
                continue;
            }

            let buckets = match client.buckets_summary().await {
                Ok(buckets) => buckets,
                Err(e) => {
                    warn!(cluster = %uuid, %address, error = %e, "could not get buckets for discovered cluster");
                    outcome.skipped += 1;
                    continue;
                }
            };

            let cluster = new_cluster(
                client.info(),
                buckets,
                &self.cluster_user,
                &self.cluster_password,
            );
            match self.store.add_cluster(cluster) {
                Ok(()) => {
                    info!(cluster = %uuid, %address, "discovered cluster");
                    seen.insert(uuid.clone());
                    outcome.added.push(uuid);
                }
                Err(StoreError::AlreadyExists(_)) => {
                    seen.insert(uuid);
                }
                Err(e) => return Err(e.into()),
            }
        }

        for uuid in known.difference(&seen) {
            match self.store.delete_cluster(uuid) {
                Ok(()) => {
                    info!(cluster = %uuid, "cluster no longer discovered, removed");
                    outcome.removed.push(uuid.clone());
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(outcome)
    }

    /// Connect through the first candidate address that answers.
    async fn resolve(&self, address: &str) -> Result<Box<dyn ClusterClient>, AdapterError> {
        let mut last_error = None;
        for candidate in candidate_addresses(address) {
            match self
                .connector
                .connect(
                    std::slice::from_ref(&candidate),
                    &self.cluster_user,
                    &self.cluster_password,
                )
                .await
            {
                Ok(client) => return Ok(client),
                Err(e) => {
                    debug!(%candidate, error = %e, "candidate address failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| AdapterError::Connection(format!("no address for {}", address))))
    }
}

impl std::fmt::Debug for DiscoveryReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryReconciler")
            .field("selector", &self.selector)
            .field("cluster_user", &self.cluster_user)
            .finish_non_exhaustive()
    }
}

/// Management URLs to try for a target address, in order.
///
/// The address as given comes first (HTTPS when it already points at the
/// secure management port), then the secure and insecure management ports.
pub fn candidate_addresses(address: &str) -> Vec<String> {
    let (host, port) = split_host_port(address);
    let host = if host.contains(':') {
        format!("[{}]", host)
    } else {
        host.to_string()
    };

    let mut candidates = Vec::with_capacity(3);
    if let Some(port) = port {
        let scheme = if port == SECURE_MANAGEMENT_PORT {
            "https"
        } else {
            "http"
        };
        candidates.push(format!("{}://{}:{}", scheme, host, port));
    }
    for candidate in [
        format!("https://{}:{}", host, SECURE_MANAGEMENT_PORT),
        format!("http://{}:{}", host, MANAGEMENT_PORT),
    ] {
        if !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    }
    candidates
}

fn split_host_port(address: &str) -> (&str, Option<&str>) {
    let address = address
        .strip_prefix("https://")
        .or_else(|| address.strip_prefix("http://"))
        .unwrap_or(address)
        .trim_end_matches('/');

    if let Some(rest) = address.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            let port = rest[end + 1..].strip_prefix(':').filter(|p| !p.is_empty());
            return (&rest[..end], port);
        }
    }
    match address.rsplit_once(':') {
        // More than one colon without brackets is a bare IPv6 address.
        Some((host, port)) if !host.contains(':') => (host, Some(port).filter(|p| !p.is_empty())),
        _ => (address, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{target, CountingStore, FakeCluster, FakeConnector, FakeTargetSource};

    struct Harness {
        source: Arc<FakeTargetSource>,
        connector: Arc<FakeConnector>,
        store: Arc<CountingStore>,
        reconciler: DiscoveryReconciler,
    }

    fn harness(selector: &[(&str, &str)]) -> Harness {
        let source = Arc::new(FakeTargetSource::default());
        let connector = Arc::new(FakeConnector::default());
        let store = Arc::new(CountingStore::default());
        let reconciler = DiscoveryReconciler::new(
            source.clone(),
            connector.clone(),
            store.clone(),
            selector
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            "admin",
            "password",
        );
        Harness {
            source,
            connector,
            store,
            reconciler,
        }
    }

    #[test]
    fn test_candidates_in_order() {
        assert_eq!(
            candidate_addresses("10.0.0.1:9102"),
            vec![
                "http://10.0.0.1:9102",
                "https://10.0.0.1:18091",
                "http://10.0.0.1:8091",
            ]
        );
        assert_eq!(
            candidate_addresses("10.0.0.1:18091"),
            vec!["https://10.0.0.1:18091", "http://10.0.0.1:8091"]
        );
        assert_eq!(
            candidate_addresses("db1.example.com"),
            vec!["https://db1.example.com:18091", "http://db1.example.com:8091"]
        );
    }

    #[test]
    fn test_candidates_bracket_ipv6() {
        assert_eq!(
            candidate_addresses("[fd00::1]:8091"),
            vec!["http://[fd00::1]:8091", "https://[fd00::1]:18091"]
        );
        assert_eq!(
            candidate_addresses("fd00::2"),
            vec!["https://[fd00::2]:18091", "http://[fd00::2]:8091"]
        );
    }

    #[tokio::test]
    async fn test_discover_converges_and_is_idempotent() {
        let h = harness(&[]);
        h.connector
            .serve("http://10.0.0.1:8091", FakeCluster::new("c1", &["10.0.0.1"]));
        h.connector
            .serve("https://10.0.0.2:18091", FakeCluster::new("c2", &["10.0.0.2"]));
        h.source.set(vec![
            target("10.0.0.1:9102", &[]),
            target("10.0.0.2:9102", &[]),
        ]);

        let outcome = h.reconciler.discover().await.unwrap();
        assert_eq!(outcome.added, vec!["c1".to_string(), "c2".to_string()]);
        assert!(outcome.removed.is_empty());

        let outcome = h.reconciler.discover().await.unwrap();
        assert!(!outcome.changed());
        assert_eq!(h.store.added().len(), 2);
        assert!(h.store.deleted().is_empty());

        let stored = h.store.get_cluster("c1").unwrap();
        assert_eq!(stored.user, "admin");
        assert_eq!(stored.buckets.len(), 1);
    }

    #[tokio::test]
    async fn test_vanished_cluster_is_removed() {
        let h = harness(&[]);
        h.connector
            .serve("http://10.0.0.1:8091", FakeCluster::new("c1", &["10.0.0.1"]));
        h.connector
            .serve("http://10.0.0.2:8091", FakeCluster::new("c2", &["10.0.0.2"]));
        h.source
            .set(vec![target("10.0.0.1:8091", &[]), target("10.0.0.2:8091", &[])]);
        h.reconciler.discover().await.unwrap();

        h.source.set(vec![target("10.0.0.1:8091", &[])]);
        let outcome = h.reconciler.discover().await.unwrap();
        assert_eq!(outcome.removed, vec!["c2".to_string()]);
        assert!(h.store.get_cluster("c2").unwrap_err().is_not_found());
        assert!(h.store.get_cluster("c1").is_ok());
    }

    #[tokio::test]
    async fn test_targets_for_same_cluster_are_deduplicated() {
        let h = harness(&[]);
        let cluster = FakeCluster::new("c1", &["10.0.0.1", "10.0.0.2"]);
        h.connector.serve("http://10.0.0.1:8091", cluster.clone());
        h.connector.serve("http://10.0.0.2:8091", cluster);
        h.source
            .set(vec![target("10.0.0.1:8091", &[]), target("10.0.0.2:8091", &[])]);

        let outcome = h.reconciler.discover().await.unwrap();
        assert_eq!(outcome.added, vec!["c1".to_string()]);
        assert_eq!(h.store.added().len(), 1);
    }

    #[tokio::test]
    async fn test_unresolvable_target_is_skipped() {
        let h = harness(&[("job", "couchbase")]);
        h.connector
            .serve("http://10.0.0.1:8091", FakeCluster::new("c1", &["10.0.0.1"]));
        let mut broken = FakeCluster::new("c3", &["10.0.0.3"]);
        broken.fail_buckets = true;
        h.connector.serve("http://10.0.0.3:8091", broken);
        h.source.set(vec![
            target("10.0.0.9:8091", &[("job", "couchbase")]),
            target("10.0.0.1:8091", &[("job", "couchbase")]),
            target("10.0.0.3:8091", &[("job", "couchbase")]),
            target("10.0.0.4:8091", &[("job", "node")]),
        ]);

        let outcome = h.reconciler.discover().await.unwrap();
        assert_eq!(outcome.added, vec!["c1".to_string()]);
        assert_eq!(outcome.skipped, 2);
    }

    #[tokio::test]
    async fn test_second_target_registers_cluster_after_first_fails() {
        let h = harness(&[]);
        let mut degraded = FakeCluster::new("c1", &["10.0.0.1", "10.0.0.2"]);
        degraded.fail_buckets = true;
        h.connector.serve("http://10.0.0.1:8091", degraded);
        h.connector.serve(
            "http://10.0.0.2:8091",
            FakeCluster::new("c1", &["10.0.0.1", "10.0.0.2"]),
        );
        h.source
            .set(vec![target("10.0.0.1:8091", &[]), target("10.0.0.2:8091", &[])]);

        let outcome = h.reconciler.discover().await.unwrap();
        assert_eq!(outcome.added, vec!["c1".to_string()]);
        assert_eq!(outcome.skipped, 1);
        assert!(h.store.get_cluster("c1").is_ok());
    }

    #[tokio::test]
    async fn test_source_failure_is_an_error() {
        let h = harness(&[]);
        h.source.set_failing(true);
        assert!(h.reconciler.discover().await.is_err());
        assert_eq!(h.store.calls(), 0);
    }
}
