//! In-memory doubles for the engine's seams.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cbwatch_adapters::couchbase::BootstrapInfo;
use cbwatch_adapters::prometheus::Target;
use cbwatch_adapters::AdapterError;
use cbwatch_types::chrono::{DateTime, Utc};
use cbwatch_types::{
    BucketSummary, CheckerResult, CheckerSearch, CheckerStatus, ClusterInfo, ClusterProgress,
    ClusterSnapshot, Dismissal, DismissalSearch, NodeSummary, NodesSummary, RemoteCluster,
    RestEndpoint, ResultScope, WrappedCheckerResult,
};
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::alerts::AlertSink;
use crate::client::{AgentConnector, AgentPort, ClusterClient, ClusterConnector};
use crate::discovery::TargetSource;
use crate::error::{MonitorError, StoreError};
use crate::orchestrator::ClusterManager;
use crate::store::{ClusterUpdate, MemoryStore, Store};

pub(crate) fn node(uuid: &str, host: &str) -> NodeSummary {
    NodeSummary {
        node_uuid: uuid.to_string(),
        version: "7.1.3-3479-enterprise".to_string(),
        host: format!("http://{}:8091", host),
        status: "healthy".to_string(),
        cluster_membership: "active".to_string(),
        services: vec!["kv".to_string()],
        ..Default::default()
    }
}

fn refused() -> AdapterError {
    AdapterError::Connection("connection refused".to_string())
}

/// What a fake cluster answers with.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeCluster {
    pub uuid: String,
    pub name: String,
    pub enterprise: bool,
    pub nodes: NodesSummary,
    pub buckets: Vec<BucketSummary>,
    pub failing: BTreeSet<RestEndpoint>,
    pub fail_buckets: bool,
}

impl FakeCluster {
    pub(crate) fn new(uuid: &str, hosts: &[&str]) -> Self {
        Self {
            uuid: uuid.to_string(),
            name: format!("cluster-{}", uuid),
            enterprise: true,
            nodes: hosts
                .iter()
                .enumerate()
                .map(|(i, h)| node(&format!("{}-n{}", uuid, i), h))
                .collect::<Vec<_>>()
                .into(),
            buckets: vec![BucketSummary {
                name: "travel".to_string(),
                num_replicas: 1,
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    /// The snapshot the engine would store for this cluster.
    pub(crate) fn snapshot(&self) -> ClusterSnapshot {
        let mut cluster = ClusterSnapshot::new(&self.uuid, &self.name);
        cluster.user = "admin".to_string();
        cluster.password = "password".to_string();
        cluster.enterprise = self.enterprise;
        cluster.nodes = self.nodes.clone();
        cluster.buckets = self.buckets.clone();
        cluster
    }
}

/// A [`ClusterConnector`] serving fake clusters by address.
#[derive(Default)]
pub(crate) struct FakeConnector {
    clusters: Mutex<HashMap<String, FakeCluster>>,
    bad_auth: AtomicBool,
    unreachable: AtomicBool,
    pub connects: AtomicUsize,
    pub pings: AtomicUsize,
}

impl FakeConnector {
    /// Serve `cluster` on the management address of each of its nodes.
    pub(crate) fn with_cluster(cluster: FakeCluster) -> Self {
        let connector = Self::default();
        connector.add(cluster);
        connector
    }

    pub(crate) fn add(&self, cluster: FakeCluster) {
        let mut clusters = self.clusters.lock();
        for host in cluster.nodes.hosts() {
            clusters.insert(host, cluster.clone());
        }
    }

    /// Serve `cluster` on one explicit address.
    pub(crate) fn serve(&self, address: &str, cluster: FakeCluster) {
        self.clusters.lock().insert(address.to_string(), cluster);
    }

    /// Apply `f` to every served cluster.
    pub(crate) fn update(&self, f: impl Fn(&mut FakeCluster)) {
        for cluster in self.clusters.lock().values_mut() {
            f(cluster);
        }
    }

    pub(crate) fn set_bad_auth(&self, bad: bool) {
        self.bad_auth.store(bad, Ordering::SeqCst);
    }

    pub(crate) fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterConnector for FakeConnector {
    async fn connect(
        &self,
        hosts: &[String],
        _user: &str,
        _password: &str,
    ) -> Result<Box<dyn ClusterClient>, AdapterError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.bad_auth.load(Ordering::SeqCst) {
            return Err(AdapterError::Auth("401 Unauthorized".to_string()));
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(refused());
        }

        let clusters = self.clusters.lock();
        hosts
            .iter()
            .find_map(|h| clusters.get(h))
            .map(|c| Box::new(FakeClient::new(c.clone())) as Box<dyn ClusterClient>)
            .ok_or_else(refused)
    }

    async fn ping(&self, _hosts: &[String], _user: &str, _password: &str) -> Result<(), AdapterError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        if self.bad_auth.load(Ordering::SeqCst) {
            return Err(AdapterError::Multiple(vec![AdapterError::Auth(
                "403 Forbidden".to_string(),
            )]));
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(refused());
        }
        Ok(())
    }
}

pub(crate) struct FakeClient {
    info: BootstrapInfo,
    cluster: FakeCluster,
}

impl FakeClient {
    fn new(cluster: FakeCluster) -> Self {
        Self {
            info: BootstrapInfo {
                uuid: cluster.uuid.clone(),
                name: cluster.name.clone(),
                enterprise: cluster.enterprise,
                nodes: cluster.nodes.clone(),
                cluster_info: ClusterInfo {
                    ram_total: 1 << 30,
                    ..Default::default()
                },
            },
            cluster,
        }
    }
}

#[async_trait]
impl ClusterClient for FakeClient {
    fn info(&self) -> &BootstrapInfo {
        &self.info
    }

    async fn remote_clusters(&self) -> Result<Vec<RemoteCluster>, AdapterError> {
        Ok(Vec::new())
    }

    async fn buckets_summary(&self) -> Result<Vec<BucketSummary>, AdapterError> {
        if self.cluster.fail_buckets {
            return Err(AdapterError::Http("500 Internal Server Error".to_string()));
        }
        Ok(self.cluster.buckets.clone())
    }

    async fn bucket_stats(&self, bucket: &str) -> Result<Value, AdapterError> {
        Ok(json!({ "bucket": bucket }))
    }

    async fn rest_data(&self, endpoint: RestEndpoint) -> Result<Value, AdapterError> {
        if self.cluster.failing.contains(&endpoint) {
            return Err(AdapterError::Http(format!("{} returned 500", endpoint.as_str())));
        }
        Ok(json!({ "endpoint": endpoint.as_str() }))
    }
}

#[derive(Default)]
struct AgentState {
    installed: Mutex<HashMap<String, CheckerStatus>>,
    failing: Mutex<HashSet<String>>,
    closed: AtomicUsize,
}

/// An [`AgentConnector`] where agents are "installed" per host.
#[derive(Default)]
pub(crate) struct FakeAgentConnector {
    state: Arc<AgentState>,
}

impl FakeAgentConnector {
    /// Install an agent on `host` reporting one result with `status`.
    pub(crate) fn install(&self, host: &str, status: CheckerStatus) {
        self.state.installed.lock().insert(host.to_string(), status);
    }

    /// Make result fetches from `host` fail.
    pub(crate) fn fail_fetch(&self, host: &str) {
        self.state.failing.lock().insert(host.to_string());
    }

    /// Number of ports closed so far.
    pub(crate) fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentConnector for FakeAgentConnector {
    async fn connect(
        &self,
        host: &str,
        _user: &str,
        _password: &str,
    ) -> Result<Arc<dyn AgentPort>, AdapterError> {
        if !self.state.installed.lock().contains_key(host) {
            return Err(refused());
        }
        Ok(Arc::new(FakeAgentPort {
            host: host.to_string(),
            state: self.state.clone(),
        }))
    }
}

struct FakeAgentPort {
    host: String,
    state: Arc<AgentState>,
}

#[async_trait]
impl AgentPort for FakeAgentPort {
    fn host(&self) -> &str {
        &self.host
    }

    async fn checker_results(
        &self,
    ) -> Result<BTreeMap<String, WrappedCheckerResult>, AdapterError> {
        if self.state.failing.lock().contains(&self.host) {
            return Err(AdapterError::Timeout);
        }
        let status = self
            .state
            .installed
            .lock()
            .get(&self.host)
            .copied()
            .unwrap_or(CheckerStatus::Good);

        let result = WrappedCheckerResult::new(
            CheckerResult::new("nodeDiskSpace", status),
            ResultScope::node("", &self.host),
        );
        Ok(BTreeMap::from([("nodeDiskSpace".to_string(), result)]))
    }

    fn close(&self) {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// A [`MemoryStore`] that records every call.
#[derive(Default)]
pub(crate) struct CountingStore {
    pub inner: MemoryStore,
    calls: AtomicUsize,
    updates: Mutex<Vec<ClusterUpdate>>,
    deleted: Mutex<Vec<String>>,
    added: Mutex<Vec<String>>,
    failing_results: Mutex<HashSet<String>>,
}

impl CountingStore {
    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn updates(&self) -> Vec<ClusterUpdate> {
        self.updates.lock().clone()
    }

    pub(crate) fn added(&self) -> Vec<String> {
        self.added.lock().clone()
    }

    pub(crate) fn deleted(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }

    /// Make writes of results from `checker` fail.
    pub(crate) fn fail_results_for(&self, checker: &str) {
        self.failing_results.lock().insert(checker.to_string());
    }
}

impl Store for CountingStore {
    fn get_cluster(&self, uuid: &str) -> Result<ClusterSnapshot, StoreError> {
        self.hit();
        self.inner.get_cluster(uuid)
    }

    fn get_clusters(&self) -> Result<Vec<ClusterSnapshot>, StoreError> {
        self.hit();
        self.inner.get_clusters()
    }

    fn add_cluster(&self, cluster: ClusterSnapshot) -> Result<(), StoreError> {
        self.hit();
        self.added.lock().push(cluster.uuid.clone());
        self.inner.add_cluster(cluster)
    }

    fn update_cluster(&self, update: ClusterUpdate) -> Result<(), StoreError> {
        self.hit();
        self.updates.lock().push(update.clone());
        self.inner.update_cluster(update)
    }

    fn delete_cluster(&self, uuid: &str) -> Result<(), StoreError> {
        self.hit();
        self.deleted.lock().push(uuid.to_string());
        self.inner.delete_cluster(uuid)
    }

    fn set_checker_result(&self, result: WrappedCheckerResult) -> Result<(), StoreError> {
        self.hit();
        if self.failing_results.lock().contains(result.name()) {
            return Err(StoreError::Io(std::io::Error::other("disk full")));
        }
        self.inner.set_checker_result(result)
    }

    fn get_checker_results(
        &self,
        search: &CheckerSearch,
    ) -> Result<Vec<WrappedCheckerResult>, StoreError> {
        self.hit();
        self.inner.get_checker_results(search)
    }

    fn delete_checker_results(&self, search: &CheckerSearch) -> Result<usize, StoreError> {
        self.hit();
        self.inner.delete_checker_results(search)
    }

    fn get_dismissals(&self, search: &DismissalSearch) -> Result<Vec<Dismissal>, StoreError> {
        self.hit();
        self.inner.get_dismissals(search)
    }

    fn add_dismissal(&self, dismissal: Dismissal) -> Result<(), StoreError> {
        self.hit();
        self.inner.add_dismissal(dismissal)
    }

    fn delete_dismissals(&self, search: &DismissalSearch) -> Result<usize, StoreError> {
        self.hit();
        self.inner.delete_dismissals(search)
    }

    fn delete_expired_dismissals(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        self.hit();
        self.inner.delete_expired_dismissals(now)
    }
}

#[derive(Default)]
pub(crate) struct RecordingAlertSink {
    updates: AtomicUsize,
}

impl RecordingAlertSink {
    pub(crate) fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AlertSink for RecordingAlertSink {
    async fn manual_update(&self) -> Result<(), MonitorError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A [`TargetSource`] returning a settable target list.
#[derive(Default)]
pub(crate) struct FakeTargetSource {
    targets: Mutex<Vec<Target>>,
    failing: AtomicBool,
}

impl FakeTargetSource {
    pub(crate) fn set(&self, targets: Vec<Target>) {
        *self.targets.lock() = targets;
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

pub(crate) fn target(address: &str, labels: &[(&str, &str)]) -> Target {
    Target {
        labels: labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        discovered_labels: BTreeMap::from([("__address__".to_string(), address.to_string())]),
        health: "up".to_string(),
        ..Default::default()
    }
}

#[async_trait]
impl TargetSource for FakeTargetSource {
    async fn targets(&self) -> Result<Vec<Target>, AdapterError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AdapterError::Http("503 Service Unavailable".to_string()));
        }
        Ok(self.targets.lock().clone())
    }
}

/// A [`ClusterManager`] that only counts calls.
#[derive(Debug)]
pub(crate) struct FakeManager {
    uuid: String,
    running: AtomicBool,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub runs: AtomicUsize,
    pub heartbeats: AtomicUsize,
}

impl FakeManager {
    pub(crate) fn new(uuid: &str) -> Self {
        Self {
            uuid: uuid.to_string(),
            running: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            runs: AtomicUsize::new(0),
            heartbeats: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ClusterManager for FakeManager {
    fn uuid(&self) -> String {
        self.uuid.clone()
    }

    fn start(&self) -> Result<(), MonitorError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }

    fn update_cluster_info(&self, _cluster: ClusterSnapshot) {}

    fn progress(&self) -> Result<ClusterProgress, MonitorError> {
        Err(MonitorError::NoProgress(self.uuid.clone()))
    }

    async fn manually_run_checkers(&self) -> Result<(), MonitorError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn manually_heartbeat(&self) -> Result<(), MonitorError> {
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
