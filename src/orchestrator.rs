//! Per-cluster monitoring loops.
//!
//! Each monitored cluster gets one [`ClusterOrchestrator`] running three
//! independent loops:
//!
//! - **heartbeat**: pings every node and records a liveness flag. Cheap and
//!   frequent.
//! - **checkers**: refreshes the cluster data, runs the checker registry on
//!   the shared [`CheckScheduler`] and stores the results. Only started for
//!   enterprise clusters.
//! - **agent ports**: keeps one agent connection per node.
//!
//! No loop failure is fatal; each logs and tries again on its next tick. The
//! exception is a UUID mismatch, which halts the checker loop until the
//! cluster is re-added.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cbwatch_metrics::CheckerMetrics;
use cbwatch_types::chrono::Utc;
use cbwatch_types::{
    ClusterProgress, ClusterSnapshot, FrequencyConfiguration, HeartIssue, RestCache,
    RestEndpoint, WrappedCheckerResult,
};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agentport::AgentPortPool;
use crate::alerts::AlertSink;
use crate::checks::{CheckScheduler, CheckerDefinitions};
use crate::client::{AgentConnector, ClusterClient, ClusterConnector};
use crate::error::MonitorError;
use crate::lifecycle::{spawn_periodic, Lifecycle};
use crate::store::{ClusterUpdate, Store};

/// Lifecycle and on-demand operations for one monitored cluster.
#[async_trait]
pub trait ClusterManager: Send + Sync {
    fn uuid(&self) -> String;

    /// Launch the background loops. A no-op when already running.
    fn start(&self) -> Result<(), MonitorError>;

    /// Cancel the loops and wait for them and any work they started.
    /// Safe to call when not running.
    async fn stop(&self);

    /// Replace the cluster identity and credentials used by later iterations.
    fn update_cluster_info(&self, cluster: ClusterSnapshot);

    fn progress(&self) -> Result<ClusterProgress, MonitorError>;

    /// One checker iteration, run now.
    async fn manually_run_checkers(&self) -> Result<(), MonitorError>;

    /// One heartbeat, run now.
    async fn manually_heartbeat(&self) -> Result<(), MonitorError>;

    fn is_running(&self) -> bool;
}

/// Collaborators shared by every orchestrator in the fleet.
#[derive(Clone)]
pub struct MonitorContext {
    pub store: Arc<dyn Store>,
    pub connector: Arc<dyn ClusterConnector>,
    pub agent_connector: Arc<dyn AgentConnector>,
    pub scheduler: Arc<CheckScheduler>,
    pub alerts: Arc<dyn AlertSink>,
    pub metrics: CheckerMetrics,
    pub definitions: CheckerDefinitions,
    pub frequency: FrequencyConfiguration,
    /// Per-node timeout for fetching agent results.
    pub agent_timeout: Duration,
}

impl std::fmt::Debug for MonitorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorContext")
            .field("scheduler", &self.scheduler)
            .field("frequency", &self.frequency)
            .field("agent_timeout", &self.agent_timeout)
            .finish_non_exhaustive()
    }
}

struct Inner {
    cluster: RwLock<ClusterSnapshot>,
    context: MonitorContext,
    agents: Arc<AgentPortPool>,
    halted: AtomicBool,
}

/// The production [`ClusterManager`].
pub struct ClusterOrchestrator {
    inner: Arc<Inner>,
    lifecycle: Lifecycle,
}

impl ClusterOrchestrator {
    pub fn new(cluster: ClusterSnapshot, context: MonitorContext) -> Self {
        let agents = Arc::new(AgentPortPool::new(
            context.agent_connector.clone(),
            context.agent_timeout,
        ));
        let halted = cluster.heart_issue == HeartIssue::UuidMismatch;
        Self {
            inner: Arc::new(Inner {
                cluster: RwLock::new(cluster),
                context,
                agents,
                halted: AtomicBool::new(halted),
            }),
            lifecycle: Lifecycle::default(),
        }
    }

    /// A copy of the current cluster view.
    pub fn cluster(&self) -> ClusterSnapshot {
        self.inner.snapshot()
    }

    /// Hosts with a connected agent.
    pub fn agent_hosts(&self) -> Vec<String> {
        self.inner.agents.hosts()
    }
}

#[async_trait]
impl ClusterManager for ClusterOrchestrator {
    fn uuid(&self) -> String {
        self.inner.cluster.read().uuid.clone()
    }

    fn start(&self) -> Result<(), MonitorError> {
        let Some(running) = self.lifecycle.begin()? else {
            return Ok(());
        };
        let frequency = self.inner.context.frequency;
        let (uuid, enterprise) = {
            let cluster = self.inner.cluster.read();
            (cluster.uuid.clone(), cluster.enterprise)
        };

        let inner = self.inner.clone();
        spawn_periodic(&running, "heartbeat", frequency.heartbeat, move || {
            let inner = inner.clone();
            async move {
                if let Err(e) = inner.heartbeat().await {
                    warn!(cluster = %inner.uuid(), error = %e, "heartbeat failed");
                }
            }
        });

        let inner = self.inner.clone();
        let state = running.clone();
        spawn_periodic(
            &running,
            "agent-ports",
            frequency.agent_port_reconcile,
            move || {
                let inner = inner.clone();
                let state = state.clone();
                async move {
                    let cluster = inner.snapshot();
                    inner.agents.reconcile(&cluster, &state);
                }
            },
        );

        if enterprise {
            let inner = self.inner.clone();
            let cancel = running.cancel.clone();
            spawn_periodic(&running, "checkers", frequency.status, move || {
                let inner = inner.clone();
                let cancel = cancel.clone();
                async move {
                    if let Err(e) = inner.run_checkers(&cancel).await {
                        warn!(cluster = %inner.uuid(), error = %e, "checker run failed");
                    }
                }
            });
        } else {
            info!(cluster = %uuid, "not an enterprise cluster, diagnostic checks disabled");
        }

        info!(cluster = %uuid, "cluster monitoring started");
        Ok(())
    }

    async fn stop(&self) {
        if !self.lifecycle.end().await {
            return;
        }
        self.inner.agents.close_all();
        info!(cluster = %self.uuid(), "cluster monitoring stopped");
    }

    fn update_cluster_info(&self, cluster: ClusterSnapshot) {
        let halted = cluster.heart_issue == HeartIssue::UuidMismatch;
        *self.inner.cluster.write() = cluster;
        self.inner.halted.store(halted, Ordering::SeqCst);
    }

    fn progress(&self) -> Result<ClusterProgress, MonitorError> {
        let uuid = self.uuid();
        self.inner
            .context
            .scheduler
            .progress()
            .get(&uuid)
            .ok_or(MonitorError::NoProgress(uuid))
    }

    async fn manually_run_checkers(&self) -> Result<(), MonitorError> {
        let (uuid, enterprise) = {
            let cluster = self.inner.cluster.read();
            (cluster.uuid.clone(), cluster.enterprise)
        };
        if !enterprise {
            info!(cluster = %uuid, "not an enterprise cluster, not running checkers");
            return Ok(());
        }

        let cancel = self
            .lifecycle
            .current()
            .map(|r| r.cancel)
            .unwrap_or_default();
        self.inner.run_checkers(&cancel).await
    }

    async fn manually_heartbeat(&self) -> Result<(), MonitorError> {
        self.inner.heartbeat().await
    }

    fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }
}

impl std::fmt::Debug for ClusterOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterOrchestrator")
            .field("uuid", &self.uuid())
            .field("running", &self.is_running())
            .field("agents", &self.inner.agents)
            .finish()
    }
}

impl Inner {
    fn snapshot(&self) -> ClusterSnapshot {
        self.cluster.read().clone()
    }

    fn uuid(&self) -> String {
        self.cluster.read().uuid.clone()
    }

    async fn heartbeat(&self) -> Result<(), MonitorError> {
        let cluster = self.snapshot();
        let hosts = cluster.nodes.hosts();

        let issue = match self
            .context
            .connector
            .ping(&hosts, &cluster.user, &cluster.password)
            .await
        {
            Ok(()) => HeartIssue::None,
            Err(e) if e.is_auth() => {
                warn!(cluster = %cluster.uuid, error = %e, "heartbeat rejected credentials");
                HeartIssue::BadAuth
            }
            Err(e) => {
                warn!(cluster = %cluster.uuid, error = %e, "heartbeat could not reach cluster");
                HeartIssue::NoConnection
            }
        };
        self.set_heart_issue(&cluster.uuid, issue)
    }

    /// Persist `issue` if it differs from the current flag.
    ///
    /// A UUID mismatch is never overwritten by the heartbeat. The cluster lock
    /// is held across the compare and the store write so the heartbeat and
    /// checker loops cannot interleave here.
    fn set_heart_issue(&self, uuid: &str, issue: HeartIssue) -> Result<(), MonitorError> {
        let mut cluster = self.cluster.write();
        let current = cluster.heart_issue;
        if current == issue || current == HeartIssue::UuidMismatch {
            return Ok(());
        }
        if issue == HeartIssue::None && !current.is_transient() {
            return Ok(());
        }

        self.context
            .store
            .update_cluster(ClusterUpdate::heart_issue(uuid, issue))?;
        cluster.heart_issue = issue;
        drop(cluster);
        info!(cluster = %uuid, from = ?current, to = ?issue, "heart issue changed");
        Ok(())
    }

    async fn run_checkers(&self, cancel: &CancellationToken) -> Result<(), MonitorError> {
        let cluster = self.snapshot();
        if self.halted.load(Ordering::SeqCst) {
            return Err(MonitorError::Halted(cluster.uuid));
        }

        let client = self
            .context
            .connector
            .connect(&cluster.nodes.hosts(), &cluster.user, &cluster.password)
            .await?;

        let actual = client.info().uuid.clone();
        if actual != cluster.uuid {
            self.halted.store(true, Ordering::SeqCst);
            self.set_heart_issue(&cluster.uuid, HeartIssue::UuidMismatch)?;
            error!(
                cluster = %cluster.uuid,
                reported = %actual,
                "cluster UUID changed, checks halted until the cluster is re-added"
            );
            return Err(MonitorError::UuidMismatch {
                expected: cluster.uuid,
                actual,
            });
        }

        let refreshed = self.refresh(cluster, client.as_ref()).await?;
        let uuid = refreshed.uuid.clone();

        let batch = self.context.scheduler.check_cluster(refreshed.clone()).await?;
        let mut results = batch
            .await
            .map_err(|_| MonitorError::RunAborted(uuid.clone()))?;

        let metrics = self.context.metrics.cluster(&uuid, &refreshed.name);
        let (agent_results, fetched) = self.agents.checker_results(cancel).await;
        if let Err(e) = fetched {
            warn!(cluster = %uuid, error = %e, "agent results incomplete");
        }
        for mut result in agent_results {
            if let Some(err) = &result.error {
                warn!(cluster = %uuid, checker = %result.name(), error = %err, "agent checker errored");
                metrics.record_error(result.name());
                continue;
            }
            result.scope.cluster = uuid.clone();
            results.push(result);
        }

        // Discovery or an operator may have removed the cluster while the
        // batch ran. Results written now would never be cleaned up.
        match self.context.store.get_cluster(&uuid) {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                info!(cluster = %uuid, "cluster removed during checker run, results dropped");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        let mut stored = 0;
        for result in results {
            self.record(&refreshed, &metrics, &result);
            let name = result.name().to_string();
            match self.context.store.set_checker_result(result) {
                Ok(()) => stored += 1,
                Err(e) => {
                    warn!(cluster = %uuid, checker = %name, error = %e, "could not store checker result")
                }
            }
        }
        debug!(cluster = %uuid, results = stored, "checker results stored");

        if let Err(e) = self.context.alerts.manual_update().await {
            warn!(cluster = %uuid, error = %e, "alert update failed");
        }
        Ok(())
    }

    /// Re-read cluster data through `client`, persist it and return the new view.
    ///
    /// Every auxiliary fetch is independent: a failure is recorded in the
    /// cache and the remaining fetches still happen.
    async fn refresh(
        &self,
        cluster: ClusterSnapshot,
        client: &dyn ClusterClient,
    ) -> Result<ClusterSnapshot, MonitorError> {
        let mut refreshed = cluster;
        let info = client.info();
        refreshed.name = info.name.clone();
        refreshed.enterprise = info.enterprise;
        refreshed.nodes = info.nodes.clone();
        refreshed.cluster_info = Some(info.cluster_info.clone());

        match client.remote_clusters().await {
            Ok(remotes) => refreshed.remote_clusters = remotes,
            Err(e) => warn!(cluster = %refreshed.uuid, error = %e, "could not get remote clusters"),
        }
        match client.buckets_summary().await {
            Ok(buckets) => refreshed.buckets = buckets,
            Err(e) => warn!(cluster = %refreshed.uuid, error = %e, "could not get buckets"),
        }

        let mut cache = RestCache::default();
        for bucket in &refreshed.buckets {
            match client.bucket_stats(&bucket.name).await {
                Ok(stats) => {
                    cache.bucket_stats.insert(bucket.name.clone(), stats);
                }
                Err(e) => cache.record_bucket_error(&bucket.name, e.to_string()),
            }
        }
        for endpoint in RestEndpoint::ALL {
            match client.rest_data(endpoint).await {
                Ok(value) => cache.insert(endpoint, value),
                Err(e) => {
                    debug!(cluster = %refreshed.uuid, endpoint = endpoint.as_str(), error = %e, "REST fetch failed");
                    cache.record_error(endpoint, e.to_string());
                }
            }
        }
        refreshed.cache = cache;
        refreshed.last_update = Utc::now();

        self.context.store.update_cluster(ClusterUpdate {
            name: Some(refreshed.name.clone()),
            enterprise: Some(refreshed.enterprise),
            nodes: Some(refreshed.nodes.clone()),
            buckets: Some(refreshed.buckets.clone()),
            remote_clusters: Some(refreshed.remote_clusters.clone()),
            cluster_info: refreshed.cluster_info.clone(),
            last_update: Some(refreshed.last_update),
            cache: Some(refreshed.cache.clone()),
            ..ClusterUpdate::new(&refreshed.uuid)
        })?;

        // Credentials may have been swapped meanwhile; only data fields change here.
        {
            let mut current = self.cluster.write();
            current.name = refreshed.name.clone();
            current.enterprise = refreshed.enterprise;
            current.nodes = refreshed.nodes.clone();
            current.buckets = refreshed.buckets.clone();
            current.remote_clusters = refreshed.remote_clusters.clone();
            current.cluster_info = refreshed.cluster_info.clone();
            current.last_update = refreshed.last_update;
            current.cache = refreshed.cache.clone();
        }
        Ok(refreshed)
    }

    fn record(
        &self,
        cluster: &ClusterSnapshot,
        metrics: &cbwatch_metrics::ClusterHandle,
        result: &WrappedCheckerResult,
    ) {
        let id = self
            .context
            .definitions
            .get(result.name())
            .map_or("", |d| d.id.as_str());
        let node_name = result
            .scope
            .node
            .as_deref()
            .and_then(|n| cluster.nodes.find(n))
            .map(|n| n.hostname());
        metrics.record_result(result, id, node_name);
    }
}
