//! Supervisor owning one orchestrator per registered cluster.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use cbwatch_types::chrono::Utc;
use cbwatch_types::{ClusterProgress, ClusterSnapshot, Dismissal};
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::client::new_cluster;
use crate::discovery::{DiscoveryDriver, DiscoveryStatus};
use crate::dismissal::{self, DismissalRequest};
use crate::error::{DismissalError, MonitorError};
use crate::janitor::Janitor;
use crate::lifecycle::Lifecycle;
use crate::orchestrator::{ClusterManager, ClusterOrchestrator, MonitorContext};
use crate::report::{self, ClusterStatusReport};

/// Builds the manager for a cluster.
pub type ManagerFactory = Arc<dyn Fn(ClusterSnapshot) -> Arc<dyn ClusterManager> + Send + Sync>;

/// Changes made by [`FleetManager::sync_with_store`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub started: Vec<String>,
    pub stopped: Vec<String>,
}

pub struct FleetManager {
    context: MonitorContext,
    factory: ManagerFactory,
    managers: RwLock<HashMap<String, Arc<dyn ClusterManager>>>,
    janitor: Arc<Janitor>,
    discovery: Option<Arc<DiscoveryDriver>>,
    lifecycle: Lifecycle,
}

impl FleetManager {
    pub fn new(
        context: MonitorContext,
        janitor: Janitor,
        discovery: Option<DiscoveryDriver>,
    ) -> Self {
        let shared = context.clone();
        let factory: ManagerFactory = Arc::new(move |cluster| {
            Arc::new(ClusterOrchestrator::new(cluster, shared.clone())) as Arc<dyn ClusterManager>
        });
        Self::with_factory(context, janitor, discovery, factory)
    }

    pub fn with_factory(
        context: MonitorContext,
        janitor: Janitor,
        discovery: Option<DiscoveryDriver>,
        factory: ManagerFactory,
    ) -> Self {
        Self {
            context,
            factory,
            managers: RwLock::new(HashMap::new()),
            janitor: Arc::new(janitor),
            discovery: discovery.map(Arc::new),
            lifecycle: Lifecycle::default(),
        }
    }

    /// Start the janitor, one manager per stored cluster and discovery.
    pub async fn start(self: &Arc<Self>) -> Result<(), MonitorError> {
        let Some(running) = self.lifecycle.begin()? else {
            return Ok(());
        };
        self.janitor.start()?;
        let outcome = self.sync_with_store().await?;
        info!(clusters = outcome.started.len(), "fleet started");

        if let Some(driver) = &self.discovery {
            if let Some(mut statuses) = driver.take_status_receiver() {
                let fleet = self.clone();
                let cancel = running.cancel.clone();
                running.tracker.spawn(async move {
                    loop {
                        let status = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => break,
                            status = statuses.recv() => status,
                        };
                        match status {
                            Some(DiscoveryStatus::Success) => {
                                if let Err(e) = fleet.sync_with_store().await {
                                    warn!(error = %e, "could not apply discovered clusters");
                                }
                            }
                            Some(DiscoveryStatus::Failure) => {}
                            None => break,
                        }
                    }
                });
            }
            driver.start()?;
        }
        Ok(())
    }

    /// Stop everything in reverse start order. The scheduler goes last.
    pub async fn stop(&self) {
        if let Some(driver) = &self.discovery {
            driver.stop().await;
        }
        let was_running = self.lifecycle.end().await;

        let managers: Vec<Arc<dyn ClusterManager>> =
            self.managers.write().drain().map(|(_, m)| m).collect();
        for manager in managers {
            manager.stop().await;
        }
        self.janitor.stop().await;
        self.context.scheduler.stop().await;

        if was_running {
            info!("fleet stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    /// Create managers for stored clusters that have none and stop managers
    /// whose cluster left the store.
    pub async fn sync_with_store(&self) -> Result<SyncOutcome, MonitorError> {
        let clusters = self.context.store.get_clusters()?;
        let wanted: HashSet<String> = clusters.iter().map(|c| c.uuid.clone()).collect();

        let mut outcome = SyncOutcome::default();
        let mut to_start = Vec::new();
        let mut to_stop = Vec::new();
        {
            let mut managers = self.managers.write();
            for cluster in clusters {
                if managers.contains_key(&cluster.uuid) {
                    continue;
                }
                let uuid = cluster.uuid.clone();
                let manager = (self.factory)(cluster);
                managers.insert(uuid.clone(), manager.clone());
                to_start.push((uuid, manager));
            }

            let gone: Vec<String> = managers
                .keys()
                .filter(|uuid| !wanted.contains(*uuid))
                .cloned()
                .collect();
            for uuid in gone {
                if let Some(manager) = managers.remove(&uuid) {
                    to_stop.push((uuid, manager));
                }
            }
        }

        for (uuid, manager) in to_start {
            match manager.start() {
                Ok(()) => outcome.started.push(uuid),
                Err(e) => warn!(cluster = %uuid, error = %e, "could not start cluster manager"),
            }
        }
        for (uuid, manager) in to_stop {
            manager.stop().await;
            self.forget(&uuid);
            info!(cluster = %uuid, "cluster manager removed");
            outcome.stopped.push(uuid);
        }
        Ok(outcome)
    }

    /// Register the cluster reachable at `host` and start monitoring it.
    pub async fn add_cluster(
        &self,
        host: &str,
        user: &str,
        password: &str,
    ) -> Result<ClusterSnapshot, MonitorError> {
        let client = self
            .context
            .connector
            .connect(&[host.to_string()], user, password)
            .await?;
        let buckets = client.buckets_summary().await?;
        let cluster = new_cluster(client.info(), buckets, user, password);
        self.context.store.add_cluster(cluster.clone())?;

        let manager = (self.factory)(cluster.clone());
        let replaced = self
            .managers
            .write()
            .insert(cluster.uuid.clone(), manager.clone());
        if let Some(old) = replaced {
            old.stop().await;
        }
        if self.is_running() {
            manager.start()?;
        }
        info!(cluster = %cluster.uuid, name = %cluster.name, "cluster added");
        Ok(cluster)
    }

    /// Stop monitoring `uuid` and delete it with its results and dismissals.
    pub async fn remove_cluster(&self, uuid: &str) -> Result<(), MonitorError> {
        match self.context.store.delete_cluster(uuid) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => return Err(MonitorError::ClusterNotFound(uuid.to_string())),
            Err(e) => return Err(e.into()),
        }
        let manager = self.managers.write().remove(uuid);
        if let Some(manager) = manager {
            manager.stop().await;
        }
        self.forget(uuid);
        info!(cluster = %uuid, "cluster removed");
        Ok(())
    }

    /// Run a heartbeat and a checker iteration for every cluster in the
    /// background. Returns how many runs were started.
    pub fn trigger_checks(&self) -> usize {
        let Some(running) = self.lifecycle.current() else {
            return 0;
        };
        let managers: Vec<Arc<dyn ClusterManager>> =
            self.managers.read().values().cloned().collect();
        for manager in &managers {
            let manager = manager.clone();
            running.tracker.spawn(async move {
                if let Err(e) = run_checks(manager.as_ref()).await {
                    warn!(cluster = %manager.uuid(), error = %e, "triggered check run failed");
                }
            });
        }
        managers.len()
    }

    /// Heartbeat then run checkers for one cluster, waiting for both.
    pub async fn run_checks_for_cluster(&self, uuid: &str) -> Result<(), MonitorError> {
        let manager = self.manager(uuid)?;
        run_checks(manager.as_ref()).await
    }

    pub fn progress(&self, uuid: &str) -> Result<ClusterProgress, MonitorError> {
        self.manager(uuid)?.progress()
    }

    pub fn cluster_status(&self, uuid: &str) -> Result<ClusterStatusReport, MonitorError> {
        report::cluster_status(
            self.context.store.as_ref(),
            self.context.scheduler.progress(),
            uuid,
            Utc::now(),
        )
    }

    /// Validate and store a dismissal.
    pub fn dismiss(&self, request: DismissalRequest) -> Result<Dismissal, DismissalError> {
        dismissal::create_dismissal(
            self.context.store.as_ref(),
            &self.context.definitions,
            request,
            Utc::now(),
        )
    }

    /// Ask the janitor for an extra pass.
    pub fn force_cleanup(&self) -> bool {
        self.janitor.force()
    }

    /// UUIDs with a manager, sorted.
    pub fn clusters(&self) -> Vec<String> {
        let mut uuids: Vec<String> = self.managers.read().keys().cloned().collect();
        uuids.sort();
        uuids
    }

    fn manager(&self, uuid: &str) -> Result<Arc<dyn ClusterManager>, MonitorError> {
        self.managers
            .read()
            .get(uuid)
            .cloned()
            .ok_or_else(|| MonitorError::ClusterNotFound(uuid.to_string()))
    }

    fn forget(&self, uuid: &str) {
        self.context.metrics.forget_cluster(uuid);
        self.context.scheduler.progress().forget(uuid);
    }
}

async fn run_checks(manager: &dyn ClusterManager) -> Result<(), MonitorError> {
    manager.manually_heartbeat().await?;
    manager.manually_run_checkers().await
}

impl std::fmt::Debug for FleetManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetManager")
            .field("clusters", &self.clusters())
            .field("discovery", &self.discovery)
            .field("running", &self.is_running())
            .finish()
    }
}
