//! Per-cluster pool of node agent connections.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use cbwatch_adapters::AdapterError;
use cbwatch_types::{ClusterSnapshot, WrappedCheckerResult};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{AgentConnector, AgentPort};
use crate::error::MultiError;
use crate::lifecycle::Running;

const FETCH_ERROR_CONTEXT: &str = "failed to get checker results from one or more node";

/// What one reconcile pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Hosts a connection attempt was started for.
    pub connecting: Vec<String>,
    /// Hosts whose connection was closed because the node left the cluster.
    pub closed: Vec<String>,
}

/// Agent connections for one cluster, keyed by node hostname.
///
/// The map has its own lock so reconciling never blocks a diagnostic run
/// reading the current connections.
pub struct AgentPortPool {
    connector: Arc<dyn AgentConnector>,
    ports: RwLock<HashMap<String, Arc<dyn AgentPort>>>,
    pending: Mutex<HashSet<String>>,
    fetch_timeout: Duration,
}

impl AgentPortPool {
    pub fn new(connector: Arc<dyn AgentConnector>, fetch_timeout: Duration) -> Self {
        Self {
            connector,
            ports: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashSet::new()),
            fetch_timeout,
        }
    }

    /// Bring the pool in line with the cluster's current node list.
    ///
    /// Missing connections are created in the background on the owner's
    /// task tracker because connecting blocks while an agent is down.
    /// Connections to nodes no longer in the cluster are closed.
    pub(crate) fn reconcile(
        self: &Arc<Self>,
        cluster: &ClusterSnapshot,
        running: &Running,
    ) -> ReconcileOutcome {
        let seen: HashSet<String> = cluster
            .nodes
            .iter()
            .map(|n| n.hostname().to_string())
            .filter(|h| !h.is_empty())
            .collect();
        let mut outcome = ReconcileOutcome::default();

        {
            let mut ports = self.ports.write();
            ports.retain(|host, port| {
                if seen.contains(host) {
                    return true;
                }
                port.close();
                outcome.closed.push(host.clone());
                false
            });
        }

        for host in &seen {
            if self.ports.read().contains_key(host) || !self.pending.lock().insert(host.clone()) {
                continue;
            }
            outcome.connecting.push(host.clone());
            self.spawn_connect(host.clone(), cluster, running);
        }

        for host in &outcome.closed {
            info!(cluster = %cluster.uuid, %host, "closed agent port for removed node");
        }
        outcome
    }

    fn spawn_connect(self: &Arc<Self>, host: String, cluster: &ClusterSnapshot, running: &Running) {
        let pool = self.clone();
        let cancel = running.cancel.clone();
        let uuid = cluster.uuid.clone();
        let user = cluster.user.clone();
        let password = cluster.password.clone();

        running.tracker.spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => None,
                r = pool.connector.connect(&host, &user, &password) => Some(r),
            };
            pool.pending.lock().remove(&host);

            match result {
                None => {}
                Some(Ok(port)) if cancel.is_cancelled() => port.close(),
                Some(Ok(port)) => {
                    debug!(cluster = %uuid, %host, "agent port connected");
                    if let Some(old) = pool.ports.write().insert(host, port) {
                        old.close();
                    }
                }
                Some(Err(e)) if e.is_connection_refused() => {
                    debug!(cluster = %uuid, %host, "agent not installed");
                }
                Some(Err(e)) => {
                    warn!(cluster = %uuid, %host, error = %e, "could not connect to agent");
                }
            }
        });
    }

    /// Fetch node-local results from every connected agent concurrently.
    ///
    /// Results from agents that answered are returned even when others
    /// failed; the failures are collected into the error.
    pub async fn checker_results(
        &self,
        cancel: &CancellationToken,
    ) -> (Vec<WrappedCheckerResult>, Result<(), MultiError>) {
        let ports: Vec<Arc<dyn AgentPort>> = self.ports.read().values().cloned().collect();
        let timeout = self.fetch_timeout;

        let mut fetches = JoinSet::new();
        for port in ports {
            let cancel = cancel.child_token();
            fetches.spawn(async move {
                let result = tokio::select! {
                    _ = cancel.cancelled() => Err(AdapterError::Timeout),
                    r = tokio::time::timeout(timeout, port.checker_results()) => {
                        r.unwrap_or(Err(AdapterError::Timeout))
                    }
                };
                (port.host().to_string(), result)
            });
        }

        let mut results = Vec::new();
        let mut errors = MultiError::new(FETCH_ERROR_CONTEXT);
        while let Some(joined) = fetches.join_next().await {
            match joined {
                Ok((_, Ok(batch))) => results.extend(batch.into_values()),
                Ok((host, Err(e))) => errors.push(format!("{}: {}", host, e)),
                Err(e) => errors.push(e),
            }
        }

        (results, errors.into_result())
    }

    /// Close every connection and forget them.
    pub fn close_all(&self) {
        for (_, port) in self.ports.write().drain() {
            port.close();
        }
    }

    /// Hostnames with a live connection, sorted.
    pub fn hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self.ports.read().keys().cloned().collect();
        hosts.sort();
        hosts
    }
}

impl std::fmt::Debug for AgentPortPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentPortPool")
            .field("hosts", &self.hosts())
            .field("fetch_timeout", &self.fetch_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Lifecycle;
    use crate::testing::{node, FakeAgentConnector};
    use cbwatch_types::CheckerStatus;

    fn cluster_with(hosts: &[&str]) -> ClusterSnapshot {
        let mut cluster = ClusterSnapshot::new("c1", "one");
        cluster.nodes = hosts
            .iter()
            .enumerate()
            .map(|(i, h)| node(&format!("n{}", i), h))
            .collect::<Vec<_>>()
            .into();
        cluster
    }

    async fn settle(lifecycle: &Lifecycle) {
        let running = lifecycle.current().unwrap();
        while running.tracker.len() > 0 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn reconcile_connects_new_and_closes_removed() {
        let connector = Arc::new(FakeAgentConnector::default());
        connector.install("10.0.0.1", CheckerStatus::Good);
        connector.install("10.0.0.2", CheckerStatus::Warn);
        let pool = Arc::new(AgentPortPool::new(connector.clone(), Duration::from_secs(5)));
        let lifecycle = Lifecycle::default();
        let running = lifecycle.begin().unwrap().unwrap();

        let outcome = pool.reconcile(&cluster_with(&["10.0.0.1", "10.0.0.2"]), &running);
        assert_eq!(outcome.connecting.len(), 2);
        settle(&lifecycle).await;
        assert_eq!(pool.hosts(), vec!["10.0.0.1", "10.0.0.2"]);

        let outcome = pool.reconcile(&cluster_with(&["10.0.0.1"]), &running);
        assert!(outcome.connecting.is_empty());
        assert_eq!(outcome.closed, vec!["10.0.0.2".to_string()]);
        assert_eq!(connector.closed(), 1);

        lifecycle.end().await;
    }

    #[tokio::test]
    async fn refused_agent_is_retried_next_reconcile() {
        let connector = Arc::new(FakeAgentConnector::default());
        let pool = Arc::new(AgentPortPool::new(connector.clone(), Duration::from_secs(5)));
        let lifecycle = Lifecycle::default();
        let running = lifecycle.begin().unwrap().unwrap();
        let cluster = cluster_with(&["10.0.0.9"]);

        pool.reconcile(&cluster, &running);
        settle(&lifecycle).await;
        assert!(pool.hosts().is_empty());

        connector.install("10.0.0.9", CheckerStatus::Good);
        let outcome = pool.reconcile(&cluster, &running);
        assert_eq!(outcome.connecting, vec!["10.0.0.9".to_string()]);
        settle(&lifecycle).await;
        assert_eq!(pool.hosts(), vec!["10.0.0.9"]);

        lifecycle.end().await;
    }

    #[tokio::test]
    async fn fan_out_keeps_partial_results() {
        let connector = Arc::new(FakeAgentConnector::default());
        connector.install("10.0.0.1", CheckerStatus::Alert);
        connector.install("10.0.0.2", CheckerStatus::Good);
        let pool = Arc::new(AgentPortPool::new(connector.clone(), Duration::from_secs(5)));
        let lifecycle = Lifecycle::default();
        let running = lifecycle.begin().unwrap().unwrap();

        pool.reconcile(&cluster_with(&["10.0.0.1", "10.0.0.2"]), &running);
        settle(&lifecycle).await;
        connector.fail_fetch("10.0.0.2");

        let (results, errors) = pool.checker_results(&running.cancel).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status(), CheckerStatus::Alert);

        let message = errors.unwrap_err().to_string();
        assert!(message.starts_with("failed to get checker results from one or more node: 10.0.0.2"));

        lifecycle.end().await;
    }

    #[tokio::test]
    async fn close_all_empties_pool() {
        let connector = Arc::new(FakeAgentConnector::default());
        connector.install("10.0.0.1", CheckerStatus::Good);
        let pool = Arc::new(AgentPortPool::new(connector.clone(), Duration::from_secs(5)));
        let lifecycle = Lifecycle::default();
        let running = lifecycle.begin().unwrap().unwrap();

        pool.reconcile(&cluster_with(&["10.0.0.1"]), &running);
        settle(&lifecycle).await;
        lifecycle.end().await;
        pool.close_all();

        assert!(pool.hosts().is_empty());
        assert_eq!(connector.closed(), 1);
    }
}
