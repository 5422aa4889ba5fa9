//! Seams between the engine and the remote systems it talks to.
//!
//! The orchestrator, discovery and agent-port pool only use these traits.
//! Production implementations wrap the HTTP adapters from
//! `cbwatch-adapters`; tests use the in-memory doubles in `testing`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cbwatch_adapters::agent::{AgentClient, DEFAULT_AGENT_PORT};
use cbwatch_adapters::couchbase::{BootstrapInfo, ClusterConnection, CouchbaseClient};
use cbwatch_adapters::AdapterError;
use cbwatch_types::chrono::Utc;
use cbwatch_types::{
    BucketSummary, ClusterSnapshot, RemoteCluster, RestEndpoint, WrappedCheckerResult,
};
use serde_json::Value;

/// A bootstrapped client for one cluster's management API.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Identity and node list read while bootstrapping.
    fn info(&self) -> &BootstrapInfo;
    async fn remote_clusters(&self) -> Result<Vec<RemoteCluster>, AdapterError>;
    async fn buckets_summary(&self) -> Result<Vec<BucketSummary>, AdapterError>;
    async fn bucket_stats(&self, bucket: &str) -> Result<Value, AdapterError>;
    async fn rest_data(&self, endpoint: RestEndpoint) -> Result<Value, AdapterError>;
}

/// Build the record for a newly added cluster from its bootstrap data.
pub fn new_cluster(
    info: &BootstrapInfo,
    buckets: Vec<BucketSummary>,
    user: &str,
    password: &str,
) -> ClusterSnapshot {
    let mut cluster = ClusterSnapshot::new(&info.uuid, &info.name);
    cluster.user = user.to_string();
    cluster.password = password.to_string();
    cluster.enterprise = info.enterprise;
    cluster.nodes = info.nodes.clone();
    cluster.buckets = buckets;
    cluster.cluster_info = Some(info.cluster_info.clone());
    cluster.last_update = Utc::now();
    cluster
}

/// Creates cluster clients and pings nodes.
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    /// Bootstrap against the first of `hosts` that answers.
    ///
    /// Hosts are tried in order; the last error is returned if none works.
    async fn connect(
        &self,
        hosts: &[String],
        user: &str,
        password: &str,
    ) -> Result<Box<dyn ClusterClient>, AdapterError>;

    /// Ping the management endpoint of every host.
    async fn ping(&self, hosts: &[String], user: &str, password: &str) -> Result<(), AdapterError>;
}

/// A live connection to one node's diagnostic agent.
#[async_trait]
pub trait AgentPort: Send + Sync {
    fn host(&self) -> &str;

    /// Latest node-local results keyed by checker name.
    async fn checker_results(
        &self,
    ) -> Result<BTreeMap<String, WrappedCheckerResult>, AdapterError>;

    /// Release the connection. Called once when the node leaves the cluster
    /// or the orchestrator stops.
    fn close(&self) {}
}

/// Establishes agent connections.
#[async_trait]
pub trait AgentConnector: Send + Sync {
    /// Connect to the agent on `host`, activating it with the cluster
    /// credentials if needed.
    ///
    /// A refused connection means no agent is installed on the node.
    async fn connect(
        &self,
        host: &str,
        user: &str,
        password: &str,
    ) -> Result<Arc<dyn AgentPort>, AdapterError>;
}

/// [`ClusterConnector`] over the Couchbase management REST API.
#[derive(Debug, Clone)]
pub struct CouchbaseConnector {
    timeout: Duration,
    accept_invalid_certs: bool,
}

impl CouchbaseConnector {
    pub fn new(timeout: Duration, accept_invalid_certs: bool) -> Self {
        Self {
            timeout,
            accept_invalid_certs,
        }
    }

    fn client(&self, user: &str, password: &str) -> Result<CouchbaseClient, AdapterError> {
        CouchbaseClient::builder()
            .credentials(user, password)
            .timeout(self.timeout)
            .accept_invalid_certs(self.accept_invalid_certs)
            .build()
    }
}

impl Default for CouchbaseConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), true)
    }
}

#[async_trait]
impl ClusterConnector for CouchbaseConnector {
    async fn connect(
        &self,
        hosts: &[String],
        user: &str,
        password: &str,
    ) -> Result<Box<dyn ClusterClient>, AdapterError> {
        let client = self.client(user, password)?;
        let mut last_error = None;

        for host in hosts {
            match client.connect(host).await {
                Ok(connection) => return Ok(Box::new(CouchbaseClusterClient(connection))),
                // Wrong credentials will not work on any other host either.
                Err(e) if e.is_auth() => return Err(e),
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| AdapterError::Connection("no hosts to connect to".to_string())))
    }

    async fn ping(&self, hosts: &[String], user: &str, password: &str) -> Result<(), AdapterError> {
        self.client(user, password)?.ping_nodes(hosts).await
    }
}

struct CouchbaseClusterClient(ClusterConnection);

#[async_trait]
impl ClusterClient for CouchbaseClusterClient {
    fn info(&self) -> &BootstrapInfo {
        self.0.info()
    }

    async fn remote_clusters(&self) -> Result<Vec<RemoteCluster>, AdapterError> {
        self.0.remote_clusters().await
    }

    async fn buckets_summary(&self) -> Result<Vec<BucketSummary>, AdapterError> {
        self.0.buckets_summary().await
    }

    async fn bucket_stats(&self, bucket: &str) -> Result<Value, AdapterError> {
        self.0.bucket_stats(bucket).await
    }

    async fn rest_data(&self, endpoint: RestEndpoint) -> Result<Value, AdapterError> {
        self.0.rest_data(endpoint).await
    }
}

/// [`AgentConnector`] speaking the node agent HTTP protocol.
#[derive(Debug, Clone)]
pub struct HttpAgentConnector {
    port: u16,
    timeout: Duration,
}

impl HttpAgentConnector {
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self { port, timeout }
    }
}

impl Default for HttpAgentConnector {
    fn default() -> Self {
        Self::new(DEFAULT_AGENT_PORT, Duration::from_secs(60))
    }
}

#[async_trait]
impl AgentConnector for HttpAgentConnector {
    async fn connect(
        &self,
        host: &str,
        user: &str,
        password: &str,
    ) -> Result<Arc<dyn AgentPort>, AdapterError> {
        let client = AgentClient::builder()
            .host(host)
            .port(self.port)
            .credentials(user, password)
            .timeout(self.timeout)
            .build()?;
        client.wait_until_ready().await?;

        Ok(Arc::new(HttpAgentPort {
            host: host.to_string(),
            client,
        }))
    }
}

struct HttpAgentPort {
    host: String,
    client: AgentClient,
}

#[async_trait]
impl AgentPort for HttpAgentPort {
    fn host(&self) -> &str {
        &self.host
    }

    async fn checker_results(
        &self,
    ) -> Result<BTreeMap<String, WrappedCheckerResult>, AdapterError> {
        self.client.checker_results().await
    }
}
