//! Couchbase Server management REST API client.
//!
//! The client is split in two: [`CouchbaseClient`] carries credentials and an
//! HTTP connection pool and can ping arbitrary nodes, while
//! [`ClusterConnection`] is the result of bootstrapping against one
//! management endpoint and knows the cluster's identity.
//!
//! ## Example
//!
//! ```rust,no_run
//! use cbwatch_adapters::couchbase::CouchbaseClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = CouchbaseClient::builder()
//!         .credentials("Administrator", "password")
//!         .build()?;
//!
//!     let conn = client.connect("http://10.0.0.1:8091").await?;
//!     println!("{} ({}) has {} nodes", conn.info().name, conn.info().uuid, conn.info().nodes.len());
//!
//!     for bucket in conn.buckets_summary().await? {
//!         println!("  {} - {} items", bucket.name, bucket.items);
//!     }
//!     Ok(())
//! }
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use futures_util::future::join_all;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use cbwatch_types::{
    BucketSummary, ClusterInfo, NodeSummary, NodesSummary, RemoteCluster, RestEndpoint,
};

use crate::error::status_error;
use crate::AdapterError;

/// Identity and topology read while bootstrapping a connection.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BootstrapInfo {
    pub uuid: String,
    pub name: String,
    pub enterprise: bool,
    pub nodes: NodesSummary,
    pub cluster_info: ClusterInfo,
}

/// Credentials plus a pooled HTTP client.
#[derive(Debug, Clone)]
pub struct CouchbaseClient {
    client: Client,
    username: String,
    password: String,
}

impl CouchbaseClient {
    /// Create a new builder for configuring the client.
    pub fn builder() -> CouchbaseClientBuilder {
        CouchbaseClientBuilder::default()
    }

    /// Bootstrap against a management endpoint such as `https://host:18091`.
    pub async fn connect(&self, endpoint: &str) -> Result<ClusterConnection, AdapterError> {
        let endpoint = endpoint.trim_end_matches('/').to_string();

        let pools: PoolsInfo = self.get_json(&format!("{}/pools", endpoint)).await?;
        if pools.uuid.is_empty() {
            return Err(AdapterError::NotFound(format!(
                "{} is not part of a provisioned cluster",
                endpoint
            )));
        }

        let default: PoolsDefault = self
            .get_json(&format!("{}/pools/default", endpoint))
            .await?;

        let scheme = if endpoint.starts_with("https://") {
            "https"
        } else {
            "http"
        };

        let info = BootstrapInfo {
            uuid: pools.uuid,
            name: default.cluster_name,
            enterprise: pools.is_enterprise,
            nodes: NodesSummary(
                default
                    .nodes
                    .into_iter()
                    .map(|n| n.into_summary(scheme))
                    .collect(),
            ),
            cluster_info: default.storage_totals.into_cluster_info(),
        };

        Ok(ClusterConnection {
            http: self.clone(),
            endpoint,
            info,
        })
    }

    /// Ping the management endpoint of every host concurrently.
    ///
    /// Errors from individual hosts are joined; use
    /// [`AdapterError::is_auth`] to tell bad credentials from unreachable
    /// nodes.
    pub async fn ping_nodes(&self, hosts: &[String]) -> Result<(), AdapterError> {
        let pings = hosts.iter().map(|host| async move {
            let url = format!("{}/pools", host.trim_end_matches('/'));
            self.get_json::<Value>(&url).await
        });

        let errors = join_all(pings)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();

        match AdapterError::join(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, AdapterError> {
        let response = self
            .client
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response.status(), url));
        }

        response
            .json()
            .await
            .map_err(|e| AdapterError::Parse(format!("{}: {}", url, e)))
    }
}

/// Builder for CouchbaseClient.
#[derive(Debug, Default)]
pub struct CouchbaseClientBuilder {
    username: Option<String>,
    password: Option<String>,
    timeout: Option<Duration>,
    accept_invalid_certs: bool,
}

impl CouchbaseClientBuilder {
    /// Set the username and password for authentication.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set the request timeout (default: 30 seconds).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Accept self-signed certificates on `https` endpoints.
    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<CouchbaseClient, AdapterError> {
        let client = Client::builder()
            .timeout(self.timeout.unwrap_or(Duration::from_secs(30)))
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .build()?;

        Ok(CouchbaseClient {
            client,
            username: self.username.unwrap_or_default(),
            password: self.password.unwrap_or_default(),
        })
    }
}

/// A bootstrapped connection to one cluster.
#[derive(Debug, Clone)]
pub struct ClusterConnection {
    http: CouchbaseClient,
    endpoint: String,
    info: BootstrapInfo,
}

impl ClusterConnection {
    pub fn info(&self) -> &BootstrapInfo {
        &self.info
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// XDCR remote cluster references, excluding deleted ones.
    pub async fn remote_clusters(&self) -> Result<Vec<RemoteCluster>, AdapterError> {
        let remotes: Vec<RemoteClusterInfo> = self.get("/pools/default/remoteClusters").await?;
        Ok(remotes
            .into_iter()
            .filter(|r| !r.deleted)
            .map(|r| RemoteCluster {
                name: r.name,
                uuid: r.uuid,
                hostname: r.hostname,
            })
            .collect())
    }

    /// Summary of every bucket, sorted by name.
    pub async fn buckets_summary(&self) -> Result<Vec<BucketSummary>, AdapterError> {
        let buckets: Vec<BucketInfo> = self.get("/pools/default/buckets").await?;
        let mut summary: Vec<BucketSummary> =
            buckets.into_iter().map(BucketInfo::into_summary).collect();
        summary.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summary)
    }

    /// Raw statistics for one bucket.
    pub async fn bucket_stats(&self, bucket: &str) -> Result<Value, AdapterError> {
        self.get(&format!("/pools/default/buckets/{}/stats", bucket))
            .await
    }

    /// Fetch one of the auxiliary payloads cached on a snapshot.
    ///
    /// Service-specific endpoints (index storage, FTS, analytics) are queried
    /// on every node running that service and returned as an object keyed by
    /// hostname. Clusters without the service yield an empty object.
    pub async fn rest_data(&self, endpoint: RestEndpoint) -> Result<Value, AdapterError> {
        match endpoint {
            RestEndpoint::ServerGroups => self.get("/pools/default/serverGroups").await,
            RestEndpoint::NodeStorage => self.get("/nodes/self").await,
            RestEndpoint::AutoFailover => self.get("/settings/autoFailover").await,
            RestEndpoint::IndexStatus => self.get("/indexStatus").await,
            RestEndpoint::IndexSettings => self.get("/settings/indexes").await,
            RestEndpoint::UiLogs => self.get("/logs").await,
            RestEndpoint::IndexStorageStats => {
                self.per_service_node("index", ServicePorts::INDEX, "/stats/storage")
                    .await
            }
            RestEndpoint::FtsIndexStatus => {
                self.per_service_node("fts", ServicePorts::FTS, "/api/nsstats")
                    .await
            }
            RestEndpoint::AnalyticsDiagnostics => {
                self.per_service_node("cbas", ServicePorts::ANALYTICS, "/analytics/node/diagnostics")
                    .await
            }
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, AdapterError> {
        self.http
            .get_json(&format!("{}{}", self.endpoint, path))
            .await
    }

    async fn per_service_node(
        &self,
        service: &str,
        ports: ServicePorts,
        path: &str,
    ) -> Result<Value, AdapterError> {
        let secure = self.endpoint.starts_with("https://");
        let (scheme, port) = if secure {
            ("https", ports.secure)
        } else {
            ("http", ports.plain)
        };

        let requests = self.info.nodes.with_service(service).map(|node| {
            let hostname = node.hostname().to_string();
            let url = format!("{}://{}:{}{}", scheme, bracket_ipv6(&hostname), port, path);
            async move { (hostname, self.http.get_json::<Value>(&url).await) }
        });

        let mut values = serde_json::Map::new();
        let mut errors = Vec::new();
        for (hostname, result) in join_all(requests).await {
            match result {
                Ok(value) => {
                    values.insert(hostname, value);
                }
                Err(e) => errors.push(e),
            }
        }

        // Partial data is still useful to checkers, so only fail when every node failed.
        if values.is_empty() {
            if let Some(err) = AdapterError::join(errors) {
                return Err(err);
            }
        }
        Ok(Value::Object(values))
    }
}

#[derive(Debug, Clone, Copy)]
struct ServicePorts {
    plain: u16,
    secure: u16,
}

impl ServicePorts {
    const INDEX: ServicePorts = ServicePorts {
        plain: 9102,
        secure: 19102,
    };
    const FTS: ServicePorts = ServicePorts {
        plain: 8094,
        secure: 18094,
    };
    const ANALYTICS: ServicePorts = ServicePorts {
        plain: 8095,
        secure: 18095,
    };
}

fn bracket_ipv6(host: &str) -> String {
    if host.contains(':') {
        format!("[{}]", host)
    } else {
        host.to_string()
    }
}

/// `/pools` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PoolsInfo {
    #[serde(default)]
    uuid: String,
    #[serde(default)]
    is_enterprise: bool,
}

/// `/pools/default` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PoolsDefault {
    #[serde(default)]
    cluster_name: String,
    #[serde(default)]
    nodes: Vec<NodeInfo>,
    #[serde(default)]
    storage_totals: StorageTotals,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeInfo {
    #[serde(default, rename = "nodeUUID")]
    node_uuid: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    hostname: String,
    #[serde(default)]
    os: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    cluster_membership: String,
    #[serde(default)]
    services: Vec<String>,
    #[serde(default)]
    system_stats: SystemStats,
    #[serde(default)]
    cpu_count: u32,
    #[serde(default)]
    uptime: String,
}

impl NodeInfo {
    fn into_summary(self, scheme: &str) -> NodeSummary {
        NodeSummary {
            node_uuid: self.node_uuid,
            version: self.version,
            host: format!("{}://{}", scheme, self.hostname),
            os: self.os,
            status: self.status,
            cluster_membership: self.cluster_membership,
            services: self.services,
            swap_used: self.system_stats.swap_used,
            swap_total: self.system_stats.swap_total,
            cpu_utilization: self.system_stats.cpu_utilization_rate,
            mem_total: self.system_stats.mem_total,
            mem_free: self.system_stats.mem_free,
            cpu_count: self.cpu_count,
            uptime: self.uptime,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SystemStats {
    #[serde(default)]
    cpu_utilization_rate: f64,
    #[serde(default)]
    swap_total: u64,
    #[serde(default)]
    swap_used: u64,
    #[serde(default)]
    mem_total: u64,
    #[serde(default)]
    mem_free: u64,
}

#[derive(Debug, Default, Deserialize)]
struct StorageTotals {
    #[serde(default)]
    ram: RamTotals,
    #[serde(default)]
    hdd: HddTotals,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RamTotals {
    #[serde(default)]
    total: u64,
    #[serde(default)]
    used: u64,
    #[serde(default)]
    quota_total: u64,
    #[serde(default)]
    quota_used: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HddTotals {
    #[serde(default)]
    total: u64,
    #[serde(default)]
    used: u64,
    #[serde(default)]
    used_by_data: u64,
}

impl StorageTotals {
    fn into_cluster_info(self) -> ClusterInfo {
        ClusterInfo {
            ram_total: self.ram.total,
            ram_used: self.ram.used,
            ram_quota_total: self.ram.quota_total,
            ram_quota_used: self.ram.quota_used,
            disk_total: self.hdd.total,
            disk_used: self.hdd.used,
            disk_used_by_data: self.hdd.used_by_data,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BucketInfo {
    name: String,
    #[serde(default)]
    bucket_type: String,
    #[serde(default)]
    compression_mode: String,
    #[serde(default)]
    conflict_resolution_type: String,
    #[serde(default)]
    storage_backend: String,
    #[serde(default)]
    eviction_policy: String,
    #[serde(default)]
    replica_number: u32,
    #[serde(default)]
    quota: BucketQuota,
    #[serde(default)]
    basic_stats: BucketBasicStats,
    #[serde(default)]
    controllers: BTreeMap<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BucketQuota {
    #[serde(default)]
    ram: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BucketBasicStats {
    #[serde(default)]
    mem_used: u64,
    #[serde(default)]
    item_count: u64,
}

impl BucketInfo {
    fn into_summary(self) -> BucketSummary {
        // The REST API still calls couchbase buckets "membase".
        let bucket_type = if self.bucket_type == "membase" {
            "couchbase".to_string()
        } else {
            self.bucket_type
        };

        BucketSummary {
            name: self.name,
            compression_mode: self.compression_mode,
            conflict_resolution_type: self.conflict_resolution_type,
            bucket_type,
            storage_backend: self.storage_backend,
            eviction_policy: self.eviction_policy,
            quota: self.quota.ram,
            quota_used: self.basic_stats.mem_used,
            flush_enabled: self.controllers.contains_key("flush"),
            num_replicas: self.replica_number,
            items: self.basic_stats.item_count,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RemoteClusterInfo {
    #[serde(default)]
    name: String,
    #[serde(default)]
    uuid: String,
    #[serde(default)]
    hostname: String,
    #[serde(default)]
    deleted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_defaults() {
        let client = CouchbaseClient::builder().build().unwrap();
        assert_eq!(client.username, "");
        assert_eq!(client.password, "");
    }

    #[test]
    fn test_builder_custom() {
        let client = CouchbaseClient::builder()
            .credentials("Administrator", "secret")
            .timeout(Duration::from_secs(5))
            .accept_invalid_certs(true)
            .build()
            .unwrap();
        assert_eq!(client.username, "Administrator");
        assert_eq!(client.password, "secret");
    }

    #[test]
    fn test_node_info_to_summary() {
        let raw = json!({
            "nodeUUID": "a1b2",
            "version": "7.1.3-3479-enterprise",
            "hostname": "10.0.0.1:8091",
            "os": "x86_64-pc-linux-gnu",
            "status": "healthy",
            "clusterMembership": "active",
            "services": ["kv", "index"],
            "systemStats": {
                "cpu_utilization_rate": 12.5,
                "swap_total": 1024,
                "swap_used": 512,
                "mem_total": 8192,
                "mem_free": 4096
            },
            "cpuCount": 4,
            "uptime": "3600"
        });

        let node: NodeInfo = serde_json::from_value(raw).unwrap();
        let summary = node.into_summary("https");

        assert_eq!(summary.node_uuid, "a1b2");
        assert_eq!(summary.host, "https://10.0.0.1:8091");
        assert_eq!(summary.hostname(), "10.0.0.1");
        assert_eq!(summary.swap_used, 512);
        assert_eq!(summary.cpu_count, 4);
        assert_eq!(summary.services, vec!["kv", "index"]);
    }

    #[test]
    fn test_bucket_info_to_summary() {
        let raw = json!({
            "name": "travel-sample",
            "bucketType": "membase",
            "compressionMode": "passive",
            "conflictResolutionType": "seqno",
            "storageBackend": "couchstore",
            "evictionPolicy": "valueOnly",
            "replicaNumber": 1,
            "quota": {"ram": 104857600},
            "basicStats": {"memUsed": 5242880, "itemCount": 31591},
            "controllers": {"flush": "/pools/default/buckets/travel-sample/controller/doFlush"}
        });

        let bucket: BucketInfo = serde_json::from_value(raw).unwrap();
        let summary = bucket.into_summary();

        assert_eq!(summary.bucket_type, "couchbase");
        assert_eq!(summary.quota, 104857600);
        assert_eq!(summary.quota_used, 5242880);
        assert_eq!(summary.items, 31591);
        assert!(summary.flush_enabled);
        assert_eq!(summary.num_replicas, 1);
    }

    #[test]
    fn test_storage_totals_to_cluster_info() {
        let raw = json!({
            "ram": {"total": 100, "used": 50, "quotaTotal": 80, "quotaUsed": 40},
            "hdd": {"total": 1000, "used": 300, "usedByData": 200}
        });
        let totals: StorageTotals = serde_json::from_value(raw).unwrap();
        let info = totals.into_cluster_info();
        assert_eq!(info.ram_quota_total, 80);
        assert_eq!(info.disk_used_by_data, 200);
    }

    #[test]
    fn test_bracket_ipv6() {
        assert_eq!(bracket_ipv6("10.0.0.1"), "10.0.0.1");
        assert_eq!(bracket_ipv6("fd00::1"), "[fd00::1]");
    }

    #[tokio::test]
    async fn test_ping_unreachable_node_is_connection_error() {
        let client = CouchbaseClient::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap();

        let err = client
            .ping_nodes(&["http://127.0.0.1:1".to_string()])
            .await
            .unwrap_err();
        assert!(!err.is_auth());
    }
}
