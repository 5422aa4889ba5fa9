//! Cluster snapshot - a point-in-time view of one monitored cluster.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::ServerVersion;

/// Liveness classification recorded by the heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum HeartIssue {
    #[default]
    None,
    BadAuth,
    NoConnection,
    /// The cluster now reports a different UUID than the one it was added with.
    UuidMismatch,
}

impl HeartIssue {
    /// Issues that a later successful heartbeat is allowed to clear.
    pub fn is_transient(self) -> bool {
        matches!(self, HeartIssue::BadAuth | HeartIssue::NoConnection)
    }
}

/// Summary of one cluster node.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct NodeSummary {
    pub node_uuid: String,
    pub version: String,
    /// Management address, e.g. `http://10.0.0.1:8091`.
    pub host: String,
    pub os: String,
    pub status: String,
    pub cluster_membership: String,
    pub services: Vec<String>,
    pub swap_used: u64,
    pub swap_total: u64,
    pub cpu_utilization: f64,
    pub mem_total: u64,
    pub mem_free: u64,
    pub cpu_count: u32,
    pub uptime: String,
}

impl NodeSummary {
    /// Hostname without scheme or port, suitable for reaching sibling services.
    pub fn hostname(&self) -> &str {
        host_of(&self.host)
    }

    /// Parsed server version, if the node reported a valid one.
    pub fn server_version(&self) -> Option<ServerVersion> {
        self.version.parse().ok()
    }
}

/// All nodes in a cluster.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct NodesSummary(pub Vec<NodeSummary>);

impl NodesSummary {
    /// Management hosts of every node.
    pub fn hosts(&self) -> Vec<String> {
        self.0.iter().map(|n| n.host.clone()).collect()
    }

    /// Oldest version running in the cluster.
    ///
    /// Returns `None` when no node reports a parseable version.
    pub fn min_version(&self) -> Option<ServerVersion> {
        self.0.iter().filter_map(NodeSummary::server_version).min()
    }

    /// True if any node runs the given service (e.g. `"index"`).
    pub fn has_service(&self, service: &str) -> bool {
        self.0
            .iter()
            .any(|n| n.services.iter().any(|s| s == service))
    }

    /// Nodes running the given service.
    pub fn with_service<'a>(&'a self, service: &'a str) -> impl Iterator<Item = &'a NodeSummary> {
        self.0
            .iter()
            .filter(move |n| n.services.iter().any(|s| s == service))
    }

    pub fn find(&self, node_uuid: &str) -> Option<&NodeSummary> {
        self.0.iter().find(|n| n.node_uuid == node_uuid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeSummary> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<NodeSummary>> for NodesSummary {
    fn from(nodes: Vec<NodeSummary>) -> Self {
        Self(nodes)
    }
}

/// Summary of one bucket.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BucketSummary {
    pub name: String,
    pub compression_mode: String,
    pub conflict_resolution_type: String,
    /// `couchbase`, `ephemeral` or `memcached`.
    pub bucket_type: String,
    pub storage_backend: String,
    pub eviction_policy: String,
    pub quota: u64,
    pub quota_used: u64,
    pub flush_enabled: bool,
    pub num_replicas: u32,
    pub items: u64,
}

/// An XDCR remote cluster reference.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RemoteCluster {
    pub name: String,
    pub uuid: String,
    pub hostname: String,
}

/// Cluster-wide storage totals.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ClusterInfo {
    pub ram_total: u64,
    pub ram_used: u64,
    pub ram_quota_total: u64,
    pub ram_quota_used: u64,
    pub disk_total: u64,
    pub disk_used: u64,
    pub disk_used_by_data: u64,
}

/// Auxiliary REST payloads cached on a snapshot for checkers to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RestEndpoint {
    ServerGroups,
    NodeStorage,
    AutoFailover,
    IndexStatus,
    IndexSettings,
    IndexStorageStats,
    FtsIndexStatus,
    AnalyticsDiagnostics,
    UiLogs,
}

impl RestEndpoint {
    /// Every cached endpoint, in fetch order.
    pub const ALL: [RestEndpoint; 9] = [
        RestEndpoint::ServerGroups,
        RestEndpoint::NodeStorage,
        RestEndpoint::AutoFailover,
        RestEndpoint::IndexStatus,
        RestEndpoint::IndexSettings,
        RestEndpoint::IndexStorageStats,
        RestEndpoint::FtsIndexStatus,
        RestEndpoint::AnalyticsDiagnostics,
        RestEndpoint::UiLogs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RestEndpoint::ServerGroups => "server_groups",
            RestEndpoint::NodeStorage => "node_storage",
            RestEndpoint::AutoFailover => "auto_failover",
            RestEndpoint::IndexStatus => "index_status",
            RestEndpoint::IndexSettings => "index_settings",
            RestEndpoint::IndexStorageStats => "index_storage_stats",
            RestEndpoint::FtsIndexStatus => "fts_index_status",
            RestEndpoint::AnalyticsDiagnostics => "analytics_diagnostics",
            RestEndpoint::UiLogs => "ui_logs",
        }
    }
}

/// Cached REST data plus the error for every fetch that failed.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RestCache {
    pub data: BTreeMap<RestEndpoint, Value>,
    /// Per-bucket stats keyed by bucket name.
    pub bucket_stats: BTreeMap<String, Value>,
    /// Error message keyed by endpoint name (or `bucket_stats:<bucket>`).
    pub errors: BTreeMap<String, String>,
}

impl RestCache {
    pub fn get(&self, endpoint: RestEndpoint) -> Option<&Value> {
        self.data.get(&endpoint)
    }

    pub fn insert(&mut self, endpoint: RestEndpoint, value: Value) {
        self.errors.remove(endpoint.as_str());
        self.data.insert(endpoint, value);
    }

    pub fn record_error(&mut self, endpoint: RestEndpoint, error: impl Into<String>) {
        self.data.remove(&endpoint);
        self.errors
            .insert(endpoint.as_str().to_string(), error.into());
    }

    pub fn record_bucket_error(&mut self, bucket: &str, error: impl Into<String>) {
        self.bucket_stats.remove(bucket);
        self.errors
            .insert(format!("bucket_stats:{}", bucket), error.into());
    }
}

/// Point-in-time view of one monitored cluster.
///
/// This is both the persisted cluster record and the value handed to
/// checkers. Checkers always receive an owned copy, so later updates never
/// change a snapshot already in flight.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ClusterSnapshot {
    pub uuid: String,
    pub name: String,
    pub alias: Option<String>,
    pub user: String,
    pub password: String,
    pub enterprise: bool,
    pub nodes: NodesSummary,
    pub buckets: Vec<BucketSummary>,
    pub remote_clusters: Vec<RemoteCluster>,
    pub cluster_info: Option<ClusterInfo>,
    pub heart_issue: HeartIssue,
    pub last_update: DateTime<Utc>,
    pub cache: RestCache,
}

impl ClusterSnapshot {
    /// Create an empty snapshot for the given cluster.
    pub fn new(uuid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn bucket(&self, name: &str) -> Option<&BucketSummary> {
        self.buckets.iter().find(|b| b.name == name)
    }
}

/// Strip scheme, path and port from an address such as `https://[::1]:18091/`.
pub fn host_of(address: &str) -> &str {
    let without_scheme = address
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(address);
    let authority = without_scheme.split('/').next().unwrap_or(without_scheme);

    if let Some(rest) = authority.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match authority.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => authority,
    }
}
