//! Persistence for cluster records, checker results and dismissals.
//!
//! The engine only talks to the [`Store`] trait. [`MemoryStore`] is the
//! implementation shipped with the binary; it keeps everything in memory and
//! can snapshot itself to a JSON file between runs.

use std::fs;
use std::path::Path;

use cbwatch_types::chrono::{DateTime, Utc};
use cbwatch_types::{
    BucketSummary, CheckerSearch, ClusterInfo, ClusterSnapshot, Dismissal, DismissalSearch,
    HeartIssue, NodesSummary, RemoteCluster, RestCache, WrappedCheckerResult,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// The persistence collaborator.
///
/// Every lookup of a single record returns [`StoreError::NotFound`] when the
/// record is absent so callers can tell it apart from other failures.
pub trait Store: Send + Sync {
    fn get_cluster(&self, uuid: &str) -> Result<ClusterSnapshot, StoreError>;
    fn get_clusters(&self) -> Result<Vec<ClusterSnapshot>, StoreError>;
    fn add_cluster(&self, cluster: ClusterSnapshot) -> Result<(), StoreError>;
    fn update_cluster(&self, update: ClusterUpdate) -> Result<(), StoreError>;
    /// Delete a cluster together with its results and dismissals.
    fn delete_cluster(&self, uuid: &str) -> Result<(), StoreError>;

    /// Insert a result, replacing any previous result in the same slot.
    fn set_checker_result(&self, result: WrappedCheckerResult) -> Result<(), StoreError>;
    fn get_checker_results(
        &self,
        search: &CheckerSearch,
    ) -> Result<Vec<WrappedCheckerResult>, StoreError>;
    fn delete_checker_results(&self, search: &CheckerSearch) -> Result<usize, StoreError>;

    fn get_dismissals(&self, search: &DismissalSearch) -> Result<Vec<Dismissal>, StoreError>;
    fn add_dismissal(&self, dismissal: Dismissal) -> Result<(), StoreError>;
    fn delete_dismissals(&self, search: &DismissalSearch) -> Result<usize, StoreError>;
    fn delete_expired_dismissals(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
}

/// A partial cluster update. Only the fields that are set are written.
#[derive(Debug, Clone, Default)]
pub struct ClusterUpdate {
    pub uuid: String,
    pub name: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub enterprise: Option<bool>,
    pub nodes: Option<NodesSummary>,
    pub buckets: Option<Vec<BucketSummary>>,
    pub remote_clusters: Option<Vec<RemoteCluster>>,
    pub cluster_info: Option<ClusterInfo>,
    pub heart_issue: Option<HeartIssue>,
    pub last_update: Option<DateTime<Utc>>,
    pub cache: Option<RestCache>,
}

impl ClusterUpdate {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            ..Default::default()
        }
    }

    /// An update that only touches the heartbeat flag.
    pub fn heart_issue(uuid: impl Into<String>, issue: HeartIssue) -> Self {
        Self {
            heart_issue: Some(issue),
            ..Self::new(uuid)
        }
    }

    /// True if the update writes anything besides the heartbeat flag.
    pub fn refreshes_data(&self) -> bool {
        self.name.is_some()
            || self.nodes.is_some()
            || self.buckets.is_some()
            || self.remote_clusters.is_some()
            || self.cluster_info.is_some()
            || self.cache.is_some()
    }

    fn apply(self, cluster: &mut ClusterSnapshot) {
        if let Some(name) = self.name {
            cluster.name = name;
        }
        if let Some(user) = self.user {
            cluster.user = user;
        }
        if let Some(password) = self.password {
            cluster.password = password;
        }
        if let Some(enterprise) = self.enterprise {
            cluster.enterprise = enterprise;
        }
        if let Some(nodes) = self.nodes {
            cluster.nodes = nodes;
        }
        if let Some(buckets) = self.buckets {
            cluster.buckets = buckets;
        }
        if let Some(remote_clusters) = self.remote_clusters {
            cluster.remote_clusters = remote_clusters;
        }
        if let Some(info) = self.cluster_info {
            cluster.cluster_info = Some(info);
        }
        if let Some(issue) = self.heart_issue {
            cluster.heart_issue = issue;
        }
        if let Some(last_update) = self.last_update {
            cluster.last_update = last_update;
        }
        if let Some(cache) = self.cache {
            cluster.cache = cache;
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct StoreData {
    clusters: Vec<ClusterSnapshot>,
    results: Vec<WrappedCheckerResult>,
    dismissals: Vec<Dismissal>,
}

/// In-memory [`Store`] guarded by a single read-write lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<StoreData>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a store previously written by [`MemoryStore::save_to`].
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let bytes = fs::read(path)?;
        let data: StoreData = serde_json::from_slice(&bytes)?;
        Ok(Self {
            data: RwLock::new(data),
        })
    }

    /// Write the whole store to a JSON file.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(&*self.data.read())?;
        fs::write(path, bytes)?;
        Ok(())
    }
}

impl Store for MemoryStore {
    fn get_cluster(&self, uuid: &str) -> Result<ClusterSnapshot, StoreError> {
        self.data
            .read()
            .clusters
            .iter()
            .find(|c| c.uuid == uuid)
            .cloned()
            .ok_or_else(|| cluster_not_found(uuid))
    }

    fn get_clusters(&self) -> Result<Vec<ClusterSnapshot>, StoreError> {
        Ok(self.data.read().clusters.clone())
    }

    fn add_cluster(&self, cluster: ClusterSnapshot) -> Result<(), StoreError> {
        let mut data = self.data.write();
        if data.clusters.iter().any(|c| c.uuid == cluster.uuid) {
            return Err(StoreError::AlreadyExists(format!("cluster '{}'", cluster.uuid)));
        }
        data.clusters.push(cluster);
        Ok(())
    }

    fn update_cluster(&self, update: ClusterUpdate) -> Result<(), StoreError> {
        let mut data = self.data.write();
        let cluster = data
            .clusters
            .iter_mut()
            .find(|c| c.uuid == update.uuid)
            .ok_or_else(|| cluster_not_found(&update.uuid))?;
        update.apply(cluster);
        Ok(())
    }

    fn delete_cluster(&self, uuid: &str) -> Result<(), StoreError> {
        let mut data = self.data.write();
        let before = data.clusters.len();
        data.clusters.retain(|c| c.uuid != uuid);
        if data.clusters.len() == before {
            return Err(cluster_not_found(uuid));
        }

        data.results.retain(|r| r.scope.cluster != uuid);
        data.dismissals
            .retain(|d| d.cluster_uuid.as_deref() != Some(uuid));
        Ok(())
    }

    fn set_checker_result(&self, result: WrappedCheckerResult) -> Result<(), StoreError> {
        let mut data = self.data.write();
        let key = result.key();
        match data.results.iter_mut().find(|r| r.key() == key) {
            Some(existing) => *existing = result,
            None => data.results.push(result),
        }
        Ok(())
    }

    fn get_checker_results(
        &self,
        search: &CheckerSearch,
    ) -> Result<Vec<WrappedCheckerResult>, StoreError> {
        Ok(self
            .data
            .read()
            .results
            .iter()
            .filter(|r| search.matches(r))
            .cloned()
            .collect())
    }

    fn delete_checker_results(&self, search: &CheckerSearch) -> Result<usize, StoreError> {
        let mut data = self.data.write();
        let before = data.results.len();
        data.results.retain(|r| !search.matches(r));
        Ok(before - data.results.len())
    }

    fn get_dismissals(&self, search: &DismissalSearch) -> Result<Vec<Dismissal>, StoreError> {
        Ok(self
            .data
            .read()
            .dismissals
            .iter()
            .filter(|d| search.matches(d))
            .cloned()
            .collect())
    }

    fn add_dismissal(&self, dismissal: Dismissal) -> Result<(), StoreError> {
        let mut data = self.data.write();
        if data.dismissals.iter().any(|d| d.id == dismissal.id) {
            return Err(StoreError::AlreadyExists(format!("dismissal '{}'", dismissal.id)));
        }
        data.dismissals.push(dismissal);
        Ok(())
    }

    fn delete_dismissals(&self, search: &DismissalSearch) -> Result<usize, StoreError> {
        let mut data = self.data.write();
        let before = data.dismissals.len();
        data.dismissals.retain(|d| !search.matches(d));
        Ok(before - data.dismissals.len())
    }

    fn delete_expired_dismissals(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut data = self.data.write();
        let before = data.dismissals.len();
        data.dismissals.retain(|d| !d.is_expired(now));
        Ok(before - data.dismissals.len())
    }
}

fn cluster_not_found(uuid: &str) -> StoreError {
    StoreError::NotFound(format!("cluster '{}'", uuid))
}
