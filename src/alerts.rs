//! Pushing undismissed findings to Alertmanager.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cbwatch_adapters::alertmanager::{Alert, AlertmanagerClient};
use cbwatch_adapters::AdapterError;
use cbwatch_types::chrono::{self, DateTime, Utc};
use cbwatch_types::{CheckerSearch, ClusterSnapshot, DismissalSearch, WrappedCheckerResult};
use tracing::debug;

use crate::checks::CheckerDefinitions;
use crate::dismissal;
use crate::error::{MonitorError, StoreError};
use crate::store::Store;

/// The "recompute and push now" trigger invoked after every result batch.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn manual_update(&self) -> Result<(), MonitorError>;
}

/// Sink used when no Alertmanager is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAlertSink;

#[async_trait]
impl AlertSink for NoopAlertSink {
    async fn manual_update(&self) -> Result<(), MonitorError> {
        Ok(())
    }
}

/// Builds alerts from the store and pushes them to every Alertmanager.
pub struct AlertGenerator {
    store: Arc<dyn Store>,
    clients: Vec<AlertmanagerClient>,
    definitions: CheckerDefinitions,
    alert_ttl: Duration,
}

impl AlertGenerator {
    pub fn new(
        store: Arc<dyn Store>,
        clients: Vec<AlertmanagerClient>,
        definitions: CheckerDefinitions,
        alert_ttl: Duration,
    ) -> Self {
        Self {
            store,
            clients,
            definitions,
            alert_ttl,
        }
    }

    /// Every warn or alert result in the fleet that no rule dismisses.
    pub fn alerts(&self, now: DateTime<Utc>) -> Result<Vec<Alert>, StoreError> {
        let results = self.store.get_checker_results(&CheckerSearch::default())?;
        let rules = self.store.get_dismissals(&DismissalSearch::default())?;
        let (kept, _) = dismissal::filter(results, &rules, now);

        let clusters: BTreeMap<String, ClusterSnapshot> = self
            .store
            .get_clusters()?
            .into_iter()
            .map(|c| (c.uuid.clone(), c))
            .collect();
        let ends_at = now
            + chrono::Duration::from_std(self.alert_ttl)
                .unwrap_or_else(|_| chrono::Duration::minutes(10));

        Ok(kept
            .iter()
            .filter(|r| r.status().is_actionable())
            .map(|r| self.alert(r, clusters.get(&r.scope.cluster), now, ends_at))
            .collect())
    }

    fn alert(
        &self,
        result: &WrappedCheckerResult,
        cluster: Option<&ClusterSnapshot>,
        now: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Alert {
        let mut labels = BTreeMap::from([
            ("alertname".to_string(), result.name().to_string()),
            ("cluster_uuid".to_string(), result.scope.cluster.clone()),
            ("severity".to_string(), result.status().as_str().to_string()),
        ]);
        if let Some(cluster) = cluster {
            labels.insert("cluster_name".to_string(), cluster.name.clone());
        }
        if let Some(node) = &result.scope.node {
            let name = cluster
                .and_then(|c| c.nodes.find(node))
                .map_or(node.as_str(), |n| n.hostname());
            labels.insert("node".to_string(), name.to_string());
        }
        if let Some(bucket) = &result.scope.bucket {
            labels.insert("bucket".to_string(), bucket.clone());
        }
        if let Some(file) = &result.scope.log_file {
            labels.insert("log_file".to_string(), file.clone());
        }

        let mut annotations = BTreeMap::new();
        if let Some(definition) = self.definitions.get(result.name()) {
            annotations.insert("title".to_string(), definition.title.clone());
        }
        if let Some(remediation) = &result.result.remediation {
            annotations.insert("remediation".to_string(), remediation.clone());
        }

        Alert {
            labels,
            annotations,
            starts_at: result.result.time.min(now),
            ends_at,
            generator_url: String::new(),
        }
    }
}

#[async_trait]
impl AlertSink for AlertGenerator {
    async fn manual_update(&self) -> Result<(), MonitorError> {
        if self.clients.is_empty() {
            return Ok(());
        }
        let alerts = self.alerts(Utc::now())?;

        let mut errors = Vec::new();
        for client in &self.clients {
            match client.post_alerts(&alerts).await {
                Ok(()) => debug!(endpoint = client.endpoint(), count = alerts.len(), "pushed alerts"),
                Err(e) => errors.push(e),
            }
        }
        match AdapterError::join(errors) {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for AlertGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertGenerator")
            .field("clients", &self.clients.len())
            .field("alert_ttl", &self.alert_ttl)
            .finish()
    }
}
