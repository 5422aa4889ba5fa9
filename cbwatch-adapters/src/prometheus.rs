//! Prometheus targets API, used as a cluster discovery source.
//!
//! Prometheus already knows where every Couchbase node exporter lives, so
//! its active scrape targets double as a list of cluster nodes.
//!
//! ## Example
//!
//! ```rust,no_run
//! use cbwatch_adapters::prometheus::PrometheusTargets;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = PrometheusTargets::builder()
//!         .endpoint("http://prometheus:9090")
//!         .build()?;
//!
//!     for target in source.active_targets().await? {
//!         println!("{:?} {:?}", target.address(), target.labels.get("job"));
//!     }
//!     Ok(())
//! }
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use crate::error::status_error;
use crate::AdapterError;

/// One active scrape target.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub discovered_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub scrape_url: String,
    #[serde(default)]
    pub health: String,
}

impl Target {
    /// The `host:port` Prometheus discovered for this target.
    pub fn address(&self) -> Option<&str> {
        self.discovered_labels
            .get("__address__")
            .map(String::as_str)
            .filter(|a| !a.is_empty())
    }

    /// True if every `key=value` pair in `selector` is present in the labels.
    pub fn matches(&self, selector: &BTreeMap<String, String>) -> bool {
        selector
            .iter()
            .all(|(k, v)| self.labels.get(k).is_some_and(|actual| actual == v))
    }
}

/// Client for the Prometheus `/api/v1/targets` endpoint.
#[derive(Debug, Clone)]
pub struct PrometheusTargets {
    client: Client,
    endpoint: String,
    credentials: Option<(String, String)>,
}

impl PrometheusTargets {
    /// Create a new builder for configuring the client.
    pub fn builder() -> PrometheusTargetsBuilder {
        PrometheusTargetsBuilder::default()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Fetch all active targets.
    pub async fn active_targets(&self) -> Result<Vec<Target>, AdapterError> {
        let url = format!("{}/api/v1/targets?state=active", self.endpoint);

        let mut request = self.client.get(&url);
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, Some(password));
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            return Err(status_error(response.status(), &url));
        }

        let body: TargetsResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::Parse(e.to_string()))?;

        if body.status != "success" {
            return Err(AdapterError::Http(format!(
                "Prometheus returned status '{}'",
                body.status
            )));
        }

        Ok(body.data.active_targets)
    }
}

/// Builder for PrometheusTargets.
#[derive(Debug, Default)]
pub struct PrometheusTargetsBuilder {
    endpoint: Option<String>,
    credentials: Option<(String, String)>,
    timeout: Option<Duration>,
}

impl PrometheusTargetsBuilder {
    /// Set the Prometheus endpoint (e.g., "http://localhost:9090").
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set basic auth credentials, if Prometheus sits behind a proxy.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Set the request timeout (default: 10 seconds).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<PrometheusTargets, AdapterError> {
        let client = Client::builder()
            .timeout(self.timeout.unwrap_or(Duration::from_secs(10)))
            .build()?;

        Ok(PrometheusTargets {
            client,
            endpoint: self
                .endpoint
                .unwrap_or_else(|| "http://localhost:9090".to_string())
                .trim_end_matches('/')
                .to_string(),
            credentials: self.credentials,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TargetsResponse {
    status: String,
    #[serde(default)]
    data: TargetsData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetsData {
    #[serde(default)]
    active_targets: Vec<Target>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_defaults() {
        let source = PrometheusTargets::builder().build().unwrap();
        assert_eq!(source.endpoint, "http://localhost:9090");
        assert!(source.credentials.is_none());
    }

    #[test]
    fn test_builder_trims_trailing_slash() {
        let source = PrometheusTargets::builder()
            .endpoint("http://prom.local:9090/")
            .credentials("admin", "secret")
            .build()
            .unwrap();
        assert_eq!(source.endpoint, "http://prom.local:9090");
        assert_eq!(
            source.credentials,
            Some(("admin".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn test_parse_targets_response() {
        let raw = json!({
            "status": "success",
            "data": {
                "activeTargets": [{
                    "discoveredLabels": {"__address__": "10.0.0.1:8091", "job": "couchbase"},
                    "labels": {"job": "couchbase", "env": "prod"},
                    "scrapeUrl": "http://10.0.0.1:8091/metrics",
                    "health": "up"
                }],
                "droppedTargets": []
            }
        });

        let body: TargetsResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(body.data.active_targets.len(), 1);
        assert_eq!(body.data.active_targets[0].address(), Some("10.0.0.1:8091"));
    }

    #[test]
    fn test_selector_requires_every_label() {
        let target = Target {
            labels: [("job", "couchbase"), ("env", "prod")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        };

        let mut selector = BTreeMap::new();
        assert!(target.matches(&selector));

        selector.insert("job".to_string(), "couchbase".to_string());
        assert!(target.matches(&selector));

        selector.insert("env".to_string(), "dev".to_string());
        assert!(!target.matches(&selector));
    }

    #[test]
    fn test_missing_address() {
        assert_eq!(Target::default().address(), None);
    }
}
