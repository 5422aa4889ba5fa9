//! Alertmanager v2 API client for pushing alerts.

use std::collections::BTreeMap;
use std::time::Duration;

use cbwatch_types::chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;

use crate::error::status_error;
use crate::AdapterError;

/// An alert in the Alertmanager `postableAlert` shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub starts_at: DateTime<Utc>,
    /// Alertmanager resolves the alert after this time unless it is pushed again.
    pub ends_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub generator_url: String,
}

/// Client for one Alertmanager instance.
#[derive(Debug, Clone)]
pub struct AlertmanagerClient {
    client: Client,
    endpoint: String,
}

impl AlertmanagerClient {
    /// Create a new builder for configuring the client.
    pub fn builder() -> AlertmanagerClientBuilder {
        AlertmanagerClientBuilder::default()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Push a batch of alerts. An empty batch is a no-op.
    pub async fn post_alerts(&self, alerts: &[Alert]) -> Result<(), AdapterError> {
        if alerts.is_empty() {
            return Ok(());
        }

        let url = format!("{}/api/v2/alerts", self.endpoint);
        let response = self.client.post(&url).json(alerts).send().await?;

        if !response.status().is_success() {
            return Err(status_error(response.status(), &url));
        }
        Ok(())
    }
}

/// Builder for AlertmanagerClient.
#[derive(Debug, Default)]
pub struct AlertmanagerClientBuilder {
    endpoint: Option<String>,
    timeout: Option<Duration>,
}

impl AlertmanagerClientBuilder {
    /// Set the Alertmanager endpoint (e.g., "http://localhost:9093").
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set the request timeout (default: 10 seconds).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<AlertmanagerClient, AdapterError> {
        let client = Client::builder()
            .timeout(self.timeout.unwrap_or(Duration::from_secs(10)))
            .build()?;

        Ok(AlertmanagerClient {
            client,
            endpoint: self
                .endpoint
                .unwrap_or_else(|| "http://localhost:9093".to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }
}
