//! HTTP client for the per-node health agent.
//!
//! Every node may run an agent that executes node-local checkers (log
//! scanning, OS settings) and exposes their latest results. Before it serves
//! results the agent has to be activated with the cluster's credentials.
//!
//! ## Example
//!
//! ```rust,no_run
//! use cbwatch_adapters::agent::AgentClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let agent = AgentClient::builder()
//!         .host("10.0.0.1")
//!         .credentials("Administrator", "password")
//!         .build()?;
//!
//!     agent.wait_until_ready().await?;
//!     for (name, result) in agent.checker_results().await? {
//!         println!("{}: {}", name, result.result.status);
//!     }
//!     Ok(())
//! }
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};

use cbwatch_types::WrappedCheckerResult;

use crate::error::status_error;
use crate::AdapterError;

/// Port the agent listens on unless configured otherwise.
pub const DEFAULT_AGENT_PORT: u16 = 9092;

/// Response header an agent sets to `false` when it lost its activation.
pub const AGENT_ACTIVE_HEADER: &str = "x-agent-active";

const PING_PATH: &str = "/agent/api/v1/ping";
const ACTIVATE_PATH: &str = "/agent/api/v1/activate";
const CHECKERS_PATH: &str = "/api/v1/checkers";

/// Activation state reported by the ping endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    /// Activated and running checkers.
    Ready,
    /// Running but waiting for credentials.
    Waiting,
}

/// Client for one node's agent.
#[derive(Debug, Clone)]
pub struct AgentClient {
    client: Client,
    base_url: String,
    username: String,
    password: String,
    ping_timeout: Duration,
    activate_timeout: Duration,
    max_retries: u32,
}

impl AgentClient {
    /// Create a new builder for configuring the client.
    pub fn builder() -> AgentClientBuilder {
        AgentClientBuilder::default()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Ask the agent for its activation state.
    pub async fn ping(&self) -> Result<AgentState, AdapterError> {
        let response = self
            .client
            .get(self.url(PING_PATH))
            .timeout(self.ping_timeout)
            .send()
            .await?;
        let body: PingResponse = Self::decode(response, PING_PATH).await?;
        Ok(body.state)
    }

    /// Hand the agent the cluster credentials.
    pub async fn activate(&self) -> Result<(), AdapterError> {
        let payload = ActivateRequest {
            username: &self.username,
            password: &self.password,
        };
        let response = self
            .client
            .post(self.url(ACTIVATE_PATH))
            .json(&payload)
            .timeout(self.activate_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response.status(), ACTIVATE_PATH));
        }
        Ok(())
    }

    /// Ping until the agent answers, activating it if it is waiting.
    ///
    /// A refused connection is returned immediately: it means no agent is
    /// installed on the node, and retrying will not change that.
    pub async fn wait_until_ready(&self) -> Result<(), AdapterError> {
        let mut last_error = None;

        for _ in 0..self.max_retries.max(1) {
            match self.ping().await {
                Ok(AgentState::Ready) => return Ok(()),
                Ok(AgentState::Waiting) => match self.activate().await {
                    Ok(()) => return Ok(()),
                    Err(e) if e.is_auth() => return Err(e),
                    Err(e) => last_error = Some(e),
                },
                Err(e) if e.is_connection_refused() => return Err(e),
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or(AdapterError::Timeout))
    }

    /// Latest node-local checker results keyed by checker name.
    ///
    /// If the agent reports that it has been deactivated, it is activated
    /// again and the request retried once.
    pub async fn checker_results(
        &self,
    ) -> Result<BTreeMap<String, WrappedCheckerResult>, AdapterError> {
        let response = self.get(CHECKERS_PATH).send().await?;

        if !response.status().is_success() && Self::is_inactive(&response) {
            self.activate().await?;
            let retry = self.get(CHECKERS_PATH).send().await?;
            return Self::decode(retry, CHECKERS_PATH).await;
        }

        Self::decode(response, CHECKERS_PATH).await
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client.get(self.url(path))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn is_inactive(response: &Response) -> bool {
        response
            .headers()
            .get(AGENT_ACTIVE_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("false"))
    }

    async fn decode<T: for<'de> Deserialize<'de>>(
        response: Response,
        what: &str,
    ) -> Result<T, AdapterError> {
        if !response.status().is_success() {
            return Err(status_error(response.status(), what));
        }
        response
            .json()
            .await
            .map_err(|e| AdapterError::Parse(format!("{}: {}", what, e)))
    }
}

/// Builder for AgentClient.
#[derive(Debug, Default)]
pub struct AgentClientBuilder {
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    timeout: Option<Duration>,
    ping_timeout: Option<Duration>,
    activate_timeout: Option<Duration>,
    max_retries: Option<u32>,
}

impl AgentClientBuilder {
    /// Set the node hostname (no scheme, no port).
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the agent port (default: 9092).
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the credentials used to activate the agent.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set the default request timeout (default: 60 seconds).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the ping timeout (default: 5 seconds).
    pub fn ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = Some(timeout);
        self
    }

    /// Set the activation timeout (default: 30 seconds).
    pub fn activate_timeout(mut self, timeout: Duration) -> Self {
        self.activate_timeout = Some(timeout);
        self
    }

    /// Set how many pings are attempted before giving up (default: 3).
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<AgentClient, AdapterError> {
        let client = Client::builder()
            .timeout(self.timeout.unwrap_or(Duration::from_secs(60)))
            .user_agent(concat!("cbwatch/", env!("CARGO_PKG_VERSION"), " agent-port"))
            .build()?;

        let host = self.host.unwrap_or_else(|| "localhost".to_string());
        let host = if host.contains(':') && !host.starts_with('[') {
            format!("[{}]", host)
        } else {
            host
        };

        Ok(AgentClient {
            client,
            base_url: format!("http://{}:{}", host, self.port.unwrap_or(DEFAULT_AGENT_PORT)),
            username: self.username.unwrap_or_default(),
            password: self.password.unwrap_or_default(),
            ping_timeout: self.ping_timeout.unwrap_or(Duration::from_secs(5)),
            activate_timeout: self.activate_timeout.unwrap_or(Duration::from_secs(30)),
            max_retries: self.max_retries.unwrap_or(3),
        })
    }
}

#[derive(Debug, Deserialize)]
struct PingResponse {
    state: AgentState,
}

#[derive(Debug, Serialize)]
struct ActivateRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbwatch_types::CheckerStatus;
    use serde_json::json;

    #[test]
    fn test_builder_defaults() {
        let agent = AgentClient::builder().build().unwrap();
        assert_eq!(agent.base_url, "http://localhost:9092");
        assert_eq!(agent.ping_timeout, Duration::from_secs(5));
        assert_eq!(agent.activate_timeout, Duration::from_secs(30));
        assert_eq!(agent.max_retries, 3);
    }

    #[test]
    fn test_builder_custom() {
        let agent = AgentClient::builder()
            .host("fd00::5")
            .port(19092)
            .credentials("Administrator", "pw")
            .max_retries(1)
            .build()
            .unwrap();
        assert_eq!(agent.base_url, "http://[fd00::5]:19092");
        assert_eq!(agent.username, "Administrator");
        assert_eq!(agent.max_retries, 1);
    }

    #[test]
    fn test_parse_ping_states() {
        let ready: PingResponse = serde_json::from_value(json!({"state": "ready"})).unwrap();
        assert_eq!(ready.state, AgentState::Ready);
        let waiting: PingResponse = serde_json::from_value(json!({"state": "waiting"})).unwrap();
        assert_eq!(waiting.state, AgentState::Waiting);
    }

    #[test]
    fn test_parse_checker_results() {
        let raw = json!({
            "memcachedLogErrors": {
                "result": {
                    "name": "memcachedLogErrors",
                    "status": "alert",
                    "remediation": "Inspect memcached.log",
                    "time": "2024-03-01T10:00:00Z",
                    "version": 1
                },
                "cluster": "c1",
                "node": "n1",
                "log_file": "memcached.log"
            }
        });

        let results: BTreeMap<String, WrappedCheckerResult> = serde_json::from_value(raw).unwrap();
        let result = &results["memcachedLogErrors"];
        assert_eq!(result.result.status, CheckerStatus::Alert);
        assert_eq!(result.scope.node.as_deref(), Some("n1"));
        assert_eq!(result.scope.log_file.as_deref(), Some("memcached.log"));
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_no_agent_is_connection_refused() {
        let agent = AgentClient::builder()
            .host("127.0.0.1")
            .port(1)
            .build()
            .unwrap();
        let err = agent.wait_until_ready().await.unwrap_err();
        assert!(err.is_connection_refused());
    }
}
