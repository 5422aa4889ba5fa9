//! Layered configuration: defaults, then an optional file, then `CBWATCH_*`
//! environment variables.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cbwatch_adapters::agent::DEFAULT_AGENT_PORT;
use cbwatch_types::{humanized, FrequencyConfiguration};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub frequency: FrequencyConfiguration,
    /// Check batches run at the same time across the fleet.
    pub max_workers: usize,
    /// Log checker results older than this are removed by the janitor.
    #[serde(with = "humanized")]
    pub log_alert_max_age: Duration,
    pub agent: AgentConfig,
    pub cluster: ClusterClientConfig,
    /// Discovery is disabled when unset.
    pub prometheus: Option<PrometheusDiscoveryConfig>,
    pub alertmanager: AlertmanagerConfig,
    pub metrics: MetricsConfig,
    /// Snapshot file the store is loaded from and saved to.
    pub store_path: Option<PathBuf>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            frequency: FrequencyConfiguration::default(),
            max_workers: 10,
            log_alert_max_age: Duration::from_secs(3600),
            agent: AgentConfig::default(),
            cluster: ClusterClientConfig::default(),
            prometheus: None,
            alertmanager: AlertmanagerConfig::default(),
            metrics: MetricsConfig::default(),
            store_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub port: u16,
    /// Timeout for fetching results from one agent.
    #[serde(with = "humanized")]
    pub timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_AGENT_PORT,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterClientConfig {
    #[serde(with = "humanized")]
    pub timeout: Duration,
    pub accept_invalid_certs: bool,
}

impl Default for ClusterClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            accept_invalid_certs: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrometheusDiscoveryConfig {
    pub url: String,
    /// Only targets carrying all of these labels are considered.
    pub selector: BTreeMap<String, String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Credentials used for discovered clusters.
    pub cluster_user: String,
    pub cluster_password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertmanagerConfig {
    pub urls: Vec<String>,
    #[serde(with = "humanized")]
    pub alert_ttl: Duration,
}

impl Default for AlertmanagerConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            alert_ttl: Duration::from_secs(10 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub listen_addr: String,
    pub path: String,
    pub namespace: Option<String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:7196".to_string(),
            path: "/metrics".to_string(),
            namespace: None,
        }
    }
}

/// Load the configuration from `path` (format by extension) and the environment.
///
/// Environment variables use the `CBWATCH_` prefix and `__` between nested
/// keys, e.g. `CBWATCH_AGENT__PORT=9093`.
pub fn load(path: Option<&Path>) -> Result<MonitorConfig, ConfigError> {
    load_with(path, environment())
}

fn environment() -> Environment {
    Environment::with_prefix("CBWATCH")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

fn load_with(path: Option<&Path>, env: Environment) -> Result<MonitorConfig, ConfigError> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(File::from(path));
    }
    builder.add_source(env).build()?.try_deserialize()
}
