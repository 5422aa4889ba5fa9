use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use cbwatch::alerts::{AlertGenerator, AlertSink, NoopAlertSink};
use cbwatch::client::{CouchbaseConnector, HttpAgentConnector};
use cbwatch::config::MonitorConfig;
use cbwatch::discovery::{DiscoveryDriver, DiscoveryReconciler, PrometheusTargetSource};
use cbwatch::janitor::Janitor;
use cbwatch::{
    CheckScheduler, CheckerDefinitions, CheckerRegistry, FleetManager, MemoryStore, MonitorContext,
};
use cbwatch_adapters::alertmanager::AlertmanagerClient;
use cbwatch_adapters::prometheus::PrometheusTargets;
use cbwatch_metrics::{CheckerMetrics, PrometheusConfig, PrometheusExporter};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "cbwatch")]
#[command(about = "Fleet monitor for Couchbase Server clusters")]
struct Args {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Address for the Prometheus metrics endpoint (e.g. "0.0.0.0:7196")
    #[arg(long)]
    metrics_addr: Option<String>,

    /// Check batches run at the same time across the fleet
    #[arg(long)]
    max_workers: Option<usize>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = cbwatch::config::load(args.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(addr) = args.metrics_addr {
        config.metrics.listen_addr = addr;
    }
    if let Some(workers) = args.max_workers {
        config.max_workers = workers;
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(config))
}

async fn run(config: MonitorConfig) -> Result<()> {
    let store = match &config.store_path {
        Some(path) if path.exists() => {
            info!(path = %path.display(), "loading store snapshot");
            Arc::new(MemoryStore::load_from(path)?)
        }
        _ => Arc::new(MemoryStore::new()),
    };

    let definitions = CheckerDefinitions::embedded()?;
    let metrics = CheckerMetrics::new();
    let scheduler = CheckScheduler::new(
        config.max_workers,
        CheckerRegistry::builtin(&definitions)?,
        metrics.clone(),
    )?;
    let connector = Arc::new(CouchbaseConnector::new(
        config.cluster.timeout,
        config.cluster.accept_invalid_certs,
    ));

    let alerts: Arc<dyn AlertSink> = if config.alertmanager.urls.is_empty() {
        Arc::new(NoopAlertSink)
    } else {
        let clients = config
            .alertmanager
            .urls
            .iter()
            .map(|url| {
                AlertmanagerClient::builder()
                    .endpoint(url)
                    .timeout(HTTP_TIMEOUT)
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()?;
        Arc::new(AlertGenerator::new(
            store.clone(),
            clients,
            definitions.clone(),
            config.alertmanager.alert_ttl,
        ))
    };

    let context = MonitorContext {
        store: store.clone(),
        connector: connector.clone(),
        agent_connector: Arc::new(HttpAgentConnector::new(
            config.agent.port,
            config.agent.timeout,
        )),
        scheduler: Arc::new(scheduler),
        alerts,
        metrics: metrics.clone(),
        definitions: definitions.clone(),
        frequency: config.frequency,
        agent_timeout: config.agent.timeout,
    };

    let janitor = Janitor::new(
        store.clone(),
        definitions,
        config.log_alert_max_age,
        config.frequency.janitor,
    );

    let discovery = match &config.prometheus {
        Some(prometheus) => {
            let mut targets = PrometheusTargets::builder()
                .endpoint(&prometheus.url)
                .timeout(HTTP_TIMEOUT);
            if let (Some(user), Some(password)) = (&prometheus.username, &prometheus.password) {
                targets = targets.credentials(user, password);
            }
            let reconciler = DiscoveryReconciler::new(
                Arc::new(PrometheusTargetSource(targets.build()?)),
                connector,
                store.clone(),
                prometheus.selector.clone(),
                &prometheus.cluster_user,
                &prometheus.cluster_password,
            );
            info!(url = %prometheus.url, "cluster discovery enabled");
            Some(DiscoveryDriver::new(reconciler, config.frequency.discovery))
        }
        None => None,
    };

    let mut metrics_config = PrometheusConfig::builder()
        .listen_addr(&config.metrics.listen_addr)
        .metrics_path(&config.metrics.path);
    if let Some(namespace) = &config.metrics.namespace {
        metrics_config = metrics_config.namespace(namespace);
    }
    let exporter = PrometheusExporter::new(metrics_config.build(), metrics);
    let server = exporter.start_server();

    let fleet = Arc::new(FleetManager::new(context, janitor, discovery));
    fleet.start().await?;
    info!(
        metrics = %config.metrics.listen_addr,
        workers = config.max_workers,
        "cbwatch running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    fleet.stop().await;
    server.abort();

    if let Some(path) = &config.store_path {
        store
            .save_to(path)
            .with_context(|| format!("failed to save store to {}", path.display()))?;
        info!(path = %path.display(), "store snapshot saved");
    }
    Ok(())
}
