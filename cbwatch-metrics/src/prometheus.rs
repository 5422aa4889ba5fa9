//! Prometheus exposition format support.
//!
//! This module renders checker metrics in the Prometheus text-based
//! exposition format and serves them over HTTP so the fleet's health can be
//! scraped and alerted on like any other target.
//!
//! ## Example
//!
//! ```rust,no_run
//! use cbwatch_metrics::CheckerMetrics;
//! use cbwatch_metrics::prometheus::{PrometheusConfig, PrometheusExporter};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = PrometheusConfig::builder()
//!         .listen_addr("0.0.0.0:7196")
//!         .metrics_path("/metrics")
//!         .build();
//!
//!     let metrics = CheckerMetrics::new();
//!     let exporter = PrometheusExporter::new(config, metrics.clone());
//!     let server = exporter.start_server();
//!
//!     // Metrics available at http://localhost:7196/metrics
//!     server.await.ok();
//! }
//! ```

use std::convert::Infallible;
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::state::{Labels, MetricsState};
use crate::CheckerMetrics;

/// Configuration for Prometheus metrics endpoint.
#[derive(Debug, Clone)]
pub struct PrometheusConfig {
    /// Address to listen on (e.g., "0.0.0.0:7196")
    pub listen_addr: String,
    /// Path for metrics endpoint (e.g., "/metrics")
    pub metrics_path: String,
    /// Optional namespace prefix for all metrics
    pub namespace: Option<String>,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:7196".to_string(),
            metrics_path: "/metrics".to_string(),
            namespace: None,
        }
    }
}

impl PrometheusConfig {
    /// Create a new builder for PrometheusConfig.
    pub fn builder() -> PrometheusConfigBuilder {
        PrometheusConfigBuilder::default()
    }
}

/// Builder for PrometheusConfig.
#[derive(Debug, Default)]
pub struct PrometheusConfigBuilder {
    listen_addr: Option<String>,
    metrics_path: Option<String>,
    namespace: Option<String>,
}

impl PrometheusConfigBuilder {
    /// Set the listen address.
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = Some(addr.into());
        self
    }

    /// Set the metrics path.
    pub fn metrics_path(mut self, path: impl Into<String>) -> Self {
        self.metrics_path = Some(path.into());
        self
    }

    /// Set the namespace prefix for all metrics.
    pub fn namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = Some(ns.into());
        self
    }

    /// Build the PrometheusConfig.
    pub fn build(self) -> PrometheusConfig {
        let defaults = PrometheusConfig::default();
        PrometheusConfig {
            listen_addr: self.listen_addr.unwrap_or(defaults.listen_addr),
            metrics_path: self.metrics_path.unwrap_or(defaults.metrics_path),
            namespace: self.namespace,
        }
    }
}

/// Prometheus exporter that serves checker metrics over HTTP.
#[derive(Debug, Clone)]
pub struct PrometheusExporter {
    config: PrometheusConfig,
    metrics: CheckerMetrics,
}

impl PrometheusExporter {
    /// Create a new Prometheus exporter over a metrics registry.
    pub fn new(config: PrometheusConfig, metrics: CheckerMetrics) -> Self {
        Self { config, metrics }
    }

    /// Get the configuration.
    pub fn config(&self) -> &PrometheusConfig {
        &self.config
    }

    /// Get the current metrics in Prometheus exposition format.
    pub fn render(&self) -> String {
        format_prometheus(&self.metrics.state, self.config.namespace.as_deref())
    }

    /// Start the HTTP server to serve Prometheus metrics.
    ///
    /// This spawns a background task that listens for HTTP requests and serves
    /// metrics at the configured path. The server runs until the runtime shuts
    /// down or the returned handle is aborted.
    pub fn start_server(&self) -> tokio::task::JoinHandle<()> {
        let config = self.config.clone();
        let state = self.metrics.state.clone();

        tokio::spawn(async move {
            if let Err(e) = run_server(config, state).await {
                error!(error = %e, "Prometheus server error");
            }
        })
    }
}

async fn run_server(
    config: PrometheusConfig,
    state: Arc<MetricsState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr: SocketAddr = config.listen_addr.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, path = %config.metrics_path, "serving Prometheus metrics");

    let config = Arc::new(config);
    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        let config = config.clone();
        let state = state.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let config = config.clone();
                let state = state.clone();

                async move { handle_request(req, &config, &state) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!(error = %e, "Prometheus connection error");
            }
        });
    }
}

fn handle_request(
    req: Request<hyper::body::Incoming>,
    config: &PrometheusConfig,
    state: &MetricsState,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path();

    let response = if path == config.metrics_path {
        text_response(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            format_prometheus(state, config.namespace.as_deref()),
        )
    } else if path == "/health" || path == "/healthz" {
        text_response(StatusCode::OK, "text/plain", "OK".to_string())
    } else {
        text_response(StatusCode::NOT_FOUND, "text/plain", "Not Found".to_string())
    };

    Ok(response)
}

fn text_response(
    status: StatusCode,
    content_type: &'static str,
    body: String,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// Render every metric family in Prometheus exposition format.
pub(crate) fn format_prometheus(state: &MetricsState, namespace: Option<&str>) -> String {
    let mut output = String::new();
    let prefix = namespace.map(|n| format!("{}_", n)).unwrap_or_default();

    let gauges = [
        (
            "multimanager_cluster_checker_status",
            "Status of a cluster-wide checker (good 0, info 10, warn 20, alert 30, missing -1)",
            &state.cluster_status,
        ),
        (
            "multimanager_node_checker_status",
            "Status of a node-level checker",
            &state.node_status,
        ),
        (
            "multimanager_bucket_checker_status",
            "Status of a bucket-level checker",
            &state.bucket_status,
        ),
    ];

    for (name, help, family) in gauges {
        write_header(&mut output, &prefix, name, help, "gauge");
        for (labels, value) in family.collect() {
            let _ = writeln!(output, "{}{}{{{}}} {}", prefix, name, format_labels(&labels), value);
        }
    }

    let name = "multimanager_checker_errored";
    write_header(
        &mut output,
        &prefix,
        name,
        "Number of times a checker returned an error",
        "counter",
    );
    for (labels, value) in state.checker_errored.collect() {
        let _ = writeln!(output, "{}{}{{{}}} {}", prefix, name, format_labels(&labels), value);
    }

    output
}

fn write_header(output: &mut String, prefix: &str, name: &str, help: &str, kind: &str) {
    let _ = writeln!(output, "# HELP {}{} {}", prefix, name, help);
    let _ = writeln!(output, "# TYPE {}{} {}", prefix, name, kind);
}

fn format_labels(labels: &Labels) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect::<Vec<_>>()
        .join(",")
}

/// Escape a label value for Prometheus format.
/// Backslash, double-quote, and newline must be escaped.
fn escape_label_value(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbwatch_types::{CheckerResult, CheckerStatus, ResultScope, WrappedCheckerResult};

    fn create_test_metrics() -> CheckerMetrics {
        let metrics = CheckerMetrics::new();
        let handle = metrics.cluster("c1", "prod-eu");

        handle.record_result(
            &WrappedCheckerResult::new(
                CheckerResult::new("singleOrTwoNodeCluster", CheckerStatus::Warn),
                ResultScope::cluster("c1"),
            ),
            "CB90001",
            None,
        );
        handle.record_result(
            &WrappedCheckerResult::new(
                CheckerResult::new("nodeSwapUsage", CheckerStatus::Missing),
                ResultScope::node("c1", "n1"),
            ),
            "CB90010",
            Some("10.0.0.1"),
        );
        handle.record_error("mixedMode");
        metrics
    }

    #[test]
    fn test_format_prometheus_basic() {
        let metrics = create_test_metrics();
        let output = format_prometheus(&metrics.state, None);

        assert!(output.contains(
            "multimanager_cluster_checker_status{cluster_uuid=\"c1\",cluster_name=\"prod-eu\",name=\"singleOrTwoNodeCluster\",id=\"CB90001\"} 20"
        ));
        assert!(output.contains("node_uuid=\"n1\",node_name=\"10.0.0.1\"} -1"));
        assert!(output.contains(
            "multimanager_checker_errored{name=\"mixedMode\",cluster=\"c1\"} 1"
        ));
    }

    #[test]
    fn test_format_prometheus_with_namespace() {
        let metrics = create_test_metrics();
        let output = format_prometheus(&metrics.state, Some("cbwatch"));

        assert!(output.contains("cbwatch_multimanager_cluster_checker_status{"));
        assert!(output.contains("# HELP cbwatch_multimanager_checker_errored"));
    }

    #[test]
    fn test_format_includes_help_and_type() {
        let output = format_prometheus(&MetricsState::default(), None);

        assert!(output.contains("# TYPE multimanager_cluster_checker_status gauge"));
        assert!(output.contains("# TYPE multimanager_node_checker_status gauge"));
        assert!(output.contains("# TYPE multimanager_bucket_checker_status gauge"));
        assert!(output.contains("# TYPE multimanager_checker_errored counter"));
    }

    #[test]
    fn test_escape_label_value() {
        assert_eq!(escape_label_value("simple"), "simple");
        assert_eq!(escape_label_value("with\"quote"), "with\\\"quote");
        assert_eq!(escape_label_value("with\\backslash"), "with\\\\backslash");
        assert_eq!(escape_label_value("with\nnewline"), "with\\nnewline");
    }

    #[test]
    fn test_prometheus_config_builder() {
        let config = PrometheusConfig::builder()
            .listen_addr("127.0.0.1:8080")
            .metrics_path("/custom-metrics")
            .namespace("cbwatch")
            .build();

        assert_eq!(config.listen_addr, "127.0.0.1:8080");
        assert_eq!(config.metrics_path, "/custom-metrics");
        assert_eq!(config.namespace, Some("cbwatch".to_string()));
    }

    #[test]
    fn test_exporter_render_tracks_registry() {
        let metrics = CheckerMetrics::new();
        let exporter = PrometheusExporter::new(PrometheusConfig::default(), metrics.clone());
        assert!(!exporter.render().contains("cluster_uuid="));

        metrics.cluster("c9", "dev").record_error("x");
        assert!(exporter.render().contains("cluster=\"c9\""));
    }
}
