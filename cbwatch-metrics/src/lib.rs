//! # cbwatch-metrics
//!
//! Checker status metrics for a monitored Couchbase fleet.
//!
//! Every checker result becomes a gauge whose value is the status severity
//! (good 0, info 10, warn 20, alert 30, missing -1). Checkers that fail to run
//! bump an error counter. With the `prometheus` feature the registry is
//! served in the Prometheus text format.
//!
//! ## Quick Start
//!
//! ```rust
//! use cbwatch_metrics::CheckerMetrics;
//! use cbwatch_types::{CheckerResult, CheckerStatus, ResultScope, WrappedCheckerResult};
//!
//! let metrics = CheckerMetrics::new();
//! let cluster = metrics.cluster("9d1bd2c5", "prod-eu");
//!
//! let result = WrappedCheckerResult::new(
//!     CheckerResult::new("nodeSwapUsage", CheckerStatus::Alert),
//!     ResultScope::node("9d1bd2c5", "a1b2"),
//! );
//! cluster.record_result(&result, "CB90010", Some("10.0.0.1"));
//! ```

mod handle;
mod registry;
mod state;

#[cfg(feature = "prometheus")]
pub mod prometheus;

pub use handle::ClusterHandle;
pub use registry::CheckerMetrics;

#[cfg(feature = "prometheus")]
pub use prometheus::{PrometheusConfig, PrometheusExporter};
