//! Cluster discovery from Prometheus scrape targets.
//!
//! [`DiscoveryReconciler`] makes the set of registered clusters match the
//! clusters reachable from the current targets. [`DiscoveryDriver`] runs it
//! on a timer and reports every attempt on a status channel.

mod driver;
mod reconciler;

pub use driver::{DiscoveryDriver, DiscoveryStatus};
pub use reconciler::{
    candidate_addresses, DiscoveryOutcome, DiscoveryReconciler, PrometheusTargetSource,
    TargetSource,
};
