//! # cbwatch
//!
//! Fleet monitor for Couchbase Server clusters.
//!
//! Every registered cluster gets its own [`ClusterOrchestrator`] that keeps
//! a liveness flag, the cached management REST data and the diagnostic
//! checker results fresh. All orchestrators share one bounded
//! [`CheckScheduler`], so a large fleet cannot starve the process.
//!
//! ## Architecture
//!
//! ```text
//!  Prometheus targets ──▶ DiscoveryDriver ──▶ Store ◀── Janitor
//!                                              ▲
//!                                              │ results, heart issues
//!  FleetManager ──▶ ClusterOrchestrator (one per cluster)
//!                     ├─ heartbeat loop
//!                     ├─ checker loop ──▶ CheckScheduler (shared workers)
//!                     └─ agent-port loop ──▶ AgentPortPool ──▶ node agents
//!                                              │
//!                     AlertSink ◀──────────────┴──▶ CheckerMetrics
//! ```
//!
//! Dismissals hide matching results at read time; see [`dismissal`].

pub mod agentport;
pub mod alerts;
pub mod checks;
pub mod client;
pub mod config;
pub mod discovery;
pub mod dismissal;
pub mod error;
pub mod fleet;
pub mod janitor;
pub(crate) mod lifecycle;
pub mod orchestrator;
pub mod report;
pub mod store;

#[cfg(test)]
mod testing;

pub use checks::{CheckScheduler, CheckerDefinitions, CheckerRegistry, ProgressTracker};
pub use error::{MonitorError, StoreError};
pub use fleet::FleetManager;
pub use orchestrator::{ClusterManager, ClusterOrchestrator, MonitorContext};
pub use store::{MemoryStore, Store};
