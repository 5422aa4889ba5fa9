//! # cbwatch-types
//!
//! Core data model for cbwatch. These types are shared by the adapters that
//! talk to Couchbase clusters and node agents, the metrics exporter, and the
//! monitoring engine itself.
//!
//! ## Features
//!
//! - `serde`: Serialization for every type, as used by the store snapshot,
//!   the node agent protocol and configuration files.
//!
//! ## Example
//!
//! ```rust
//! use cbwatch_types::{
//!     CheckerResult, CheckerStatus, ClusterSnapshot, DismissLevel, Dismissal, ResultScope,
//!     WrappedCheckerResult,
//! };
//!
//! let cluster = ClusterSnapshot::new("9d1bd2c5", "prod-eu");
//!
//! let finding = WrappedCheckerResult::new(
//!     CheckerResult::new("singleOrTwoNodeCluster", CheckerStatus::Warn),
//!     ResultScope::cluster(&cluster.uuid),
//! );
//!
//! let rule = Dismissal {
//!     id: "1".to_string(),
//!     checker_name: "singleOrTwoNodeCluster".to_string(),
//!     level: DismissLevel::Cluster,
//!     forever: true,
//!     until: None,
//!     cluster_uuid: Some(cluster.uuid.clone()),
//!     bucket_name: None,
//!     node_uuid: None,
//!     log_file: None,
//! };
//!
//! assert!(rule.is_dismissed(&finding, cbwatch_types::chrono::Utc::now()));
//! ```

mod checker;
mod cluster;
mod dismissal;
mod duration;
mod frequency;
mod progress;
mod version;

pub use checker::*;
pub use cluster::*;
pub use dismissal::*;
pub use duration::*;
pub use frequency::*;
pub use progress::*;
pub use version::*;

// Re-exported so downstream crates agree on the timestamp type.
pub use chrono;
