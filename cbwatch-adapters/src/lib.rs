//! # cbwatch-adapters
//!
//! HTTP adapters for the external systems cbwatch talks to.
//!
//! ## Supported Systems
//!
//! - **Couchbase Server** (`couchbase` feature) - Bootstraps against the
//!   management REST API, pings nodes, reads buckets, remote clusters and the
//!   auxiliary settings/index/log payloads checkers consume
//! - **Prometheus** (`prometheus` feature) - Lists active scrape targets for
//!   cluster discovery
//! - **Node agent** (`agent` feature) - Activates the per-node health agent and
//!   pulls its node-local checker results
//! - **Alertmanager** (`alertmanager` feature) - Pushes unresolved findings
//!
//! ## Quick Start (Couchbase)
//!
//! ```rust,no_run
//! use cbwatch_adapters::couchbase::CouchbaseClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = CouchbaseClient::builder()
//!         .credentials("Administrator", "password")
//!         .build()?;
//!
//!     let conn = client.connect("http://localhost:8091").await?;
//!     println!("Connected to cluster {}", conn.info().uuid);
//!     Ok(())
//! }
//! ```

pub mod error;

#[cfg(feature = "couchbase")]
pub mod couchbase;

#[cfg(feature = "prometheus")]
pub mod prometheus;

#[cfg(feature = "agent")]
pub mod agent;

#[cfg(feature = "alertmanager")]
pub mod alertmanager;

pub use error::AdapterError;
