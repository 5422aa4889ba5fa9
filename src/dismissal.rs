//! Dismissal filtering and validation.
//!
//! Filtering happens at read time: stored results are never modified, a
//! result is simply hidden while an unexpired rule covers it. Expired rules
//! are ignored here and purged later by the janitor.

use std::time::Duration;

use cbwatch_types::chrono::{self, DateTime, Utc};
use cbwatch_types::{DismissLevel, Dismissal, DismissalSearch, WrappedCheckerResult};
use tracing::info;
use uuid::Uuid;

use crate::checks::CheckerDefinitions;
use crate::error::{DismissalError, StoreError};
use crate::store::Store;

/// Split `results` into the ones no rule suppresses and a count of the rest.
pub fn filter(
    results: Vec<WrappedCheckerResult>,
    dismissals: &[Dismissal],
    now: DateTime<Utc>,
) -> (Vec<WrappedCheckerResult>, usize) {
    let before = results.len();
    let kept: Vec<WrappedCheckerResult> = results
        .into_iter()
        .filter(|r| !dismissals.iter().any(|d| d.is_dismissed(r, now)))
        .collect();
    let dismissed = before - kept.len();
    (kept, dismissed)
}

/// Rules that can apply to a cluster: its own plus every fleet-wide rule.
pub fn dismissals_for_cluster(store: &dyn Store, uuid: &str) -> Result<Vec<Dismissal>, StoreError> {
    let mut dismissals = store.get_dismissals(&DismissalSearch::for_cluster(uuid))?;
    dismissals.extend(store.get_dismissals(&DismissalSearch::fleet_wide())?);
    Ok(dismissals)
}

/// A request to create a dismissal.
///
/// `level` is the raw level number so out-of-range values can be rejected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DismissalRequest {
    pub checker_name: String,
    pub level: u8,
    pub forever: bool,
    pub dismiss_for: Option<Duration>,
    pub cluster_uuid: Option<String>,
    pub bucket_name: Option<String>,
    pub node_uuid: Option<String>,
    pub log_file: Option<String>,
}

impl DismissalRequest {
    /// Check the request on its own, without looking at the store.
    ///
    /// Returns the parsed level.
    pub fn validate(&self, definitions: &CheckerDefinitions) -> Result<DismissLevel, DismissalError> {
        match (self.forever, self.dismiss_for) {
            (true, None) => {}
            (false, Some(d)) if d.is_zero() => return Err(DismissalError::ZeroDuration),
            (false, Some(_)) => {}
            _ => return Err(DismissalError::ExpiryConflict),
        }

        let level =
            DismissLevel::try_from(self.level).map_err(DismissalError::InvalidLevel)?;

        if !definitions.contains(&self.checker_name) {
            return Err(DismissalError::UnknownChecker(self.checker_name.clone()));
        }

        let (cluster, bucket, node, file) = match level {
            DismissLevel::All => (false, false, false, false),
            DismissLevel::Cluster => (true, false, false, false),
            DismissLevel::Bucket => (true, true, false, false),
            DismissLevel::Node => (true, false, true, false),
            DismissLevel::File => (true, false, true, true),
        };
        check_field("cluster_uuid", &self.cluster_uuid, cluster, level)?;
        check_field("bucket_name", &self.bucket_name, bucket, level)?;
        check_field("node_uuid", &self.node_uuid, node, level)?;
        check_field("log_file", &self.log_file, file, level)?;

        Ok(level)
    }
}

fn check_field(
    field: &'static str,
    value: &Option<String>,
    required: bool,
    level: DismissLevel,
) -> Result<(), DismissalError> {
    let present = value.as_deref().is_some_and(|v| !v.is_empty());
    match (required, present) {
        (true, false) => Err(DismissalError::MissingField { field, level }),
        (false, true) => Err(DismissalError::UnexpectedField { field, level }),
        _ => Ok(()),
    }
}

/// Validate a request against the definitions and the store, then save it.
pub fn create_dismissal(
    store: &dyn Store,
    definitions: &CheckerDefinitions,
    request: DismissalRequest,
    now: DateTime<Utc>,
) -> Result<Dismissal, DismissalError> {
    let level = request.validate(definitions)?;

    if let Some(uuid) = &request.cluster_uuid {
        let cluster = match store.get_cluster(uuid) {
            Ok(cluster) => cluster,
            Err(e) if e.is_not_found() => {
                return Err(DismissalError::ClusterNotFound(uuid.clone()))
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(bucket) = &request.bucket_name {
            if cluster.bucket(bucket).is_none() {
                return Err(DismissalError::BucketNotFound {
                    cluster: uuid.clone(),
                    bucket: bucket.clone(),
                });
            }
        }
        if let Some(node) = &request.node_uuid {
            if cluster.nodes.find(node).is_none() {
                return Err(DismissalError::NodeNotFound {
                    cluster: uuid.clone(),
                    node: node.clone(),
                });
            }
        }
    }

    let until = match request.dismiss_for {
        Some(d) => Some(
            chrono::Duration::from_std(d)
                .ok()
                .and_then(|d| now.checked_add_signed(d))
                .ok_or(DismissalError::DurationOutOfRange)?,
        ),
        None => None,
    };

    let dismissal = Dismissal {
        id: Uuid::new_v4().to_string(),
        checker_name: request.checker_name,
        level,
        forever: request.forever,
        until,
        cluster_uuid: request.cluster_uuid,
        bucket_name: request.bucket_name,
        node_uuid: request.node_uuid,
        log_file: request.log_file,
    };
    store.add_dismissal(dismissal.clone())?;
    info!(
        id = %dismissal.id,
        checker = %dismissal.checker_name,
        level = %dismissal.level,
        "dismissal created"
    );
    Ok(dismissal)
}
