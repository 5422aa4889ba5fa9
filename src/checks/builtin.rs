//! Built-in checkers that run against the management REST data.
//!
//! Each checker only reads the snapshot it is given. Checkers that need
//! cached REST data return [`CheckError::MissingData`] when the fetch for that
//! endpoint failed, so one missing payload never affects other checkers.

use std::collections::BTreeSet;

use cbwatch_types::{
    CheckerResult, CheckerStatus, ClusterSnapshot, ResultScope, RestEndpoint,
    WrappedCheckerResult,
};
use serde_json::{json, Value};

use super::registry::CheckError;

type BuiltinFn = fn(&ClusterSnapshot) -> Result<Vec<WrappedCheckerResult>, CheckError>;

const MAX_BUCKETS: usize = 30;

/// Every built-in checker by name.
pub(crate) fn all() -> Vec<(&'static str, BuiltinFn)> {
    vec![
        ("singleOrTwoNodeCluster", single_or_two_node_cluster),
        ("mixedMode", mixed_mode),
        ("autoFailoverEnabled", auto_failover_enabled),
        ("maxBuckets", max_buckets),
        ("nodeSwapUsage", node_swap_usage),
        ("replicavBucketNumber", replica_vbucket_number),
        ("emptyGroup", empty_group),
    ]
}

fn cluster_result(cluster: &ClusterSnapshot, result: CheckerResult) -> WrappedCheckerResult {
    WrappedCheckerResult::new(result, ResultScope::cluster(&cluster.uuid))
}

fn cached<'a>(
    cluster: &'a ClusterSnapshot,
    endpoint: RestEndpoint,
) -> Result<&'a Value, CheckError> {
    cluster.cache.get(endpoint).ok_or_else(|| CheckError::MissingData {
        endpoint: endpoint.as_str(),
        reason: cluster
            .cache
            .errors
            .get(endpoint.as_str())
            .cloned()
            .unwrap_or_else(|| "not fetched".to_string()),
    })
}

fn single_or_two_node_cluster(
    cluster: &ClusterSnapshot,
) -> Result<Vec<WrappedCheckerResult>, CheckError> {
    let count = cluster.nodes.len();
    let mut result = CheckerResult::new("singleOrTwoNodeCluster", CheckerStatus::Good)
        .with_value(json!({ "nodes": count }));

    if count < 3 {
        result.status = CheckerStatus::Warn;
        result.remediation = Some(format!(
            "The cluster has {} node(s). Add nodes so there are at least three to allow safe failover.",
            count
        ));
    }

    Ok(vec![cluster_result(cluster, result)])
}

fn mixed_mode(cluster: &ClusterSnapshot) -> Result<Vec<WrappedCheckerResult>, CheckError> {
    let versions: BTreeSet<&str> = cluster.nodes.iter().map(|n| n.version.as_str()).collect();
    let mut result = CheckerResult::new("mixedMode", CheckerStatus::Good)
        .with_value(json!({ "versions": versions }));

    if versions.len() > 1 {
        result.status = CheckerStatus::Warn;
        result.remediation = Some(
            "Nodes run different versions. Finish the upgrade so every node runs the same version."
                .to_string(),
        );
    }

    Ok(vec![cluster_result(cluster, result)])
}

fn auto_failover_enabled(
    cluster: &ClusterSnapshot,
) -> Result<Vec<WrappedCheckerResult>, CheckError> {
    let settings = cached(cluster, RestEndpoint::AutoFailover)?;
    let enabled = settings
        .get("enabled")
        .and_then(Value::as_bool)
        .ok_or_else(|| CheckError::Failed("auto-failover settings have no 'enabled' field".into()))?;

    let mut result = CheckerResult::new("autoFailoverEnabled", CheckerStatus::Good)
        .with_value(json!({ "enabled": enabled }));
    if !enabled {
        result.status = CheckerStatus::Warn;
        result.remediation = Some("Enable auto-failover.".to_string());
    }

    Ok(vec![cluster_result(cluster, result)])
}

fn max_buckets(cluster: &ClusterSnapshot) -> Result<Vec<WrappedCheckerResult>, CheckError> {
    let count = cluster.buckets.len();
    let mut result = CheckerResult::new("maxBuckets", CheckerStatus::Good)
        .with_value(json!({ "num_buckets": count }));

    if count > MAX_BUCKETS {
        result.status = CheckerStatus::Info;
        result.remediation = Some(
            "Reduce the number of buckets as current number could cause performance degradation."
                .to_string(),
        );
    }

    Ok(vec![cluster_result(cluster, result)])
}

fn node_swap_usage(cluster: &ClusterSnapshot) -> Result<Vec<WrappedCheckerResult>, CheckError> {
    Ok(cluster
        .nodes
        .iter()
        .map(|node| {
            let used = if node.swap_total == 0 {
                0.0
            } else {
                node.swap_used as f64 / node.swap_total as f64 * 100.0
            };

            let mut result = CheckerResult::new("nodeSwapUsage", CheckerStatus::Good)
                .with_value(json!({ "swap_used_percent": used }));
            if used >= 90.0 {
                result.status = CheckerStatus::Alert;
            } else if used >= 50.0 {
                result.status = CheckerStatus::Warn;
            }
            if result.status != CheckerStatus::Good {
                result.remediation = Some(format!(
                    "Node is using {:.0}% of its swap. Add memory or reduce the memory quotas.",
                    used
                ));
            }

            WrappedCheckerResult::new(result, ResultScope::node(&cluster.uuid, &node.node_uuid))
        })
        .collect())
}

fn replica_vbucket_number(
    cluster: &ClusterSnapshot,
) -> Result<Vec<WrappedCheckerResult>, CheckError> {
    let data_nodes = cluster.nodes.with_service("kv").count();

    Ok(cluster
        .buckets
        .iter()
        .map(|bucket| {
            let replicas = bucket.num_replicas;
            let mut result = CheckerResult::new("replicavBucketNumber", CheckerStatus::Good);

            let recommended = match replicas {
                r if r >= 3 => Some(10),
                2 => Some(5),
                _ => None,
            };
            if let Some(min_nodes) = recommended.filter(|min| data_nodes < *min) {
                result.status = CheckerStatus::Info;
                result.remediation = Some(format!(
                    "{} data node(s) is not suitable for {} replicas. {} or more nodes recommended.",
                    data_nodes, replicas, min_nodes
                ));
            }

            WrappedCheckerResult::new(result, ResultScope::bucket(&cluster.uuid, &bucket.name))
        })
        .collect())
}

fn empty_group(cluster: &ClusterSnapshot) -> Result<Vec<WrappedCheckerResult>, CheckError> {
    let groups = cached(cluster, RestEndpoint::ServerGroups)?
        .get("groups")
        .and_then(Value::as_array)
        .ok_or_else(|| CheckError::Failed("server groups payload has no 'groups' array".into()))?;

    let empty: Vec<&str> = groups
        .iter()
        .filter(|g| {
            g.get("nodes")
                .and_then(Value::as_array)
                .map_or(true, |nodes| nodes.is_empty())
        })
        .filter_map(|g| g.get("name").and_then(Value::as_str))
        .collect();

    let mut result = CheckerResult::new("emptyGroup", CheckerStatus::Good)
        .with_value(json!({ "empty_groups": empty }));
    if !empty.is_empty() {
        result.status = CheckerStatus::Warn;
        result.remediation = Some(format!(
            "Server group(s) {} have no nodes. Add nodes or remove the groups.",
            empty.join(", ")
        ));
    }

    Ok(vec![cluster_result(cluster, result)])
}
