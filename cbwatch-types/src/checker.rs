//! Checker definitions and results.

use core::fmt;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::ServerVersion;

/// Outcome of a single checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum CheckerStatus {
    Good,
    Info,
    Warn,
    Alert,
    /// The checker could not run against this cluster (e.g. version too old).
    Missing,
}

impl CheckerStatus {
    /// Numeric severity used for gauges and sorting.
    pub fn as_int(self) -> i64 {
        match self {
            CheckerStatus::Good => 0,
            CheckerStatus::Info => 10,
            CheckerStatus::Warn => 20,
            CheckerStatus::Alert => 30,
            CheckerStatus::Missing => -1,
        }
    }

    /// True for statuses that should be pushed to the alert sink.
    pub fn is_actionable(self) -> bool {
        matches!(self, CheckerStatus::Warn | CheckerStatus::Alert)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CheckerStatus::Good => "good",
            CheckerStatus::Info => "info",
            CheckerStatus::Warn => "warn",
            CheckerStatus::Alert => "alert",
            CheckerStatus::Missing => "missing",
        }
    }
}

impl fmt::Display for CheckerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a checker gathers its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum CheckerType {
    #[default]
    Api,
    Log,
    System,
}

/// Static description of a checker.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CheckerDefinition {
    pub name: String,
    pub id: String,
    pub title: String,
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub checker_type: CheckerType,
    pub description: String,
    pub min_version: Option<ServerVersion>,
    pub max_version: Option<ServerVersion>,
}

/// The finding produced by a checker.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CheckerResult {
    pub name: String,
    pub status: CheckerStatus,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub remediation: Option<String>,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub value: Option<Value>,
    pub time: DateTime<Utc>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub version: u32,
}

impl CheckerResult {
    /// A result stamped with the current time.
    pub fn new(name: impl Into<String>, status: CheckerStatus) -> Self {
        Self {
            name: name.into(),
            status,
            remediation: None,
            value: None,
            time: Utc::now(),
            version: 1,
        }
    }

    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = Some(remediation.into());
        self
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }
}

/// The scope a result applies to.
///
/// An empty `node`, `bucket` and `log_file` means the result is cluster wide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ResultScope {
    pub cluster: String,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub node: Option<String>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub bucket: Option<String>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub log_file: Option<String>,
}

impl ResultScope {
    pub fn cluster(uuid: impl Into<String>) -> Self {
        Self {
            cluster: uuid.into(),
            ..Default::default()
        }
    }

    pub fn node(cluster: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            node: Some(node.into()),
            ..Default::default()
        }
    }

    pub fn bucket(cluster: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            bucket: Some(bucket.into()),
            ..Default::default()
        }
    }

    pub fn log_file(
        cluster: impl Into<String>,
        node: impl Into<String>,
        log_file: impl Into<String>,
    ) -> Self {
        Self {
            cluster: cluster.into(),
            node: Some(node.into()),
            log_file: Some(log_file.into()),
            ..Default::default()
        }
    }
}

/// A checker result together with the scope it applies to.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WrappedCheckerResult {
    pub result: CheckerResult,
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub scope: ResultScope,
    /// Set by node agents when their checker failed to run.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub error: Option<String>,
}

impl WrappedCheckerResult {
    pub fn new(result: CheckerResult, scope: ResultScope) -> Self {
        Self {
            result,
            scope,
            error: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.result.name
    }

    pub fn status(&self) -> CheckerStatus {
        self.result.status
    }

    /// Identity of the result slot this value occupies in storage.
    pub fn key(&self) -> (String, ResultScope) {
        (self.result.name.clone(), self.scope.clone())
    }
}

/// Search parameters for stored checker results. Unset fields match anything.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CheckerSearch {
    pub name: Option<String>,
    pub cluster: Option<String>,
    pub node: Option<String>,
    pub bucket: Option<String>,
    pub log_file: Option<String>,
    /// Only results produced strictly before this time.
    pub older_than: Option<DateTime<Utc>>,
}

impl CheckerSearch {
    pub fn for_cluster(uuid: impl Into<String>) -> Self {
        Self {
            cluster: Some(uuid.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, result: &WrappedCheckerResult) -> bool {
        fn eq(filter: &Option<String>, value: &str) -> bool {
            filter.as_deref().map_or(true, |f| f == value)
        }
        fn eq_opt(filter: &Option<String>, value: &Option<String>) -> bool {
            filter
                .as_deref()
                .map_or(true, |f| value.as_deref() == Some(f))
        }

        eq(&self.name, &result.result.name)
            && eq(&self.cluster, &result.scope.cluster)
            && eq_opt(&self.node, &result.scope.node)
            && eq_opt(&self.bucket, &result.scope.bucket)
            && eq_opt(&self.log_file, &result.scope.log_file)
            && self.older_than.map_or(true, |t| result.result.time < t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_values_order_by_severity() {
        assert!(CheckerStatus::Alert.as_int() > CheckerStatus::Warn.as_int());
        assert!(CheckerStatus::Warn.as_int() > CheckerStatus::Info.as_int());
        assert!(CheckerStatus::Info.as_int() > CheckerStatus::Good.as_int());
        assert_eq!(CheckerStatus::Missing.as_int(), -1);
    }

    #[test]
    fn search_matches_on_set_fields_only() {
        let result = WrappedCheckerResult::new(
            CheckerResult::new("nodeSwapUsage", CheckerStatus::Warn),
            ResultScope::node("c1", "n1"),
        );

        assert!(CheckerSearch::default().matches(&result));
        assert!(CheckerSearch::for_cluster("c1").matches(&result));
        assert!(!CheckerSearch::for_cluster("c2").matches(&result));

        let by_bucket = CheckerSearch {
            bucket: Some("travel".to_string()),
            ..Default::default()
        };
        assert!(!by_bucket.matches(&result));

        let by_node = CheckerSearch {
            node: Some("n1".to_string()),
            name: Some("nodeSwapUsage".to_string()),
            ..Default::default()
        };
        assert!(by_node.matches(&result));
    }

    #[test]
    fn search_older_than_is_exclusive() {
        let result = WrappedCheckerResult::new(
            CheckerResult::new("logErrors", CheckerStatus::Alert),
            ResultScope::cluster("c1"),
        );
        let at = result.result.time;

        let search = CheckerSearch {
            older_than: Some(at),
            ..Default::default()
        };
        assert!(!search.matches(&result));

        let search = CheckerSearch {
            older_than: Some(at + chrono::Duration::seconds(1)),
            ..Default::default()
        };
        assert!(search.matches(&result));
    }
}
