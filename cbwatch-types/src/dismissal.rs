//! Dismissal rules that suppress checker results.

use core::fmt;

use chrono::{DateTime, Utc};

use crate::WrappedCheckerResult;

/// How broad a dismissal is.
///
/// Each level names the scope identifiers a rule must carry:
///
/// | Level | Identifiers |
/// |-------|-------------|
/// | `All` (0) | none |
/// | `Cluster` (1) | cluster |
/// | `Bucket` (2) | cluster, bucket |
/// | `Node` (3) | cluster, node |
/// | `File` (4) | cluster, node, log file |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DismissLevel {
    All = 0,
    Cluster = 1,
    Bucket = 2,
    Node = 3,
    File = 4,
}

impl DismissLevel {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for DismissLevel {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DismissLevel::All),
            1 => Ok(DismissLevel::Cluster),
            2 => Ok(DismissLevel::Bucket),
            3 => Ok(DismissLevel::Node),
            4 => Ok(DismissLevel::File),
            other => Err(other),
        }
    }
}

impl fmt::Display for DismissLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for DismissLevel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for DismissLevel {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = <u8 as serde::Deserialize>::deserialize(deserializer)?;
        DismissLevel::try_from(raw).map_err(|v| {
            serde::de::Error::custom(format!("invalid dismissal level {}, expected 0 to 4", v))
        })
    }
}

/// A user-authored suppression rule.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Dismissal {
    pub id: String,
    pub checker_name: String,
    pub level: DismissLevel,
    pub forever: bool,
    /// Expiry; meaningful only when `forever` is false.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub until: Option<DateTime<Utc>>,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub cluster_uuid: Option<String>,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub bucket_name: Option<String>,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub node_uuid: Option<String>,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub log_file: Option<String>,
}

impl Dismissal {
    /// True once a time-bounded rule has passed its expiry.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        if self.forever {
            return false;
        }
        match self.until {
            Some(until) => now > until,
            None => true,
        }
    }

    /// Whether this rule suppresses `result` at time `now`.
    pub fn is_dismissed(&self, result: &WrappedCheckerResult, now: DateTime<Utc>) -> bool {
        if self.checker_name != result.result.name || self.is_expired(now) {
            return false;
        }

        let scope = &result.scope;
        let same_cluster = self.cluster_uuid.as_deref() == Some(scope.cluster.as_str());
        let same = |rule: &Option<String>, value: &Option<String>| {
            rule.is_some() && rule.as_deref() == value.as_deref()
        };

        match self.level {
            DismissLevel::All => true,
            DismissLevel::Cluster => same_cluster,
            DismissLevel::Bucket => same_cluster && same(&self.bucket_name, &scope.bucket),
            DismissLevel::Node => same_cluster && same(&self.node_uuid, &scope.node),
            DismissLevel::File => {
                same_cluster
                    && same(&self.node_uuid, &scope.node)
                    && same(&self.log_file, &scope.log_file)
            }
        }
    }
}

/// Search parameters for stored dismissals. Unset fields match anything.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DismissalSearch {
    pub id: Option<String>,
    pub checker_name: Option<String>,
    pub level: Option<DismissLevel>,
    pub cluster_uuid: Option<String>,
    pub bucket_name: Option<String>,
    pub node_uuid: Option<String>,
    pub log_file: Option<String>,
}

impl DismissalSearch {
    pub fn for_cluster(uuid: impl Into<String>) -> Self {
        Self {
            cluster_uuid: Some(uuid.into()),
            ..Default::default()
        }
    }

    pub fn fleet_wide() -> Self {
        Self {
            level: Some(DismissLevel::All),
            ..Default::default()
        }
    }

    pub fn matches(&self, dismissal: &Dismissal) -> bool {
        fn eq(filter: &Option<String>, value: &Option<String>) -> bool {
            filter
                .as_deref()
                .map_or(true, |f| value.as_deref() == Some(f))
        }

        self.id.as_deref().map_or(true, |id| id == dismissal.id)
            && self
                .checker_name
                .as_deref()
                .map_or(true, |n| n == dismissal.checker_name)
            && self.level.map_or(true, |l| l == dismissal.level)
            && eq(&self.cluster_uuid, &dismissal.cluster_uuid)
            && eq(&self.bucket_name, &dismissal.bucket_name)
            && eq(&self.node_uuid, &dismissal.node_uuid)
            && eq(&self.log_file, &dismissal.log_file)
    }
}
