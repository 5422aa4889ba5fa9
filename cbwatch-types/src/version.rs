//! Couchbase Server version parsing and comparison.

use core::cmp::Ordering;
use core::fmt;
use core::str::FromStr;

/// A Couchbase Server version such as `7.1.3-3479-enterprise`.
///
/// Only the numeric `major.minor.patch` triple and the optional build number
/// take part in ordering. The edition suffix is kept for display.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub build: Option<u32>,
    pub edition: Option<String>,
}

impl ServerVersion {
    /// Create a version from its numeric triple.
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            build: None,
            edition: None,
        }
    }

    /// True when `self` is the same release as `min` or newer.
    ///
    /// Build numbers are ignored unless both sides carry one.
    pub fn at_least(&self, min: &ServerVersion) -> bool {
        self.cmp(min) != Ordering::Less
    }
}

impl Ord for ServerVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (self.build, other.build) {
                (Some(a), Some(b)) => a.cmp(&b),
                _ => Ordering::Equal,
            })
    }
}

impl PartialOrd for ServerVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Error returned when a version string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseVersionError(pub String);

impl fmt::Display for ParseVersionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid server version '{}'", self.0)
    }
}

impl std::error::Error for ParseVersionError {}

impl FromStr for ServerVersion {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseVersionError(s.to_string());
        let mut parts = s.trim().splitn(3, '-');

        let release = parts.next().filter(|r| !r.is_empty()).ok_or_else(err)?;
        let mut numbers = release.split('.');
        let major = numbers
            .next()
            .and_then(|n| n.parse().ok())
            .ok_or_else(err)?;
        let minor = match numbers.next() {
            Some(n) => n.parse().map_err(|_| err())?,
            None => 0,
        };
        let patch = match numbers.next() {
            Some(n) => n.parse().map_err(|_| err())?,
            None => 0,
        };
        if numbers.next().is_some() {
            return Err(err());
        }

        let build = match parts.next() {
            Some(b) => Some(b.parse().map_err(|_| err())?),
            None => None,
        };
        let edition = parts.next().map(str::to_string);

        Ok(Self {
            major,
            minor,
            patch,
            build,
            edition,
        })
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(build) = self.build {
            write!(f, "-{}", build)?;
        }
        if let Some(edition) = &self.edition {
            write!(f, "-{}", edition)?;
        }
        Ok(())
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for ServerVersion {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for ServerVersion {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
