//! Human-readable durations such as `"90s"`, `"5m"` or `"1h30m"`.

use core::fmt;
use std::time::Duration;

/// Suffix to nanoseconds multiplier (longer suffixes first so "ms" wins over "m")
const UNITS: &[(&str, f64)] = &[
    ("ns", 1.0),
    ("µs", 1_000.0),
    ("us", 1_000.0),
    ("ms", 1_000_000.0),
    ("s", 1_000_000_000.0),
    ("m", 60_000_000_000.0),
    ("h", 3_600_000_000_000.0),
    ("d", 86_400_000_000_000.0),
];

/// Error returned by [`parse_duration`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseDurationError(pub String);

impl fmt::Display for ParseDurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown duration format: {}", self.0)
    }
}

impl std::error::Error for ParseDurationError {}

/// Parse duration strings like `"29.5s"`, `"500ms"`, `"6h"` or `"1h30m"`.
///
/// A bare `"0"` is accepted as zero.
pub fn parse_duration(s: &str) -> Result<Duration, ParseDurationError> {
    let input = s.trim();
    if input == "0" {
        return Ok(Duration::ZERO);
    }
    if input.is_empty() {
        return Err(ParseDurationError(s.to_string()));
    }

    let mut rest = input;
    let mut total_nanos = 0f64;

    while !rest.is_empty() {
        let number_len = rest
            .char_indices()
            .find(|(_, c)| !(c.is_ascii_digit() || *c == '.'))
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(ParseDurationError(s.to_string()));
        }
        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| ParseDurationError(s.to_string()))?;
        rest = &rest[number_len..];

        let (suffix, multiplier) = UNITS
            .iter()
            .find(|(suffix, _)| rest.starts_with(suffix))
            .ok_or_else(|| ParseDurationError(s.to_string()))?;
        total_nanos += value * multiplier;
        rest = &rest[suffix.len()..];
    }

    Ok(Duration::from_nanos(total_nanos as u64))
}

/// Format a duration using the largest whole units, e.g. `"1h30m"`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs == 0 {
        let millis = d.as_millis();
        return if millis == 0 {
            format!("{}ns", d.as_nanos())
        } else {
            format!("{}ms", millis)
        };
    }

    let mut out = String::new();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        out.push_str(&format!("{}h", hours));
    }
    if minutes > 0 {
        out.push_str(&format!("{}m", minutes));
    }
    if seconds > 0 {
        out.push_str(&format!("{}s", seconds));
    }
    out
}

/// Serde adapter for `Duration` fields written as human-readable strings.
///
/// ```rust,ignore
/// #[derive(serde::Deserialize)]
/// struct Settings {
///     #[serde(with = "cbwatch_types::humanized")]
///     heartbeat: std::time::Duration,
/// }
/// ```
#[cfg(feature = "serde")]
pub mod humanized {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_seconds() {
        let d = parse_duration("29.5s").unwrap();
        assert!((d.as_secs_f64() - 29.5).abs() < 0.0001);
    }

    #[test]
    fn test_parse_milliseconds() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn test_parse_minutes_and_hours() {
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("6h").unwrap(), Duration::from_secs(6 * 3600));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_parse_compound() {
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("2m10s").unwrap(), Duration::from_secs(130));
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("ten minutes").is_err());
        assert!(parse_duration("5w").is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(5400)), "1h30m");
        assert_eq!(format_duration(Duration::from_secs(60)), "1m");
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
    }
}
