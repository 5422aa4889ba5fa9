//! Loop cadences.

use std::time::Duration;

/// How often each periodic task runs. Fixed for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FrequencyConfiguration {
    #[cfg_attr(feature = "serde", serde(with = "crate::humanized"))]
    pub heartbeat: Duration,
    #[cfg_attr(feature = "serde", serde(with = "crate::humanized"))]
    pub status: Duration,
    #[cfg_attr(feature = "serde", serde(with = "crate::humanized"))]
    pub agent_port_reconcile: Duration,
    #[cfg_attr(feature = "serde", serde(with = "crate::humanized"))]
    pub discovery: Duration,
    #[cfg_attr(feature = "serde", serde(with = "crate::humanized"))]
    pub janitor: Duration,
}

impl Default for FrequencyConfiguration {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(60),
            status: Duration::from_secs(5 * 60),
            agent_port_reconcile: Duration::from_secs(2 * 60),
            discovery: Duration::from_secs(60),
            janitor: Duration::from_secs(6 * 60 * 60),
        }
    }
}
