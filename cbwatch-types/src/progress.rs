//! Progress of a check batch for one cluster.

use chrono::{DateTime, Utc};

/// Lifecycle of a check batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RunStatus {
    #[default]
    Waiting,
    InProgress,
    Done,
}

/// Counters for the most recent check batch of a cluster.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClusterProgress {
    pub status: RunStatus,
    pub total_checkers: usize,
    pub done: usize,
    pub failed: usize,
    pub start: DateTime<Utc>,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub end: Option<DateTime<Utc>>,
}

impl ClusterProgress {
    /// A fresh batch that has not finished any checker yet.
    pub fn started(total_checkers: usize, start: DateTime<Utc>) -> Self {
        Self {
            status: RunStatus::InProgress,
            total_checkers,
            done: 0,
            failed: 0,
            start,
            end: None,
        }
    }

    /// Checkers that have finished, successfully or not.
    pub fn completed(&self) -> usize {
        self.done + self.failed
    }

    /// Fraction of the batch finished, in `0.0..=1.0`.
    pub fn fraction(&self) -> f64 {
        if self.total_checkers == 0 {
            return 1.0;
        }
        (self.completed() as f64 / self.total_checkers as f64).min(1.0)
    }
}
