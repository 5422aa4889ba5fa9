//! Error types for the monitoring engine.

use cbwatch_adapters::AdapterError;
use cbwatch_types::DismissLevel;
use thiserror::Error;

/// Errors returned by a [`Store`](crate::store::Store).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested record does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// A record with the same key is already stored.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// Reading or writing the snapshot file failed.
    #[error("store snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The snapshot file could not be encoded or decoded.
    #[error("store snapshot is invalid: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Errors returned by the check scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The worker pool has been stopped and accepts no more work.
    #[error("check scheduler is shutting down")]
    ShuttingDown,
}

/// Errors raised while loading the checker definitions table.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("checker definitions are invalid: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("checker '{0}' has no definition")]
    Missing(String),
}

/// Errors from the per-cluster orchestrator and the fleet supervisor.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// The cluster answered with a different UUID than the one it was added with.
    #[error("cluster UUID changed from '{expected}' to '{actual}'")]
    UuidMismatch { expected: String, actual: String },

    /// Background loops need a tokio runtime to be spawned on.
    #[error("no tokio runtime available to start background tasks")]
    NoRuntime,

    #[error("cluster '{0}' not found")]
    ClusterNotFound(String),

    /// No check batch has started for this cluster yet.
    #[error("no progress recorded for cluster '{0}'")]
    NoProgress(String),

    /// The scheduler dropped the job before producing a result.
    #[error("check run for cluster '{0}' ended without results")]
    RunAborted(String),

    /// Diagnostic runs are halted until the cluster is re-added.
    #[error("checks for cluster '{0}' are halted after a UUID mismatch")]
    Halted(String),
}

/// Rejections raised when a dismissal is created.
#[derive(Debug, Error)]
pub enum DismissalError {
    #[error("exactly one of forever or dismiss_for must be set")]
    ExpiryConflict,

    #[error("dismiss_for must be greater than zero")]
    ZeroDuration,

    #[error("dismiss_for is out of range")]
    DurationOutOfRange,

    #[error("invalid dismissal level {0}, expected 0 to 4")]
    InvalidLevel(u8),

    #[error("unknown checker '{0}'")]
    UnknownChecker(String),

    #[error("{field} is required for level {level}")]
    MissingField {
        field: &'static str,
        level: DismissLevel,
    },

    #[error("{field} is not allowed for level {level}")]
    UnexpectedField {
        field: &'static str,
        level: DismissLevel,
    },

    #[error("cluster '{0}' not found")]
    ClusterNotFound(String),

    #[error("bucket '{bucket}' not found in cluster '{cluster}'")]
    BucketNotFound { cluster: String, bucket: String },

    #[error("node '{node}' not found in cluster '{cluster}'")]
    NodeNotFound { cluster: String, node: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures collected from a fan-out where partial success is still useful.
#[derive(Debug, Error)]
#[error("{context}: {}", .errors.join("; "))]
pub struct MultiError {
    pub context: &'static str,
    pub errors: Vec<String>,
}

impl MultiError {
    pub fn new(context: &'static str) -> Self {
        Self {
            context,
            errors: Vec::new(),
        }
    }

    pub fn push(&mut self, error: impl ToString) {
        self.errors.push(error.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// `Ok(())` when nothing failed.
    pub fn into_result(self) -> Result<(), MultiError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}
