//! Bounded worker pool that runs the checker registry against clusters.
//!
//! The pool has a fixed number of workers shared by every cluster in the
//! fleet. Each worker owns a bounded queue and jobs are routed by cluster
//! UUID, so batches for one cluster run one after another in submission
//! order while different clusters run in parallel.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use cbwatch_metrics::CheckerMetrics;
use cbwatch_types::{
    CheckerResult, CheckerStatus, ClusterSnapshot, ResultScope, WrappedCheckerResult,
};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::checks::progress::{ProgressTracker, RunGuard};
use crate::checks::registry::{Checker, CheckerRegistry};
use crate::error::{MonitorError, SchedulerError};

/// Jobs each worker buffers before `check_cluster` waits.
const QUEUE_DEPTH: usize = 16;

struct Job {
    cluster: ClusterSnapshot,
    reply: oneshot::Sender<Vec<WrappedCheckerResult>>,
}

/// Shared state used by every worker.
struct WorkerContext {
    registry: CheckerRegistry,
    progress: Arc<ProgressTracker>,
    metrics: CheckerMetrics,
}

/// Runs check batches with bounded fleet-wide concurrency.
pub struct CheckScheduler {
    queues: RwLock<Option<Vec<mpsc::Sender<Job>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    progress: Arc<ProgressTracker>,
}

impl CheckScheduler {
    /// Start `workers` workers on the current tokio runtime.
    pub fn new(
        workers: usize,
        registry: CheckerRegistry,
        metrics: CheckerMetrics,
    ) -> Result<Self, MonitorError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| MonitorError::NoRuntime)?;
        let progress = Arc::new(ProgressTracker::new());
        let context = Arc::new(WorkerContext {
            registry,
            progress: progress.clone(),
            metrics,
        });

        let mut queues = Vec::with_capacity(workers.max(1));
        let mut handles = Vec::with_capacity(workers.max(1));
        for id in 0..workers.max(1) {
            let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
            queues.push(tx);
            handles.push(runtime.spawn(run_worker(id, rx, context.clone())));
        }

        Ok(Self {
            queues: RwLock::new(Some(queues)),
            workers: Mutex::new(handles),
            progress,
        })
    }

    /// Queue a batch for `cluster`.
    ///
    /// Waits while the worker's queue is full. The returned receiver yields
    /// exactly one batch once the job has run.
    pub async fn check_cluster(
        &self,
        cluster: ClusterSnapshot,
    ) -> Result<oneshot::Receiver<Vec<WrappedCheckerResult>>, SchedulerError> {
        let queue = {
            let queues = self.queues.read();
            let queues = queues.as_ref().ok_or(SchedulerError::ShuttingDown)?;
            queues[route(&cluster.uuid, queues.len())].clone()
        };

        let (reply, rx) = oneshot::channel();
        queue
            .send(Job { cluster, reply })
            .await
            .map_err(|_| SchedulerError::ShuttingDown)?;
        Ok(rx)
    }

    /// The progress tracker updated by this scheduler.
    pub fn progress(&self) -> &Arc<ProgressTracker> {
        &self.progress
    }

    /// Stop accepting jobs, let queued jobs finish and wait for the workers.
    pub async fn stop(&self) {
        self.queues.write().take();
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "check worker ended abnormally");
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.queues.read().is_none()
    }
}

impl std::fmt::Debug for CheckScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckScheduler")
            .field("workers", &self.workers.lock().len())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

fn route(uuid: &str, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    uuid.hash(&mut hasher);
    (hasher.finish() % workers as u64) as usize
}

async fn run_worker(id: usize, mut jobs: mpsc::Receiver<Job>, context: Arc<WorkerContext>) {
    while let Some(job) = jobs.recv().await {
        debug!(worker = id, cluster = %job.cluster.uuid, "running checkers");
        let results = run_batch(&context, &job.cluster);
        // The caller may have given up waiting; that is not an error here.
        let _ = job.reply.send(results);
    }
    debug!(worker = id, "check worker stopped");
}

fn run_batch(context: &WorkerContext, cluster: &ClusterSnapshot) -> Vec<WrappedCheckerResult> {
    let guard = RunGuard::start(&context.progress, &cluster.uuid, context.registry.len());
    let mut results = Vec::new();

    for checker in context.registry.iter() {
        if let Some(missing) = version_gate(checker, cluster) {
            results.push(missing);
            guard.checker_done(false);
            continue;
        }

        match checker.run(cluster) {
            Ok(mut batch) => {
                results.append(&mut batch);
                guard.checker_done(false);
            }
            Err(e) => {
                warn!(
                    cluster = %cluster.uuid,
                    checker = %checker.name(),
                    error = %e,
                    "checker failed"
                );
                context
                    .metrics
                    .cluster(&cluster.uuid, &cluster.name)
                    .record_error(checker.name());
                guard.checker_done(true);
            }
        }
    }

    results
}

/// A `missing` result when the cluster is older than the checker supports.
///
/// A cluster with no parseable node version is treated as too old.
fn version_gate(checker: &Checker, cluster: &ClusterSnapshot) -> Option<WrappedCheckerResult> {
    let min = checker.definition.min_version.as_ref()?;
    if cluster
        .nodes
        .min_version()
        .is_some_and(|version| version.at_least(min))
    {
        return None;
    }

    let result = CheckerResult::new(checker.name(), CheckerStatus::Missing).with_remediation(
        format!(
            "Cluster has to be at least {} to run this checker. Upgrade cluster to get more checkers.",
            min
        ),
    );
    Some(WrappedCheckerResult::new(
        result,
        ResultScope::cluster(&cluster.uuid),
    ))
}
