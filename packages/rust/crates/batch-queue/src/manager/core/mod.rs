//! Core façade over the job book and the execution engine.

mod lifecycle;
mod metrics;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tokio::sync::broadcast;

use crate::config::JobManagerConfig;
use crate::engine::ExecutionEngine;
use crate::error::QueueError;
use crate::executor::ExecutorRegistry;
use crate::job::{Job, JobStatus};

use super::book::{BookOptions, JobBook};
use super::events::JobEvent;
use super::persistence::StateStore;
use super::table::JobTable;

/// Persistent job queue with a bounded worker pool.
///
/// Construction recovers persisted state when `enable_recovery` is set.
/// Processing starts with [`JobManager::start_processing`], which must be
/// called inside a tokio runtime.
pub struct JobManager {
    config: JobManagerConfig,
    registry: Arc<ExecutorRegistry>,
    book: Arc<JobBook>,
    engine: ExecutionEngine,
    cleaned_up: AtomicBool,
}

impl JobManager {
    /// Build a manager, loading `<state_dir>/queue_state.json` when recovery
    /// is enabled.
    ///
    /// Fails with [`QueueError::CorruptState`] if the state file exists but
    /// cannot be read back.
    pub fn new(
        config: JobManagerConfig,
        registry: Arc<ExecutorRegistry>,
    ) -> Result<Self, QueueError> {
        let config = config.normalized();
        let store = StateStore::new(&config.state_dir);

        let table = if config.enable_recovery {
            match store.load()? {
                Some(snapshot) => {
                    let (table, interrupted) = JobTable::restore(snapshot);
                    let summary = table.summary();
                    tracing::info!(
                        path = %store.path().display(),
                        total_jobs = summary.total_jobs,
                        pending_jobs = summary.pending_jobs,
                        interrupted,
                        "recovered queue state"
                    );
                    table
                }
                None => JobTable::default(),
            }
        } else {
            JobTable::default()
        };

        let options = BookOptions {
            auto_save: config.auto_save,
            checkpoint_interval: config.checkpoint_interval,
            requeue_policy: config.requeue_policy,
            retry_backoff: config.retry_backoff,
            event_capacity: config.event_capacity,
        };
        let book = Arc::new(JobBook::new(table, store, &options));
        let engine = ExecutionEngine::new(config.max_workers, config.job_timeout);

        Ok(Self {
            config,
            registry,
            book,
            engine,
            cleaned_up: AtomicBool::new(false),
        })
    }

    /// Configuration after clamping.
    pub fn config(&self) -> &JobManagerConfig {
        &self.config
    }

    /// Executors this manager dispatches to.
    pub fn registry(&self) -> &Arc<ExecutorRegistry> {
        &self.registry
    }

    /// Path of the state file this manager checkpoints to.
    pub fn state_file(&self) -> &Path {
        self.book.store().path()
    }

    /// Build a pending job carrying the configured default retry budget.
    pub fn create_job(
        &self,
        job_type: impl Into<String>,
        input_reference: impl Into<String>,
    ) -> Job {
        Job::new(job_type, input_reference).with_max_retries(self.config.default_max_retries)
    }

    /// Queue `job`.
    ///
    /// Returns `Ok(false)` without touching the queue when the id is already
    /// known (including ids of removed jobs) or the job is not `Pending`. A failed automatic checkpoint is
    /// returned as `Err`; the job stays queued in memory.
    pub fn add_job(&self, job: Job) -> Result<bool, QueueError> {
        if job.status() != JobStatus::Pending {
            tracing::warn!(
                job_id = %job.id(),
                status = job.status().as_str(),
                "refusing to queue a job that is not pending"
            );
            return Ok(false);
        }
        if !self.book.add(job) {
            return Ok(false);
        }
        self.book.checkpoint_if_due()?;
        Ok(true)
    }

    /// Cancel a pending or running job.
    ///
    /// A running executor is signalled through
    /// [`crate::ProgressReporter::is_cancelled`]; the worker stops waiting on
    /// it at once.
    pub fn cancel_job(&self, job_id: &str) -> bool {
        self.book.cancel(job_id)
    }

    /// Forget a job, cancelling it first if it is running.
    pub fn remove_job(&self, job_id: &str) -> bool {
        self.book.remove(job_id)
    }

    /// Remove every job resting in `status`. Only terminal statuses are
    /// cleared; any other status removes nothing.
    pub fn clear_finished(&self, status: JobStatus) -> usize {
        self.book.clear_status(status)
    }

    /// Lifecycle events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.book.subscribe()
    }

    /// Persist the job set now, regardless of `auto_save`.
    pub fn checkpoint(&self) -> Result<(), QueueError> {
        self.book.checkpoint()
    }
}
