//! Single update path for the job set: every mutation, progress report and
//! checkpoint goes through [`JobBook`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Notify, broadcast};

use crate::config::{RequeuePolicy, RetryBackoff};
use crate::error::QueueError;
use crate::executor::ProgressSink;
use crate::job::{Job, JobResult, JobStatus};

use super::events::{JobEvent, JobEventKind};
use super::persistence::{QueueSnapshot, StateStore};
use super::table::{Claim, JobTable, RetryRules};

pub(crate) struct JobBook {
    table: Mutex<JobTable>,
    /// Generation of the last snapshot on disk.
    writer: Mutex<u64>,
    store: StateStore,
    wake: Notify,
    events: broadcast::Sender<JobEvent>,
    auto_save: bool,
    checkpoint_interval: usize,
    retry_rules: RetryRules,
}

pub(crate) struct BookOptions {
    pub(crate) auto_save: bool,
    pub(crate) checkpoint_interval: usize,
    pub(crate) requeue_policy: RequeuePolicy,
    pub(crate) retry_backoff: RetryBackoff,
    pub(crate) event_capacity: usize,
}

impl JobBook {
    pub(crate) fn new(table: JobTable, store: StateStore, options: &BookOptions) -> Self {
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        Self {
            table: Mutex::new(table),
            writer: Mutex::new(0),
            store,
            wake: Notify::new(),
            events,
            auto_save: options.auto_save,
            checkpoint_interval: options.checkpoint_interval.max(1),
            retry_rules: RetryRules {
                policy: options.requeue_policy,
                backoff: options.retry_backoff,
            },
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, JobTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn store(&self) -> &StateStore {
        &self.store
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Callers hold the table lock, so events follow the order of the
    /// changes they describe.
    fn emit(&self, job_id: &str, kind: JobEventKind) {
        // No subscribers is fine.
        let _ = self.events.send(JobEvent::new(job_id, kind));
    }

    /// Wake the dispatcher.
    pub(crate) fn wake(&self) {
        self.wake.notify_one();
    }

    pub(crate) async fn wait_for_work(&self) {
        self.wake.notified().await;
    }

    pub(crate) fn add(&self, job: Job) -> bool {
        let job_id = job.id().to_string();
        let job_type = job.job_type().to_string();
        {
            let mut table = self.lock();
            if !table.insert_pending(job) {
                tracing::debug!(job_id = %job_id, "job id already in use");
                return false;
            }
            self.emit(&job_id, JobEventKind::Added);
        }
        tracing::info!(
            event = JobEventKind::Added.as_str(),
            job_id = %job_id,
            job_type = %job_type,
            "job queued"
        );
        self.wake();
        true
    }

    pub(crate) fn claim_next(&self) -> Option<Claim> {
        let claim = {
            let mut table = self.lock();
            let claim = table.claim_next(Utc::now())?;
            self.emit(claim.job.id(), JobEventKind::Started);
            claim
        };
        tracing::info!(
            event = JobEventKind::Started.as_str(),
            job_id = %claim.job.id(),
            job_type = %claim.job.job_type(),
            run_id = claim.run_id,
            attempt = claim.job.retry_count(),
            "job started"
        );
        Some(claim)
    }

    /// Record the outcome of one run. Outcomes of abandoned runs are dropped.
    pub(crate) fn commit(self: &Arc<Self>, job_id: &str, run_id: u64, result: JobResult) {
        let summary = result.error.as_ref().map(ToString::to_string);
        let settled = {
            let mut table = self.lock();
            let settled = table.settle(job_id, run_id, result, Utc::now(), self.retry_rules);
            if let Some(settled) = &settled {
                self.emit(job_id, settled.kind.clone());
            }
            settled
        };
        let Some(settled) = settled else {
            tracing::debug!(job_id, run_id, "ignoring outcome of abandoned run");
            return;
        };
        let event = settled.kind.as_str();
        match &settled.kind {
            JobEventKind::Completed => {
                tracing::info!(event, job_id, job_type = %settled.job_type, "job completed");
            }
            JobEventKind::Retrying { attempt } => {
                let retry_after_secs = settled.retry_after.map_or(0.0, |delay| delay.as_secs_f64());
                tracing::warn!(
                    event,
                    job_id,
                    job_type = %settled.job_type,
                    attempt,
                    retry_after_secs,
                    error = summary.as_deref().unwrap_or_default(),
                    "job failed; retrying"
                );
                match settled.retry_after {
                    Some(delay) => self.schedule_requeue(job_id, delay),
                    None => self.wake(),
                }
            }
            _ => {
                tracing::warn!(
                    event,
                    job_id,
                    job_type = %settled.job_type,
                    error = summary.as_deref().unwrap_or_default(),
                    "job failed"
                );
            }
        }
        self.checkpoint_logged();
    }

    /// Put a backed-off retry back in line once `delay` elapses.
    fn schedule_requeue(self: &Arc<Self>, job_id: &str, delay: Duration) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.requeue(job_id);
            return;
        };
        let book = Arc::clone(self);
        let job_id = job_id.to_string();
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            book.requeue(&job_id);
        });
    }

    fn requeue(&self, job_id: &str) {
        if self.lock().requeue(job_id, self.retry_rules.policy) {
            tracing::debug!(job_id, "retry backoff elapsed; job requeued");
            self.wake();
        }
    }

    pub(crate) fn cancel(&self, job_id: &str) -> bool {
        let previous = {
            let mut table = self.lock();
            let Some(previous) = table.cancel(job_id, Utc::now()) else {
                return false;
            };
            self.emit(job_id, JobEventKind::Cancelled);
            previous
        };
        tracing::info!(
            event = JobEventKind::Cancelled.as_str(),
            job_id,
            previous_status = previous.as_str(),
            "job cancelled"
        );
        self.checkpoint_logged();
        true
    }

    pub(crate) fn remove(&self, job_id: &str) -> bool {
        let job = {
            let mut table = self.lock();
            let Some(job) = table.remove(job_id) else {
                return false;
            };
            self.emit(job_id, JobEventKind::Removed);
            job
        };
        tracing::info!(
            event = JobEventKind::Removed.as_str(),
            job_id,
            status = job.status().as_str(),
            "job removed"
        );
        self.checkpoint_logged();
        true
    }

    pub(crate) fn clear_status(&self, status: JobStatus) -> usize {
        let removed = {
            let mut table = self.lock();
            let removed = table.clear_status(status);
            for job_id in &removed {
                self.emit(job_id, JobEventKind::Removed);
            }
            removed
        };
        if removed.is_empty() {
            return 0;
        }
        tracing::info!(
            status = status.as_str(),
            count = removed.len(),
            "cleared finished jobs"
        );
        self.checkpoint_logged();
        removed.len()
    }

    /// Ask every in-flight executor to stop; their jobs stay `Running` and
    /// are requeued on the next recovery.
    pub(crate) fn abandon_active_runs(&self) {
        let signalled = self.lock().signal_active_runs();
        if signalled > 0 {
            tracing::warn!(count = signalled, "abandoning in-flight jobs at shutdown");
        }
    }

    /// Save when auto-save is on and enough changes accumulated.
    pub(crate) fn checkpoint_if_due(&self) -> Result<(), QueueError> {
        if !self.auto_save {
            return Ok(());
        }
        let taken = {
            let mut table = self.lock();
            if table.unsaved_changes() < self.checkpoint_interval {
                return Ok(());
            }
            table.take_snapshot(Utc::now())
        };
        self.write(taken)
    }

    /// Save unconditionally.
    pub(crate) fn checkpoint(&self) -> Result<(), QueueError> {
        let taken = self.lock().take_snapshot(Utc::now());
        self.write(taken)
    }

    fn checkpoint_logged(&self) {
        if let Err(error) = self.checkpoint_if_due() {
            tracing::warn!(error = %error, "automatic checkpoint failed");
        }
    }

    fn write(
        &self,
        (generation, covered, snapshot): (u64, usize, QueueSnapshot),
    ) -> Result<(), QueueError> {
        let mut written = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if generation <= *written {
            return Ok(());
        }
        match self.store.save(&snapshot) {
            Ok(()) => {
                *written = generation;
                tracing::debug!(
                    path = %self.store.path().display(),
                    generation,
                    jobs = snapshot.jobs.len(),
                    "queue state checkpointed"
                );
                Ok(())
            }
            Err(error) => {
                drop(written);
                self.lock().restore_unsaved(covered);
                Err(error)
            }
        }
    }
}

impl ProgressSink for JobBook {
    fn record_progress(&self, job_id: &str, run_id: u64, fraction: f64, message: &str) {
        let mut table = self.lock();
        if let Some(fraction) = table.record_progress(job_id, run_id, fraction, message) {
            self.emit(
                job_id,
                JobEventKind::Progress {
                    fraction,
                    message: message.to_string(),
                },
            );
            drop(table);
            tracing::trace!(job_id, run_id, fraction, message, "job progress");
        }
    }
}
