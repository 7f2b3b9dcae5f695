//! The job record and its guarded transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use super::result::{FieldMap, JobError, JobResult, codes};
use super::status::JobStatus;

/// Retry budget given to jobs built with [`Job::new`].
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// A transition the state machine does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal job transition {from} -> {to}")]
pub struct InvalidTransition {
    /// Status the job was in.
    pub from: JobStatus,
    /// Status that was requested.
    pub to: JobStatus,
}

/// What happened to a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureOutcome {
    /// Budget remained; the job is `Pending` again.
    Retrying,
    /// Budget exhausted; the job rests in `Failed`.
    Terminal,
}

/// One unit of work.
///
/// Identity fields are fixed at construction. Status, progress, timestamps
/// and the result only change through the crate's transition methods, which
/// the job manager invokes under its lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    id: String,
    job_type: String,
    input_reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    output_reference: Option<String>,
    #[serde(default, skip_serializing_if = "FieldMap::is_empty")]
    options: FieldMap,
    status: JobStatus,
    #[serde(default)]
    progress: f64,
    #[serde(default)]
    progress_message: String,
    #[serde(default)]
    retry_count: u32,
    #[serde(default = "default_max_retries")]
    max_retries: u32,
    created_at: DateTime<Utc>,
    #[serde(default)]
    started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    result: Option<JobResult>,
}

const fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl Job {
    /// Create a new pending job with a fresh id.
    pub fn new(job_type: impl Into<String>, input_reference: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), job_type, input_reference)
    }

    /// Create a new pending job with a specific id.
    pub fn with_id(
        id: impl Into<String>,
        job_type: impl Into<String>,
        input_reference: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            job_type: job_type.into(),
            input_reference: input_reference.into(),
            output_reference: None,
            options: FieldMap::new(),
            status: JobStatus::Pending,
            progress: 0.0,
            progress_message: String::new(),
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
        }
    }

    /// Where the executor should write its output.
    #[must_use]
    pub fn with_output_reference(mut self, output: impl Into<String>) -> Self {
        self.output_reference = Some(output.into());
        self
    }

    /// Attach an executor-specific option (render size, frame count, ...).
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Override the retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Unique id, never reused by the manager.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Tag used to pick the executor.
    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    /// Path or URI of the input, opaque to the queue.
    pub fn input_reference(&self) -> &str {
        &self.input_reference
    }

    /// Requested output location, if any.
    pub fn output_reference(&self) -> Option<&str> {
        self.output_reference.as_deref()
    }

    /// Executor options.
    pub fn options(&self) -> &FieldMap {
        &self.options
    }

    /// Current lifecycle status.
    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Fraction in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        self.progress
    }

    /// Last progress line, or the last error while a retry waits.
    pub fn progress_message(&self) -> &str {
        &self.progress_message
    }

    /// Failed attempts that were retried.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Retry budget.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Creation time; orders newly added jobs.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Start of the current or last run; cleared on retry.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// When the job reached a terminal status.
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Terminal result; `None` until the job reaches a terminal status.
    pub fn result(&self) -> Option<&JobResult> {
        self.result.as_ref()
    }

    /// Dispatch order key: creation time, ties broken by id.
    pub(crate) fn queue_key(&self) -> (DateTime<Utc>, &str) {
        (self.created_at, self.id.as_str())
    }

    fn ensure(&self, to: JobStatus) -> Result<(), InvalidTransition> {
        if self.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(InvalidTransition {
                from: self.status,
                to,
            })
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn elapsed_secs(&self, now: DateTime<Utc>) -> Option<f64> {
        self.started_at
            .map(|started| (now - started).num_milliseconds().max(0) as f64 / 1000.0)
    }

    /// `Pending -> Running`.
    pub(crate) fn start(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.ensure(JobStatus::Running)?;
        self.status = JobStatus::Running;
        self.started_at = Some(now);
        self.progress = 0.0;
        self.progress_message.clear();
        Ok(())
    }

    /// `Running -> Completed`.
    pub(crate) fn complete(
        &mut self,
        mut result: JobResult,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        self.ensure(JobStatus::Completed)?;
        result.execution_time_secs = self.elapsed_secs(now);
        self.status = JobStatus::Completed;
        self.progress = 1.0;
        self.completed_at = Some(now);
        self.result = Some(result);
        Ok(())
    }

    /// `Running -> Failed`, then `Failed -> Pending` while budget remains.
    pub(crate) fn fail(
        &mut self,
        mut result: JobResult,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome, InvalidTransition> {
        self.ensure(JobStatus::Failed)?;
        self.status = JobStatus::Failed;
        if let Some(error) = result.error.as_ref() {
            self.progress_message = error.to_string();
        }

        if self.retry_count < self.max_retries {
            self.retry_count += 1;
            self.status = JobStatus::Pending;
            self.started_at = None;
            self.progress = 0.0;
            return Ok(FailureOutcome::Retrying);
        }

        result.execution_time_secs = self.elapsed_secs(now);
        self.completed_at = Some(now);
        self.result = Some(result);
        Ok(FailureOutcome::Terminal)
    }

    /// `Pending | Running -> Cancelled`.
    pub(crate) fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.ensure(JobStatus::Cancelled)?;
        let mut result = JobResult::failure(
            self.id.clone(),
            JobError::new(codes::CANCELLED, "job was cancelled")
                .with_detail("previous_status", self.status.as_str()),
        );
        result.execution_time_secs = self.elapsed_secs(now);
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(now);
        self.result = Some(result);
        Ok(())
    }

    /// Put a job interrupted by a crash back in line. Returns false unless the
    /// job was `Running`.
    pub(crate) fn reset_for_recovery(&mut self) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        self.status = JobStatus::Pending;
        self.started_at = None;
        self.progress = 0.0;
        self.progress_message = "requeued after interrupted run".to_string();
        true
    }

    /// Record a progress report. Returns the stored fraction, or `None` when
    /// the job is not running.
    pub(crate) fn record_progress(&mut self, fraction: f64, message: &str) -> Option<f64> {
        if self.status != JobStatus::Running {
            return None;
        }
        let floor = self.progress.max(0.0);
        let fraction = if fraction.is_nan() { floor } else { fraction };
        self.progress = fraction.clamp(floor, 1.0);
        self.progress_message.clear();
        self.progress_message.push_str(message);
        Some(self.progress)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::Map;

    use super::{FailureOutcome, InvalidTransition, Job};
    use crate::job::{JobError, JobResult, JobStatus, codes};

    fn failure(job: &Job) -> JobResult {
        JobResult::failure(job.id(), JobError::new("RENDER_FAILED", "bad mesh"))
    }

    #[test]
    fn new_job_is_pending_without_result() {
        let job = Job::new("render", "/meshes/a.stl");
        assert_eq!(job.status(), JobStatus::Pending);
        assert!(job.result().is_none());
        assert!(job.progress().abs() < f64::EPSILON);
        assert!(job.started_at().is_none());
    }

    #[test]
    fn completion_sets_result_and_full_progress() {
        let mut job = Job::new("render", "a.stl");
        job.start(Utc::now()).expect("start should succeed");
        assert!(job.result().is_none());
        job.complete(JobResult::success(job.id(), Map::new()), Utc::now())
            .expect("complete should succeed");
        assert_eq!(job.status(), JobStatus::Completed);
        assert!((job.progress() - 1.0).abs() < f64::EPSILON);
        assert!(job.completed_at().is_some());
        assert!(job.result().is_some_and(|r| r.success));
    }

    #[test]
    fn out_of_order_transitions_are_rejected_without_mutation() {
        let mut job = Job::new("render", "a.stl");
        let before = job.clone();
        let err = job
            .complete(JobResult::success(job.id(), Map::new()), Utc::now())
            .err();
        assert_eq!(
            err,
            Some(InvalidTransition {
                from: JobStatus::Pending,
                to: JobStatus::Completed
            })
        );
        assert_eq!(job, before);

        job.start(Utc::now()).expect("start should succeed");
        assert!(job.start(Utc::now()).is_err());
    }

    #[test]
    fn failures_retry_until_budget_is_spent() {
        let mut job = Job::new("render", "a.stl").with_max_retries(2);
        let mut failed_transitions = 0;
        loop {
            job.start(Utc::now()).expect("start should succeed");
            failed_transitions += 1;
            let outcome = job.fail(failure(&job), Utc::now());
            match outcome {
                Ok(FailureOutcome::Retrying) => {
                    assert_eq!(job.status(), JobStatus::Pending);
                    assert!(job.result().is_none());
                    assert!(job.started_at().is_none());
                }
                Ok(FailureOutcome::Terminal) => break,
                Err(error) => panic!("unexpected {error}"),
            }
        }
        assert_eq!(failed_transitions, 3);
        assert_eq!(job.retry_count(), 2);
        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(
            job.result().and_then(JobResult::error_code),
            Some("RENDER_FAILED")
        );
        assert!(job.start(Utc::now()).is_err());
    }

    #[test]
    fn cancel_is_legal_from_pending_and_running_only() {
        let mut pending = Job::new("render", "a.stl");
        assert!(pending.cancel(Utc::now()).is_ok());
        assert_eq!(
            pending.result().and_then(JobResult::error_code),
            Some(codes::CANCELLED)
        );
        assert!(pending.cancel(Utc::now()).is_err());

        let mut running = Job::new("render", "b.stl");
        running.start(Utc::now()).expect("start should succeed");
        assert!(running.cancel(Utc::now()).is_ok());
        assert_eq!(running.status(), JobStatus::Cancelled);
    }

    #[test]
    fn progress_is_clamped_and_monotonic() {
        let mut job = Job::new("render", "a.stl");
        assert_eq!(job.record_progress(0.5, "early"), None);

        job.start(Utc::now()).expect("start should succeed");
        assert_eq!(job.record_progress(0.4, "loading"), Some(0.4));
        assert_eq!(job.record_progress(0.1, "stale"), Some(0.4));
        assert_eq!(job.progress_message(), "stale");
        assert_eq!(job.record_progress(f64::NAN, "nan"), Some(0.4));
        assert_eq!(job.record_progress(7.0, "overshoot"), Some(1.0));
        assert_eq!(job.record_progress(-3.0, "negative"), Some(1.0));
    }

    #[test]
    fn recovery_reset_keeps_retry_count() {
        let mut job = Job::new("render", "a.stl").with_max_retries(3);
        job.start(Utc::now()).expect("start should succeed");
        let _ = job.fail(failure(&job), Utc::now());
        job.start(Utc::now()).expect("start should succeed");
        job.record_progress(0.7, "half way");

        assert!(job.reset_for_recovery());
        assert_eq!(job.status(), JobStatus::Pending);
        assert_eq!(job.retry_count(), 1);
        assert!(job.progress().abs() < f64::EPSILON);
        assert!(!job.reset_for_recovery());
    }

    #[test]
    fn unknown_fields_and_missing_optionals_deserialize() {
        let raw = r#"{
            "id": "job-1",
            "job_type": "render",
            "input_reference": "a.stl",
            "status": "pending",
            "created_at": "2024-05-01T10:00:00Z",
            "priority_hint": 9
        }"#;
        let job: Job = serde_json::from_str(raw).expect("job should deserialize");
        assert_eq!(job.id(), "job-1");
        assert_eq!(job.max_retries(), super::DEFAULT_MAX_RETRIES);
        assert!(job.options().is_empty());
    }
}
