use async_trait::async_trait;

use crate::job::{Job, JobResult};

use super::progress::ProgressReporter;

/// Trait for implementing job executors.
///
/// One executor serves one job type. The engine drives `execute` on a
/// blocking-pool thread, so it may block (mesh rendering, file I/O) as well
/// as await. The engine stops waiting on it after the job timeout or a
/// cancellation but never aborts it. Long-running executors should poll
/// [`ProgressReporter::is_cancelled`] between steps and return early.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Authoritative check, independent of the registry key.
    fn can_handle(&self, job: &Job) -> bool;

    /// Run the job. Failures are reported through the returned result;
    /// a panic is recorded as `EXECUTOR_FAULT`.
    async fn execute(&self, job: Job, progress: ProgressReporter) -> JobResult;

    /// Release executor-held resources. Called once at shutdown.
    fn cleanup(&self) {}
}
