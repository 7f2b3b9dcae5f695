use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Receiver of progress reports, implemented by the job manager's update path.
pub(crate) trait ProgressSink: Send + Sync {
    fn record_progress(&self, job_id: &str, run_id: u64, fraction: f64, message: &str);
}

/// Handle given to an executor for one run of one job.
///
/// Reports are clamped so progress never moves backwards, and are dropped once
/// the run has been abandoned (timed out or cancelled).
#[derive(Clone)]
pub struct ProgressReporter {
    job_id: Arc<str>,
    run_id: u64,
    sink: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("job_id", &self.job_id)
            .field("run_id", &self.run_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl ProgressReporter {
    pub(crate) fn new(
        job_id: &str,
        run_id: u64,
        sink: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            job_id: Arc::from(job_id),
            run_id,
            sink,
            cancel,
        }
    }

    /// Report `fraction` in `[0, 1]` with a status line.
    pub fn report(&self, fraction: f64, message: impl AsRef<str>) {
        self.sink
            .record_progress(&self.job_id, self.run_id, fraction, message.as_ref());
    }

    /// True once the job was cancelled or timed out.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when [`Self::is_cancelled`] turns true.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Job this reporter belongs to.
    pub fn job_id(&self) -> &str {
        &self.job_id
    }
}
