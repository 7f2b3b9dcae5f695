use serde::{Deserialize, Serialize};

use super::record::Job;
use super::status::JobStatus;

/// Point-in-time job counts by status.
///
/// Always recomputed from the job set, never cached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueSummary {
    /// Every job record.
    pub total_jobs: usize,
    /// Jobs waiting for dispatch, including retries in backoff.
    pub pending_jobs: usize,
    /// Jobs in flight.
    pub running_jobs: usize,
    /// Jobs that succeeded.
    pub completed_jobs: usize,
    /// Jobs that failed with no retries left.
    pub failed_jobs: usize,
    /// Jobs cancelled by the caller.
    pub cancelled_jobs: usize,
}

impl QueueSummary {
    /// Count `jobs` by status.
    pub fn from_jobs<'a>(jobs: impl IntoIterator<Item = &'a Job>) -> Self {
        let mut summary = Self::default();
        for job in jobs {
            summary.total_jobs += 1;
            match job.status() {
                JobStatus::Pending => summary.pending_jobs += 1,
                JobStatus::Running => summary.running_jobs += 1,
                JobStatus::Completed => summary.completed_jobs += 1,
                JobStatus::Failed => summary.failed_jobs += 1,
                JobStatus::Cancelled => summary.cancelled_jobs += 1,
            }
        }
        summary
    }

    /// Count for one status.
    pub fn count(&self, status: JobStatus) -> usize {
        match status {
            JobStatus::Pending => self.pending_jobs,
            JobStatus::Running => self.running_jobs,
            JobStatus::Completed => self.completed_jobs,
            JobStatus::Failed => self.failed_jobs,
            JobStatus::Cancelled => self.cancelled_jobs,
        }
    }

    /// Nothing waiting and nothing in flight.
    pub fn is_idle(&self) -> bool {
        self.pending_jobs == 0 && self.running_jobs == 0
    }
}
