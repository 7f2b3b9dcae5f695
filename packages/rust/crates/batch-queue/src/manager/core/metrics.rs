use chrono::Utc;

use crate::job::{Job, QueueSummary};
use crate::manager::stats::{ErrorStatistics, PerformanceStats};

use super::JobManager;

impl JobManager {
    /// Counts by status, computed under the lock.
    pub fn queue_summary(&self) -> QueueSummary {
        self.book.lock().summary()
    }

    /// Mean progress over every job, `0.0` for an empty queue.
    pub fn overall_progress(&self) -> f64 {
        self.book.lock().overall_progress()
    }

    /// Failed attempts since construction, retried or terminal, by code.
    pub fn error_statistics(&self) -> ErrorStatistics {
        self.book.lock().stats().errors()
    }

    /// Execution times and throughput of runs completed since construction,
    /// with a remaining-time estimate for the jobs still outstanding.
    pub fn performance_stats(&self) -> PerformanceStats {
        let table = self.book.lock();
        let summary = table.summary();
        let outstanding = summary.pending_jobs + summary.running_jobs;
        table
            .stats()
            .performance(Utc::now(), outstanding, self.config.max_workers)
    }

    /// Copy of one job record.
    pub fn get_job(&self, job_id: &str) -> Option<Job> {
        self.book.lock().get(job_id).cloned()
    }

    /// Copies of all job records, oldest first.
    pub fn jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.book.lock().jobs().cloned().collect();
        jobs.sort_by(|a, b| a.queue_key().cmp(&b.queue_key()));
        jobs
    }

    /// Ids waiting for dispatch, in order.
    pub fn pending_order(&self) -> Vec<String> {
        self.book
            .lock()
            .pending_order()
            .map(str::to_string)
            .collect()
    }
}
