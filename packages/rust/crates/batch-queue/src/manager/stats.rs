//! Failure and throughput statistics gathered since the manager was built.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Completed-run durations kept for the averages.
const DURATION_HISTORY: usize = 100;

/// Failed attempts seen by this manager, by error code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorStatistics {
    /// Every failed attempt, retried or terminal.
    pub total_errors: usize,
    /// Failed attempts that were scheduled for another try.
    pub retried: usize,
    /// Failed attempts that left the job in `Failed`.
    pub terminal: usize,
    /// Failed attempts per [`crate::JobError::code`].
    pub by_code: BTreeMap<String, usize>,
}

impl ErrorStatistics {
    /// Share of failed attempts that were retried, `0.0` without failures.
    #[allow(clippy::cast_precision_loss)]
    pub fn retry_rate(&self) -> f64 {
        if self.total_errors == 0 {
            return 0.0;
        }
        self.retried as f64 / self.total_errors as f64
    }
}

/// Throughput of runs completed by this manager.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceStats {
    /// Jobs this manager completed.
    pub completed_runs: usize,
    /// Durations behind the averages; only the most recent runs are kept.
    pub runs_in_history: usize,
    /// Mean execution time of the recent runs.
    pub average_execution_secs: Option<f64>,
    /// Median execution time of the recent runs.
    pub median_execution_secs: Option<f64>,
    /// Completions per hour since the first dispatch.
    pub jobs_per_hour: Option<f64>,
    /// First dispatch by this manager.
    pub processing_started_at: Option<DateTime<Utc>>,
    /// Pending and running jobs at the average duration, spread over the
    /// worker pool.
    pub estimated_remaining_secs: Option<f64>,
}

#[derive(Debug, Default)]
pub(crate) struct RunStats {
    errors: ErrorStatistics,
    first_claim_at: Option<DateTime<Utc>>,
    completed_runs: usize,
    durations: VecDeque<f64>,
}

impl RunStats {
    pub(crate) fn record_claim(&mut self, now: DateTime<Utc>) {
        self.first_claim_at.get_or_insert(now);
    }

    pub(crate) fn record_completion(&mut self, execution_secs: Option<f64>) {
        self.completed_runs += 1;
        if let Some(secs) = execution_secs {
            if self.durations.len() == DURATION_HISTORY {
                self.durations.pop_front();
            }
            self.durations.push_back(secs);
        }
    }

    pub(crate) fn record_failure(&mut self, code: &str, retried: bool) {
        self.errors.total_errors += 1;
        if retried {
            self.errors.retried += 1;
        } else {
            self.errors.terminal += 1;
        }
        *self.errors.by_code.entry(code.to_string()).or_default() += 1;
    }

    pub(crate) fn errors(&self) -> ErrorStatistics {
        self.errors.clone()
    }

    /// `outstanding` is the number of pending and running jobs.
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn performance(
        &self,
        now: DateTime<Utc>,
        outstanding: usize,
        max_workers: usize,
    ) -> PerformanceStats {
        let mut sorted: Vec<f64> = self.durations.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        let average = (!sorted.is_empty())
            .then(|| sorted.iter().sum::<f64>() / sorted.len() as f64);
        let median = sorted.get(sorted.len() / 2).copied();

        let jobs_per_hour = self.first_claim_at.and_then(|started| {
            let elapsed_ms = (now - started).num_milliseconds();
            (elapsed_ms > 0)
                .then(|| self.completed_runs as f64 * 3_600_000.0 / elapsed_ms as f64)
        });
        let estimated_remaining_secs = average
            .map(|average| outstanding as f64 * average / max_workers.max(1) as f64);

        PerformanceStats {
            completed_runs: self.completed_runs,
            runs_in_history: sorted.len(),
            average_execution_secs: average,
            median_execution_secs: median,
            jobs_per_hour,
            processing_started_at: self.first_claim_at,
            estimated_remaining_secs,
        }
    }
}
