//! Canonical job set and pending queue, guarded by the book's mutex.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::config::{RequeuePolicy, RetryBackoff};
use crate::job::{FailureOutcome, Job, JobResult, JobStatus, QueueSummary};

use super::events::JobEventKind;
use super::persistence::{QueueSnapshot, SNAPSHOT_VERSION};
use super::stats::RunStats;

/// A job handed to a worker.
#[derive(Debug, Clone)]
pub(crate) struct Claim {
    pub(crate) job: Job,
    pub(crate) run_id: u64,
    pub(crate) cancel: CancellationToken,
}

#[derive(Debug)]
struct ActiveRun {
    run_id: u64,
    cancel: CancellationToken,
}

/// How failed jobs with budget left rejoin the queue.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RetryRules {
    pub(crate) policy: RequeuePolicy,
    pub(crate) backoff: RetryBackoff,
}

/// Result of committing a run.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Settled {
    pub(crate) job_type: String,
    pub(crate) kind: JobEventKind,
    /// Set when a retry waits out a backoff before it is queued again.
    pub(crate) retry_after: Option<Duration>,
}

#[derive(Debug, Default)]
pub(crate) struct JobTable {
    jobs: HashMap<String, Job>,
    pending: VecDeque<String>,
    active: HashMap<String, ActiveRun>,
    /// Ids of removed jobs; never accepted again.
    retired: HashSet<String>,
    stats: RunStats,
    next_run_id: u64,
    unsaved_changes: usize,
    generation: u64,
}

impl JobTable {
    /// Rebuild from a snapshot. Interrupted runs go first, then the saved
    /// pending order, then any pending job the order did not list.
    pub(crate) fn restore(snapshot: QueueSnapshot) -> (Self, usize) {
        let mut jobs: HashMap<String, Job> = snapshot.jobs.into_iter().collect();

        let mut interrupted: Vec<(DateTime<Utc>, String)> = jobs
            .values_mut()
            .filter_map(|job| {
                job.reset_for_recovery()
                    .then(|| (job.created_at(), job.id().to_string()))
            })
            .collect();
        interrupted.sort();
        let recovered = interrupted.len();

        let mut pending = VecDeque::with_capacity(jobs.len());
        let mut seen = HashSet::new();
        for (_, id) in interrupted {
            seen.insert(id.clone());
            pending.push_back(id);
        }
        for id in snapshot.pending_order {
            let is_pending = jobs
                .get(&id)
                .is_some_and(|job| job.status() == JobStatus::Pending);
            if is_pending && seen.insert(id.clone()) {
                pending.push_back(id);
            }
        }
        let mut unlisted: Vec<(DateTime<Utc>, String)> = jobs
            .values()
            .filter(|job| job.status() == JobStatus::Pending && !seen.contains(job.id()))
            .map(|job| (job.created_at(), job.id().to_string()))
            .collect();
        unlisted.sort();
        pending.extend(unlisted.into_iter().map(|(_, id)| id));

        let table = Self {
            jobs,
            pending,
            retired: snapshot.retired_ids.into_iter().collect(),
            ..Self::default()
        };
        (table, recovered)
    }

    pub(crate) fn get(&self, job_id: &str) -> Option<&Job> {
        self.jobs.get(job_id)
    }

    pub(crate) fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    /// Pending ids in dispatch order.
    pub(crate) fn pending_order(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().map(String::as_str)
    }

    pub(crate) fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// True when `job_id` belongs to a current or a removed job.
    pub(crate) fn is_known(&self, job_id: &str) -> bool {
        self.jobs.contains_key(job_id) || self.retired.contains(job_id)
    }

    /// Insert a new pending job by `(created_at, id)`. Jobs already queued
    /// with an equal or smaller key stay ahead of it.
    pub(crate) fn insert_pending(&mut self, job: Job) -> bool {
        if self.is_known(job.id()) {
            return false;
        }
        let mut index = self.pending.len();
        while index > 0 {
            let ahead = self
                .jobs
                .get(&self.pending[index - 1])
                .map(Job::queue_key);
            match ahead {
                Some(key) if key > job.queue_key() => index -= 1,
                _ => break,
            }
        }
        self.pending.insert(index, job.id().to_string());
        self.jobs.insert(job.id().to_string(), job);
        self.unsaved_changes += 1;
        true
    }

    /// Move the next pending job to `Running`.
    pub(crate) fn claim_next(&mut self, now: DateTime<Utc>) -> Option<Claim> {
        while let Some(id) = self.pending.pop_front() {
            let Some(job) = self.jobs.get_mut(&id) else {
                continue;
            };
            if job.start(now).is_err() {
                continue;
            }
            self.next_run_id += 1;
            let run_id = self.next_run_id;
            self.stats.record_claim(now);
            let cancel = CancellationToken::new();
            self.active.insert(
                id,
                ActiveRun {
                    run_id,
                    cancel: cancel.clone(),
                },
            );
            return Some(Claim {
                job: job.clone(),
                run_id,
                cancel,
            });
        }
        None
    }

    fn is_current_run(&self, job_id: &str, run_id: u64) -> bool {
        self.active
            .get(job_id)
            .is_some_and(|active| active.run_id == run_id)
    }

    pub(crate) fn record_progress(
        &mut self,
        job_id: &str,
        run_id: u64,
        fraction: f64,
        message: &str,
    ) -> Option<f64> {
        if !self.is_current_run(job_id, run_id) {
            return None;
        }
        self.jobs
            .get_mut(job_id)
            .and_then(|job| job.record_progress(fraction, message))
    }

    /// Apply the outcome of run `run_id`. Returns `None` for a stale run.
    ///
    /// A retry with a non-zero backoff stays `Pending` outside the queue
    /// until [`Self::requeue`] is called for it.
    pub(crate) fn settle(
        &mut self,
        job_id: &str,
        run_id: u64,
        result: JobResult,
        now: DateTime<Utc>,
        rules: RetryRules,
    ) -> Option<Settled> {
        if !self.is_current_run(job_id, run_id) {
            return None;
        }
        self.active.remove(job_id);
        let job = self.jobs.get_mut(job_id)?;
        let job_type = job.job_type().to_string();

        let kind = if result.success {
            job.complete(result, now).ok()?;
            let execution_secs = job.result().and_then(|result| result.execution_time_secs);
            self.stats.record_completion(execution_secs);
            JobEventKind::Completed
        } else {
            let code = result.error_code().unwrap_or_default().to_string();
            let outcome = job.fail(result, now).ok()?;
            let attempt = job.retry_count();
            self.stats
                .record_failure(&code, outcome == FailureOutcome::Retrying);
            match outcome {
                FailureOutcome::Retrying => {
                    let delay = rules.backoff.delay_for(attempt);
                    let retry_after = if delay.is_zero() {
                        self.enqueue(job_id, rules.policy);
                        None
                    } else {
                        Some(delay)
                    };
                    return Some(Settled {
                        job_type,
                        kind: JobEventKind::Retrying { attempt },
                        retry_after,
                    });
                }
                FailureOutcome::Terminal => JobEventKind::Failed { code },
            }
        };
        self.unsaved_changes += 1;
        Some(Settled {
            job_type,
            kind,
            retry_after: None,
        })
    }

    /// Queue a retry whose backoff elapsed. Returns false when the job was
    /// cancelled, removed or already queued in the meantime.
    pub(crate) fn requeue(&mut self, job_id: &str, policy: RequeuePolicy) -> bool {
        let waiting = self
            .jobs
            .get(job_id)
            .is_some_and(|job| job.status() == JobStatus::Pending);
        if !waiting || self.pending.iter().any(|id| id == job_id) {
            return false;
        }
        self.enqueue(job_id, policy);
        true
    }

    fn enqueue(&mut self, job_id: &str, policy: RequeuePolicy) {
        match policy {
            RequeuePolicy::Tail => self.pending.push_back(job_id.to_string()),
            RequeuePolicy::Head => self.pending.push_front(job_id.to_string()),
        }
    }

    /// Cancel a pending or running job. Returns the status it left.
    pub(crate) fn cancel(&mut self, job_id: &str, now: DateTime<Utc>) -> Option<JobStatus> {
        let job = self.jobs.get_mut(job_id)?;
        let previous = job.status();
        job.cancel(now).ok()?;
        match previous {
            JobStatus::Pending => self.pending.retain(|id| id != job_id),
            _ => {
                if let Some(active) = self.active.remove(job_id) {
                    active.cancel.cancel();
                }
            }
        }
        self.unsaved_changes += 1;
        Some(previous)
    }

    /// Drop a job from the table, signalling its run if one is in flight.
    pub(crate) fn remove(&mut self, job_id: &str) -> Option<Job> {
        let job = self.jobs.remove(job_id)?;
        self.retired.insert(job_id.to_string());
        self.pending.retain(|id| id != job_id);
        if let Some(active) = self.active.remove(job_id) {
            active.cancel.cancel();
        }
        self.unsaved_changes += 1;
        Some(job)
    }

    /// Remove every job resting in terminal `status`.
    pub(crate) fn clear_status(&mut self, status: JobStatus) -> Vec<String> {
        if !status.is_terminal() {
            return Vec::new();
        }
        let mut removed: Vec<String> = self
            .jobs
            .values()
            .filter(|job| job.status() == status)
            .map(|job| job.id().to_string())
            .collect();
        removed.sort();
        for id in &removed {
            self.jobs.remove(id);
            self.retired.insert(id.clone());
        }
        self.unsaved_changes += removed.len();
        removed
    }

    /// Fire the cancellation token of every run in flight, without touching
    /// job status.
    pub(crate) fn signal_active_runs(&self) -> usize {
        for active in self.active.values() {
            active.cancel.cancel();
        }
        self.active.len()
    }

    pub(crate) fn summary(&self) -> QueueSummary {
        QueueSummary::from_jobs(self.jobs.values())
    }

    /// Mean progress over all jobs, `0.0` when empty.
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn overall_progress(&self) -> f64 {
        if self.jobs.is_empty() {
            return 0.0;
        }
        let total: f64 = self.jobs.values().map(Job::progress).sum();
        total / self.jobs.len() as f64
    }

    pub(crate) fn unsaved_changes(&self) -> usize {
        self.unsaved_changes
    }

    /// Snapshot the table, resetting the change counter.
    ///
    /// Returns the snapshot generation and the changes it covers.
    pub(crate) fn take_snapshot(&mut self, now: DateTime<Utc>) -> (u64, usize, QueueSnapshot) {
        self.generation += 1;
        let covered = std::mem::take(&mut self.unsaved_changes);
        let snapshot = QueueSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: now,
            jobs: self
                .jobs
                .iter()
                .map(|(id, job)| (id.clone(), job.clone()))
                .collect(),
            pending_order: self.pending.iter().cloned().collect(),
            retired_ids: self.retired.iter().cloned().collect(),
        };
        (self.generation, covered, snapshot)
    }

    /// Give back changes a failed checkpoint did not persist.
    pub(crate) fn restore_unsaved(&mut self, changes: usize) {
        self.unsaved_changes += changes;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};
    use std::time::Duration;

    use chrono::{TimeDelta, TimeZone, Utc};
    use serde_json::Map;

    use super::{JobTable, RetryRules};
    use crate::config::{RequeuePolicy, RetryBackoff};
    use crate::job::{Job, JobError, JobResult, JobStatus};
    use crate::manager::events::JobEventKind;
    use crate::manager::persistence::{QueueSnapshot, SNAPSHOT_VERSION};

    fn job_at(id: &str, offset_secs: i64) -> Job {
        let created = Utc
            .with_ymd_and_hms(2024, 5, 1, 10, 0, 0)
            .single()
            .expect("valid timestamp")
            + TimeDelta::seconds(offset_secs);
        let mut value = serde_json::to_value(Job::with_id(id, "render", format!("{id}.stl")))
            .expect("serialize job");
        value["created_at"] = serde_json::to_value(created).expect("serialize timestamp");
        serde_json::from_value(value).expect("deserialize job")
    }

    fn order(table: &JobTable) -> Vec<&str> {
        table.pending_order().collect()
    }

    #[test]
    fn pending_queue_orders_by_creation_then_id() {
        let mut table = JobTable::default();
        assert!(table.insert_pending(job_at("b", 10)));
        assert!(table.insert_pending(job_at("c", 20)));
        assert!(table.insert_pending(job_at("a", 10)));
        assert!(table.insert_pending(job_at("z", 0)));
        assert!(!table.insert_pending(job_at("a", 99)));
        assert_eq!(order(&table), vec!["z", "a", "b", "c"]);
        assert_eq!(table.unsaved_changes(), 4);
    }

    #[test]
    fn stale_runs_cannot_settle_or_report() {
        let mut table = JobTable::default();
        table.insert_pending(job_at("a", 0));
        let claim = table.claim_next(Utc::now()).expect("claim a");
        assert_eq!(table.cancel("a", Utc::now()), Some(JobStatus::Running));
        assert!(claim.cancel.is_cancelled());

        assert_eq!(table.record_progress("a", claim.run_id, 0.5, "late"), None);
        let late = JobResult::success("a", Map::new());
        assert_eq!(
            table.settle("a", claim.run_id, late, Utc::now(), RetryRules::default()),
            None
        );
        assert_eq!(
            table.get("a").map(Job::status),
            Some(JobStatus::Cancelled)
        );
    }

    #[test]
    fn retried_job_follows_requeue_policy() {
        for (policy, expected) in [
            (RequeuePolicy::Tail, vec!["b", "a"]),
            (RequeuePolicy::Head, vec!["a", "b"]),
        ] {
            let mut table = JobTable::default();
            table.insert_pending(job_at("a", 0));
            table.insert_pending(job_at("b", 1));
            let claim = table.claim_next(Utc::now()).expect("claim a");
            let failure = JobResult::failure("a", JobError::new("BOOM", "bad mesh"));
            let rules = RetryRules {
                policy,
                ..RetryRules::default()
            };
            let settled = table
                .settle("a", claim.run_id, failure, Utc::now(), rules)
                .expect("current run settles");
            assert_eq!(settled.kind, JobEventKind::Retrying { attempt: 1 });
            assert_eq!(settled.retry_after, None);
            assert_eq!(order(&table), expected);
        }
    }

    #[test]
    fn backed_off_retry_waits_outside_the_queue() {
        let mut table = JobTable::default();
        table.insert_pending(job_at("a", 0));
        table.insert_pending(job_at("b", 1));
        let claim = table.claim_next(Utc::now()).expect("claim a");
        let rules = RetryRules {
            policy: RequeuePolicy::Tail,
            backoff: RetryBackoff {
                base: Duration::from_secs(2),
                max: Duration::from_secs(60),
            },
        };
        let failure = JobResult::failure("a", JobError::new("BOOM", "bad mesh"));
        let settled = table
            .settle("a", claim.run_id, failure, Utc::now(), rules)
            .expect("current run settles");
        assert_eq!(settled.retry_after, Some(Duration::from_secs(2)));
        assert_eq!(order(&table), vec!["b"]);
        assert_eq!(table.get("a").map(Job::status), Some(JobStatus::Pending));

        assert!(table.requeue("a", RequeuePolicy::Tail));
        assert!(!table.requeue("a", RequeuePolicy::Tail));
        assert_eq!(order(&table), vec!["b", "a"]);

        let errors = table.stats().errors();
        assert_eq!(errors.retried, 1);
        assert_eq!(errors.by_code.get("BOOM"), Some(&1));
    }

    #[test]
    fn cancelled_retry_is_not_requeued() {
        let mut table = JobTable::default();
        table.insert_pending(job_at("a", 0));
        let claim = table.claim_next(Utc::now()).expect("claim a");
        let rules = RetryRules {
            backoff: RetryBackoff {
                base: Duration::from_secs(1),
                max: Duration::from_secs(1),
            },
            ..RetryRules::default()
        };
        let failure = JobResult::failure("a", JobError::new("BOOM", "bad mesh"));
        table.settle("a", claim.run_id, failure, Utc::now(), rules);
        assert_eq!(table.cancel("a", Utc::now()), Some(JobStatus::Pending));
        assert!(!table.requeue("a", RequeuePolicy::Tail));
        assert!(order(&table).is_empty());
    }

    #[test]
    fn removed_ids_are_retired_and_persisted() {
        let mut table = JobTable::default();
        table.insert_pending(job_at("a", 0));
        table.insert_pending(job_at("b", 1));
        table.cancel("b", Utc::now());
        assert!(table.remove("a").is_some());
        assert_eq!(table.clear_status(JobStatus::Cancelled), vec!["b".to_string()]);

        assert!(!table.insert_pending(job_at("a", 5)));
        assert!(!table.insert_pending(job_at("b", 5)));
        assert!(table.is_known("a"));

        let (_, _, snapshot) = table.take_snapshot(Utc::now());
        assert_eq!(
            snapshot.retired_ids,
            BTreeSet::from(["a".to_string(), "b".to_string()])
        );
        let (mut restored, _) = JobTable::restore(snapshot);
        assert!(!restored.insert_pending(job_at("a", 9)));
        assert!(restored.insert_pending(job_at("c", 9)));
    }

    #[test]
    fn restore_puts_interrupted_runs_first() {
        let mut table = JobTable::default();
        for (id, offset) in [("a", 0), ("b", 1), ("c", 2), ("d", 3)] {
            table.insert_pending(job_at(id, offset));
        }
        table.claim_next(Utc::now()).expect("claim a");
        let (_, covered, snapshot) = table.take_snapshot(Utc::now());
        assert_eq!(covered, 4);
        assert_eq!(table.unsaved_changes(), 0);

        let mut jobs = snapshot.jobs.clone();
        // An id absent from the saved order still gets queued, by key.
        jobs.insert("e".to_string(), job_at("e", -5));
        let snapshot = QueueSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: snapshot.saved_at,
            jobs,
            pending_order: vec!["d".to_string(), "b".to_string(), "c".to_string()],
            retired_ids: BTreeSet::new(),
        };

        let (restored, recovered) = JobTable::restore(snapshot);
        assert_eq!(recovered, 1);
        assert_eq!(order(&restored), vec!["a", "d", "b", "c", "e"]);
        let a = restored.get("a").expect("a restored");
        assert_eq!(a.status(), JobStatus::Pending);
        assert!(a.started_at().is_none());
    }

    #[test]
    fn clear_status_ignores_live_statuses() {
        let mut table = JobTable::default();
        table.insert_pending(job_at("a", 0));
        table.insert_pending(job_at("b", 1));
        table.cancel("b", Utc::now());
        assert!(table.clear_status(JobStatus::Pending).is_empty());
        assert_eq!(table.clear_status(JobStatus::Cancelled), vec!["b".to_string()]);
        assert_eq!(table.summary().total_jobs, 1);

        let empty = JobTable::restore(QueueSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            jobs: BTreeMap::new(),
            pending_order: Vec::new(),
            retired_ids: BTreeSet::new(),
        });
        assert_eq!(empty.1, 0);
        assert!(empty.0.overall_progress().abs() < f64::EPSILON);
    }
}
