use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::job::DEFAULT_MAX_RETRIES;

use super::settings::{QueueSettings, absolutize, data_home, project_root};

/// Where a failed job rejoins the pending queue when it has retries left.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequeuePolicy {
    /// Behind every job already waiting.
    #[default]
    Tail,
    /// Ahead of every job already waiting.
    Head,
}

/// Exponential delay before a failed job becomes eligible again.
///
/// Attempt `n` (the retry count after the failure) waits `base * 2^(n-1)`,
/// capped at `max`. A zero `base` requeues at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBackoff {
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound for any single delay.
    pub max: Duration,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self {
            base: Duration::ZERO,
            max: Duration::from_secs(300),
        }
    }
}

impl RetryBackoff {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.base.is_zero() {
            return Duration::ZERO;
        }
        let factor = 2u32.checked_pow(attempt.saturating_sub(1));
        factor
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

/// Immutable configuration for one [`crate::JobManager`].
#[derive(Debug, Clone, PartialEq)]
pub struct JobManagerConfig {
    /// Worker pool size.
    pub max_workers: usize,
    /// Job changes between automatic checkpoints.
    pub checkpoint_interval: usize,
    /// Per-job execution deadline.
    pub job_timeout: Duration,
    /// Directory holding `queue_state.json`.
    pub state_dir: PathBuf,
    /// Checkpoint automatically every `checkpoint_interval` changes.
    pub auto_save: bool,
    /// Reload persisted state at construction.
    pub enable_recovery: bool,
    /// Retry budget for jobs built by [`crate::JobManager::create_job`].
    pub default_max_retries: u32,
    /// Where retried jobs rejoin the queue.
    pub requeue_policy: RequeuePolicy,
    /// Wait before a failed job is requeued.
    pub retry_backoff: RetryBackoff,
    /// Buffer of the lifecycle event channel.
    pub event_capacity: usize,
}

impl Default for JobManagerConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            checkpoint_interval: 5,
            job_timeout: Duration::from_secs(3600),
            state_dir: default_state_dir(),
            auto_save: true,
            enable_recovery: true,
            default_max_retries: DEFAULT_MAX_RETRIES,
            requeue_policy: RequeuePolicy::Tail,
            retry_backoff: RetryBackoff::default(),
            event_capacity: 256,
        }
    }
}

impl JobManagerConfig {
    /// Resolve settings over the defaults.
    pub fn from_settings(settings: &QueueSettings) -> Self {
        let defaults = Self::default();
        let queue = &settings.queue;
        let job_timeout = seconds(queue.job_timeout_secs).unwrap_or(defaults.job_timeout);
        let retry_backoff = RetryBackoff {
            base: seconds(queue.retry_backoff_secs).unwrap_or(defaults.retry_backoff.base),
            max: seconds(queue.retry_backoff_max_secs).unwrap_or(defaults.retry_backoff.max),
        };
        Self {
            max_workers: queue.max_workers.unwrap_or(defaults.max_workers),
            checkpoint_interval: queue
                .checkpoint_interval
                .unwrap_or(defaults.checkpoint_interval),
            job_timeout,
            state_dir: queue
                .state_dir
                .as_ref()
                .map_or(defaults.state_dir, |dir| {
                    absolutize(&project_root(), PathBuf::from(dir))
                }),
            auto_save: queue.auto_save.unwrap_or(defaults.auto_save),
            enable_recovery: queue.enable_recovery.unwrap_or(defaults.enable_recovery),
            default_max_retries: queue
                .default_max_retries
                .unwrap_or(defaults.default_max_retries),
            requeue_policy: queue.requeue_policy.unwrap_or(defaults.requeue_policy),
            retry_backoff,
            event_capacity: queue.event_capacity.unwrap_or(defaults.event_capacity),
        }
        .normalized()
    }

    /// Same config, checkpointing to `state_dir`.
    #[must_use]
    pub fn with_state_dir(mut self, state_dir: impl Into<PathBuf>) -> Self {
        self.state_dir = state_dir.into();
        self
    }

    /// Clamp values that would stall the queue.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.max_workers = self.max_workers.max(1);
        self.checkpoint_interval = self.checkpoint_interval.max(1);
        self.event_capacity = self.event_capacity.max(1);
        self
    }
}

fn seconds(value: Option<f64>) -> Option<Duration> {
    value.and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

/// `<PRJ_DATA_HOME>/batch-queue/queue_state`.
pub fn default_state_dir() -> PathBuf {
    data_home().join("batch-queue").join("queue_state")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::RetryBackoff;

    #[test]
    fn backoff_doubles_per_attempt_up_to_the_cap() {
        let backoff = RetryBackoff {
            base: Duration::from_millis(100),
            max: Duration::from_millis(350),
        };
        assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(350));
        assert_eq!(backoff.delay_for(40), Duration::from_millis(350));
    }

    #[test]
    fn zero_base_means_no_delay() {
        assert_eq!(RetryBackoff::default().delay_for(5), Duration::ZERO);
    }
}
