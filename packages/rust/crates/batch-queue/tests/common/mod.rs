#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use batch_queue::{
    FieldMap, Job, JobError, JobExecutor, JobManagerConfig, JobResult, ProgressReporter,
    async_trait,
};
use tokio::sync::Semaphore;

pub const WAIT: Duration = Duration::from_secs(5);

/// Poll `condition` every 10ms until it holds or `WAIT` elapses.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn test_config(state_dir: &Path, max_workers: usize) -> JobManagerConfig {
    JobManagerConfig {
        max_workers,
        job_timeout: Duration::from_secs(10),
        ..JobManagerConfig::default()
    }
    .with_state_dir(state_dir)
}

fn echo_data(job: &Job) -> FieldMap {
    let mut data = FieldMap::new();
    data.insert("input".to_string(), job.input_reference().into());
    data
}

/// Succeeds after `delay`, recording the order jobs ran in.
#[derive(Default)]
pub struct RecordingExecutor {
    pub delay: Duration,
    pub order: Mutex<Vec<String>>,
    /// Remaining scripted failures per job id.
    pub failures: Mutex<HashMap<String, u32>>,
    pub cleanups: AtomicUsize,
}

impl RecordingExecutor {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn fail_times(self, job_id: &str, times: u32) -> Self {
        self.failures
            .lock()
            .expect("failures lock")
            .insert(job_id.to_string(), times);
        self
    }

    pub fn order(&self) -> Vec<String> {
        self.order.lock().expect("order lock").clone()
    }
}

#[async_trait]
impl JobExecutor for RecordingExecutor {
    fn can_handle(&self, _job: &Job) -> bool {
        true
    }

    async fn execute(&self, job: Job, progress: ProgressReporter) -> JobResult {
        self.order
            .lock()
            .expect("order lock")
            .push(job.id().to_string());
        progress.report(0.5, "working");
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let fail = {
            let mut failures = self.failures.lock().expect("failures lock");
            match failures.get_mut(job.id()) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };
        if fail {
            return JobResult::failure(job.id(), JobError::new("SCRIPTED", "scripted failure"));
        }
        JobResult::success(job.id(), echo_data(&job))
    }

    fn cleanup(&self) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}

/// Always fails with `code`.
pub struct FailingExecutor {
    pub code: &'static str,
    pub calls: AtomicUsize,
}

impl FailingExecutor {
    pub fn new(code: &'static str) -> Self {
        Self {
            code,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl JobExecutor for FailingExecutor {
    fn can_handle(&self, _job: &Job) -> bool {
        true
    }

    async fn execute(&self, job: Job, _progress: ProgressReporter) -> JobResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        JobResult::failure(
            job.id(),
            JobError::new(self.code, "render failed").with_detail("input", job.input_reference()),
        )
    }
}

pub struct PanickingExecutor;

#[async_trait]
impl JobExecutor for PanickingExecutor {
    fn can_handle(&self, _job: &Job) -> bool {
        true
    }

    async fn execute(&self, _job: Job, _progress: ProgressReporter) -> JobResult {
        panic!("mesh decoder exploded");
    }
}

/// Returns a result for a different job id.
pub struct MismatchedExecutor;

#[async_trait]
impl JobExecutor for MismatchedExecutor {
    fn can_handle(&self, _job: &Job) -> bool {
        true
    }

    async fn execute(&self, _job: Job, _progress: ProgressReporter) -> JobResult {
        JobResult::success("someone-else", FieldMap::new())
    }
}

/// Never returns until its run is abandoned.
pub struct HangingExecutor;

#[async_trait]
impl JobExecutor for HangingExecutor {
    fn can_handle(&self, _job: &Job) -> bool {
        true
    }

    async fn execute(&self, job: Job, progress: ProgressReporter) -> JobResult {
        progress.cancelled().await;
        JobResult::failure(job.id(), JobError::new("STOPPED", "abandoned"))
    }
}

/// Holds its thread with `std::thread::sleep`, like a CPU-bound render.
pub struct BlockingExecutor {
    pub hold: Duration,
    pub finished: AtomicUsize,
}

impl BlockingExecutor {
    pub fn new(hold: Duration) -> Self {
        Self {
            hold,
            finished: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl JobExecutor for BlockingExecutor {
    fn can_handle(&self, _job: &Job) -> bool {
        true
    }

    async fn execute(&self, job: Job, _progress: ProgressReporter) -> JobResult {
        std::thread::sleep(self.hold);
        self.finished.fetch_add(1, Ordering::SeqCst);
        JobResult::success(job.id(), echo_data(&job))
    }
}

/// Refuses every job even though it is registered.
pub struct PickyExecutor;

#[async_trait]
impl JobExecutor for PickyExecutor {
    fn can_handle(&self, job: &Job) -> bool {
        job.input_reference().ends_with(".stl")
    }

    async fn execute(&self, job: Job, _progress: ProgressReporter) -> JobResult {
        JobResult::success(job.id(), echo_data(&job))
    }
}

/// Blocks each run until a permit is released, tracking peak concurrency.
/// Exits early when its run is cancelled.
pub struct GatedExecutor {
    pub gate: Arc<Semaphore>,
    pub running: AtomicUsize,
    pub peak: AtomicUsize,
    pub started: AtomicUsize,
    pub cancelled: AtomicUsize,
}

impl GatedExecutor {
    pub fn new() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(0)),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            started: AtomicUsize::new(0),
            cancelled: AtomicUsize::new(0),
        }
    }

    pub fn release(&self, runs: usize) {
        self.gate.add_permits(runs);
    }
}

#[async_trait]
impl JobExecutor for GatedExecutor {
    fn can_handle(&self, _job: &Job) -> bool {
        true
    }

    async fn execute(&self, job: Job, progress: ProgressReporter) -> JobResult {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_running, Ordering::SeqCst);

        let outcome = tokio::select! {
            permit = self.gate.acquire() => {
                if let Ok(permit) = permit {
                    permit.forget();
                }
                JobResult::success(job.id(), echo_data(&job))
            }
            () = progress.cancelled() => {
                self.cancelled.fetch_add(1, Ordering::SeqCst);
                JobResult::failure(job.id(), JobError::new("STOPPED", "stopped early"))
            }
        };
        self.running.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}
