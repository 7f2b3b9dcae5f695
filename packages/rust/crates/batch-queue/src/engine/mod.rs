//! Execution engine: a bounded worker pool fed by one dispatcher task.

mod dispatch;
mod worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::executor::ExecutorRegistry;
use crate::manager::book::JobBook;

use dispatch::{DispatchContext, dispatch_loop};

#[derive(Default)]
struct EngineState {
    stop: Option<CancellationToken>,
    dispatchers: Vec<JoinHandle<()>>,
    closed: bool,
}

/// Worker slots are shared across stop/start cycles, so a restarted
/// dispatcher never exceeds `max_workers` while the previous one drains.
pub(crate) struct ExecutionEngine {
    max_workers: usize,
    job_timeout: Duration,
    slots: Arc<Semaphore>,
    paused: Arc<AtomicBool>,
    state: Mutex<EngineState>,
}

impl ExecutionEngine {
    pub(crate) fn new(max_workers: usize, job_timeout: Duration) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            max_workers,
            job_timeout,
            slots: Arc::new(Semaphore::new(max_workers)),
            paused: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(EngineState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.lock().stop.is_some()
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Spawn the dispatcher on the current tokio runtime.
    pub(crate) fn start(&self, book: &Arc<JobBook>, registry: &Arc<ExecutorRegistry>) -> bool {
        let mut state = self.lock();
        if state.closed || state.stop.is_some() {
            return false;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("start_processing called outside a tokio runtime; ignoring");
            return false;
        };
        let stop = CancellationToken::new();
        let ctx = DispatchContext {
            book: Arc::clone(book),
            registry: Arc::clone(registry),
            slots: Arc::clone(&self.slots),
            paused: Arc::clone(&self.paused),
            stop: stop.clone(),
            job_timeout: self.job_timeout,
        };
        state.dispatchers.retain(|handle| !handle.is_finished());
        state.dispatchers.push(runtime.spawn(dispatch_loop(ctx)));
        state.stop = Some(stop);
        tracing::info!(
            max_workers = self.max_workers,
            job_timeout_secs = self.job_timeout.as_secs_f64(),
            "job processing started"
        );
        true
    }

    /// Stop claiming new jobs. Jobs in flight keep running.
    pub(crate) fn stop(&self) -> bool {
        let Some(stop) = self.lock().stop.take() else {
            return false;
        };
        stop.cancel();
        tracing::info!("job processing stopped");
        true
    }

    pub(crate) fn pause(&self) -> bool {
        if !self.is_running() || self.paused.swap(true, Ordering::AcqRel) {
            return false;
        }
        tracing::info!("job processing paused");
        true
    }

    /// The caller wakes the dispatcher afterwards.
    pub(crate) fn resume(&self) -> bool {
        if !self.is_running() || !self.paused.swap(false, Ordering::AcqRel) {
            return false;
        }
        tracing::info!("job processing resumed");
        true
    }

    /// Stop for good and wait up to `timeout` for dispatchers to drain.
    /// Returns false when the wait expired and stragglers were abandoned.
    pub(crate) async fn shutdown(&self, timeout: Duration) -> bool {
        let (stop, mut dispatchers) = {
            let mut state = self.lock();
            state.closed = true;
            (state.stop.take(), std::mem::take(&mut state.dispatchers))
        };
        if let Some(stop) = stop {
            stop.cancel();
        }

        let drained = tokio::time::timeout(timeout, async {
            for handle in &mut dispatchers {
                if let Err(error) = handle.await
                    && error.is_panic()
                {
                    tracing::error!("job dispatcher panicked: {error}");
                }
            }
        })
        .await
        .is_ok();

        if !drained {
            for handle in &dispatchers {
                handle.abort();
            }
        }
        drained
    }
}
