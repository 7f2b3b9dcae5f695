use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::error::QueueError;

use super::JobManager;

impl JobManager {
    /// Start dispatching. Returns false when already running, after
    /// shutdown, or outside a tokio runtime.
    pub fn start_processing(&self) -> bool {
        self.engine.start(&self.book, &self.registry)
    }

    /// Stop claiming new jobs; jobs in flight run to completion. Processing
    /// can be started again.
    pub fn stop_processing(&self) -> bool {
        self.engine.stop()
    }

    /// Hold new dispatch while running. Jobs in flight continue.
    pub fn pause_processing(&self) -> bool {
        self.engine.pause()
    }

    /// Resume dispatch after a pause.
    pub fn resume_processing(&self) -> bool {
        let resumed = self.engine.resume();
        if resumed {
            self.book.wake();
        }
        resumed
    }

    /// Whether the dispatcher is running.
    pub fn is_processing(&self) -> bool {
        self.engine.is_running()
    }

    /// Whether dispatch is paused.
    pub fn is_paused(&self) -> bool {
        self.engine.is_paused()
    }

    /// Stop dispatch, wait up to `timeout` for jobs in flight, clean up every
    /// executor once, and persist the final state.
    ///
    /// Jobs still running when the wait expires stay `Running` on disk and
    /// are requeued by the next recovery. Calling this again only persists.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), QueueError> {
        let drained = self.engine.shutdown(timeout).await;
        if !drained {
            self.book.abandon_active_runs();
        }
        if !self.cleaned_up.swap(true, Ordering::AcqRel) {
            self.registry.cleanup_all();
            tracing::info!(drained, "job manager shut down");
        }
        self.book.checkpoint()
    }
}
