use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use crate::executor::{ExecutorRegistry, ProgressReporter, ProgressSink};
use crate::job::{JobError, JobResult, codes};
use crate::manager::book::JobBook;
use crate::manager::table::Claim;

/// Run one claimed job to an outcome and commit it.
///
/// The executor runs on a blocking-pool thread, so a render that holds its
/// thread cannot starve the timeout below. This worker stops waiting on it
/// when the run is cancelled or the timeout expires; the thread is left to
/// finish on its own.
pub(super) async fn run_claim(
    book: Arc<JobBook>,
    registry: Arc<ExecutorRegistry>,
    claim: Claim,
    job_timeout: Duration,
) {
    let Claim {
        job,
        run_id,
        cancel,
    } = claim;
    let job_id = job.id().to_string();

    let executor = match registry.resolve(&job) {
        Ok(executor) => executor,
        Err(error) => {
            let failure = JobError::new(codes::NO_EXECUTOR, error.to_string())
                .with_detail("job_type", job.job_type());
            let result = JobResult::failure(&job_id, failure);
            commit(book, job_id, run_id, result).await;
            return;
        }
    };

    let sink: Arc<dyn ProgressSink> = book.clone();
    let reporter = ProgressReporter::new(&job_id, run_id, sink, cancel.clone());
    let runtime = tokio::runtime::Handle::current();
    let mut handle = tokio::task::spawn_blocking(move || {
        runtime.block_on(async move { executor.execute(job, reporter).await })
    });

    let result = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            tracing::debug!(job_id = %job_id, run_id, "stopped waiting on cancelled job");
            return;
        }
        outcome = tokio::time::timeout(job_timeout, &mut handle) => match outcome {
            Ok(Ok(result)) => match result.validate_for(&job_id) {
                Ok(()) => result,
                Err(reason) => fault(&job_id, format!("malformed executor result: {reason}")),
            },
            Ok(Err(error)) if error.is_panic() => {
                let message = panic_message(&*error.into_panic());
                fault(&job_id, format!("executor panicked: {message}"))
            }
            Ok(Err(error)) => fault(&job_id, format!("executor thread failed: {error}")),
            Err(_) => {
                cancel.cancel();
                let failure = JobError::new(
                    codes::TIMEOUT,
                    format!("job timed out after {:.3}s", job_timeout.as_secs_f64()),
                )
                .with_detail("timeout_secs", job_timeout.as_secs_f64());
                JobResult::failure(&job_id, failure)
            }
        },
    };
    commit(book, job_id, run_id, result).await;
}

/// Commits may write a checkpoint, so they run on the blocking pool too.
async fn commit(book: Arc<JobBook>, job_id: String, run_id: u64, result: JobResult) {
    let committed =
        tokio::task::spawn_blocking(move || book.commit(&job_id, run_id, result)).await;
    if let Err(error) = committed {
        tracing::error!("job commit failed: {error}");
    }
}

fn fault(job_id: &str, message: String) -> JobResult {
    JobResult::failure(job_id, JobError::new(codes::EXECUTOR_FAULT, message))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
