use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::executor::ExecutorRegistry;
use crate::manager::book::JobBook;

use super::worker::run_claim;

pub(super) struct DispatchContext {
    pub(super) book: Arc<JobBook>,
    pub(super) registry: Arc<ExecutorRegistry>,
    pub(super) slots: Arc<Semaphore>,
    pub(super) paused: Arc<AtomicBool>,
    pub(super) stop: CancellationToken,
    pub(super) job_timeout: Duration,
}

/// Claim jobs while a worker slot is free, until `stop` fires. Workers already
/// running are drained before returning.
pub(super) async fn dispatch_loop(ctx: DispatchContext) {
    let mut workers = JoinSet::new();

    loop {
        let permit = tokio::select! {
            biased;
            () = ctx.stop.cancelled() => break,
            permit = Arc::clone(&ctx.slots).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let claim = loop {
            if ctx.stop.is_cancelled() {
                break None;
            }
            if !ctx.paused.load(Ordering::Acquire)
                && let Some(claim) = ctx.book.claim_next()
            {
                break Some(claim);
            }
            tokio::select! {
                biased;
                () = ctx.stop.cancelled() => break None,
                () = ctx.book.wait_for_work() => {}
            }
        };
        let Some(claim) = claim else {
            break;
        };

        let book = Arc::clone(&ctx.book);
        let registry = Arc::clone(&ctx.registry);
        let job_timeout = ctx.job_timeout;
        workers.spawn(async move {
            let _permit = permit;
            run_claim(book, registry, claim, job_timeout).await;
        });

        while let Some(result) = workers.try_join_next() {
            if let Err(error) = result {
                tracing::error!("job worker crashed: {error}");
            }
        }
    }

    while let Some(result) = workers.join_next().await {
        if let Err(error) = result {
            tracing::error!("job worker crashed: {error}");
        }
    }
    tracing::debug!("job dispatcher stopped");
}
