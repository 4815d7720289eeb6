//! Fail-fast iteration for side-effecting, all-or-nothing work.

use super::config::PoolConfig;
use super::outcome::TaskError;
use super::pool::{guarded, run_queue};
use crate::context::Context;
use std::convert::Infallible;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Runs `op` over `inputs` with bounded concurrency and returns the first failure observed.
///
/// The first error (or panic) cancels a context derived from `ctx`, so inputs that have not
/// started yet never run. Operations already in flight see the cancellation through the
/// `Context` they were given. `ctx` itself is never canceled here.
///
/// Returns `Ok(())` only when every input ran and succeeded. If `ctx` ends first and no
/// operation failed, the context error is returned instead.
pub async fn execute<T, E, F, Fut>(
    ctx: &Context,
    inputs: Vec<T>,
    op: F,
    config: &PoolConfig,
) -> Result<(), TaskError<E>>
where
    T: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
    F: Fn(Context, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
{
    let scope = ctx.child();
    let first: Arc<Mutex<Option<TaskError<E>>>> = Arc::new(Mutex::new(None));
    let op = Arc::new(op);

    let tracked = {
        let scope = scope.clone();
        let first = Arc::clone(&first);
        move |item_ctx: Context, item: T| {
            let op = Arc::clone(&op);
            let scope = scope.clone();
            let first = Arc::clone(&first);
            async move {
                if let Err(err) = guarded(async move { op(item_ctx, item).await }).await {
                    let mut slot = first.lock().unwrap_or_else(PoisonError::into_inner);
                    if slot.is_none() {
                        *slot = Some(err);
                    }
                    drop(slot);
                    scope.cancel();
                }
                Ok::<(), TaskError<Infallible>>(())
            }
        }
    };

    let results = run_queue(&scope, inputs, tracked, config).await;

    let recorded = first
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    if let Some(err) = recorded {
        debug!(error_kind = kind(&err), "for_each stopped on first failure");
        return Err(err);
    }

    match results.into_iter().find_map(|r| r.outcome.err()) {
        Some(err) => Err(widen(err)),
        None => Ok(()),
    }
}

fn kind<E>(err: &TaskError<E>) -> &'static str {
    match err {
        TaskError::Item(_) => "item",
        TaskError::Panicked(_) => "panic",
        TaskError::Chunk(_) => "chunk",
        TaskError::Canceled | TaskError::DeadlineExceeded => "context",
    }
}

/// Engine-level errors of the tracking wrapper can only be context or bookkeeping errors.
fn widen<E>(err: TaskError<Infallible>) -> TaskError<E> {
    match err {
        TaskError::Canceled => TaskError::Canceled,
        TaskError::DeadlineExceeded => TaskError::DeadlineExceeded,
        TaskError::Panicked(msg) => TaskError::Panicked(msg),
        TaskError::Item(never) => match never {},
        TaskError::Chunk(shared) => match shared.as_ref() {
            super::outcome::ChunkError::Operation(never) => match *never {},
            super::outcome::ChunkError::SizeMismatch { expected, actual } => TaskError::Panicked(
                format!("unexpected chunk size mismatch ({} vs {})", expected, actual),
            ),
        },
    }
}
