//! Bounded worker pool.
//!
//! `min(workers, len(inputs))` tasks pull input indices from one bounded FIFO queue. The
//! inputs stay in a shared arena; only indices travel through the channel, which lets every
//! slot be accounted for even if a worker task dies.

use super::config::PoolConfig;
use super::outcome::{summarize, TaskError, TaskResult};
use crate::context::{Context, ContextError};
use crate::Result;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Runs `op` once per input across a bounded set of workers.
///
/// Always returns exactly `inputs.len()` results. In ordered mode `results[i].item` is
/// `inputs[i]`; in unordered mode results appear in completion order. Inputs still queued
/// when `ctx` ends resolve with the context error without invoking `op`. Operations already
/// running are only interrupted if they observe the `Context` they are handed.
pub async fn execute<T, R, E, F, Fut>(
    ctx: &Context,
    inputs: Vec<T>,
    op: F,
    config: &PoolConfig,
) -> Vec<TaskResult<T, R, E>>
where
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
    E: Send + Sync + 'static,
    F: Fn(Context, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
{
    let op = Arc::new(op);
    run_queue(
        ctx,
        inputs,
        move |ctx, item| {
            let op = Arc::clone(&op);
            guarded(async move { op(ctx, item).await })
        },
        config,
    )
    .await
}

/// Reusable handle around a validated [`PoolConfig`].
#[derive(Debug, Clone, Default)]
pub struct WorkerPool {
    config: PoolConfig,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Self {
        Self { config }
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self::new(PoolConfig::from_env()?))
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub async fn execute<T, R, E, F, Fut>(
        &self,
        ctx: &Context,
        inputs: Vec<T>,
        op: F,
    ) -> Vec<TaskResult<T, R, E>>
    where
        T: Clone + Send + Sync + 'static,
        R: Send + 'static,
        E: Send + Sync + 'static,
        F: Fn(Context, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    {
        execute(ctx, inputs, op, &self.config).await
    }

    /// See [`super::batch::execute`].
    pub async fn execute_batch<T, R, E, F, Fut>(
        &self,
        ctx: &Context,
        inputs: Vec<T>,
        chunk_size: usize,
        op: F,
    ) -> Result<Vec<TaskResult<T, R, E>>>
    where
        T: Clone + Send + Sync + 'static,
        R: Send + 'static,
        E: Send + Sync + 'static,
        F: Fn(Context, Vec<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Vec<R>, E>> + Send + 'static,
    {
        super::batch::execute(ctx, inputs, chunk_size, op, &self.config).await
    }

    /// See [`super::for_each::execute`].
    pub async fn for_each<T, E, F, Fut>(
        &self,
        ctx: &Context,
        inputs: Vec<T>,
        op: F,
    ) -> std::result::Result<(), TaskError<E>>
    where
        T: Clone + Send + Sync + 'static,
        E: Send + Sync + 'static,
        F: Fn(Context, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
    {
        super::for_each::execute(ctx, inputs, op, &self.config).await
    }
}

/// Await `fut`, turning an error into `TaskError::Item` and a panic into `TaskError::Panicked`.
///
/// Callers pass an `async move` block that creates the operation future, so panics raised
/// while building it are caught as well.
pub(crate) async fn guarded<R, E, Fut>(fut: Fut) -> std::result::Result<R, TaskError<E>>
where
    Fut: Future<Output = std::result::Result<R, E>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(TaskError::Item(err)),
        Err(payload) => Err(TaskError::Panicked(panic_message(payload))),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Where finished results land: ordered runs fill a pre-sized slot per input, unordered runs
/// append in completion order.
enum Sink<T, R, E> {
    Slots(Vec<Option<TaskResult<T, R, E>>>),
    Completed(Vec<TaskResult<T, R, E>>),
}

impl<T, R, E> Sink<T, R, E> {
    fn new(total: usize, ordered: bool) -> Self {
        if ordered {
            Sink::Slots(std::iter::repeat_with(|| None).take(total).collect())
        } else {
            Sink::Completed(Vec::with_capacity(total))
        }
    }

    fn put(&mut self, result: TaskResult<T, R, E>) {
        match self {
            Sink::Slots(slots) => {
                let index = result.index;
                slots[index] = Some(result);
            }
            Sink::Completed(results) => results.push(result),
        }
    }

    /// Every input gets exactly one result; slots nobody reported are back-filled.
    fn finish(self, arena: &[T]) -> Vec<TaskResult<T, R, E>>
    where
        T: Clone,
    {
        match self {
            Sink::Slots(slots) => slots
                .into_iter()
                .enumerate()
                .map(|(index, slot)| slot.unwrap_or_else(|| lost_result(arena, index)))
                .collect(),
            Sink::Completed(mut results) => {
                if results.len() < arena.len() {
                    let mut seen = vec![false; arena.len()];
                    for r in &results {
                        seen[r.index] = true;
                    }
                    for (index, _) in seen.iter().enumerate().filter(|(_, s)| !**s) {
                        results.push(lost_result(arena, index));
                    }
                }
                results
            }
        }
    }
}

type SharedSink<T, R, E> = Arc<Mutex<Sink<T, R, E>>>;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The dispatch engine shared by the executor, batch and for-each.
///
/// `op` already maps its failures into `TaskError`; the engine only adds context errors for
/// inputs that never reached a worker.
pub(crate) async fn run_queue<T, R, E, F, Fut>(
    ctx: &Context,
    inputs: Vec<T>,
    op: F,
    config: &PoolConfig,
) -> Vec<TaskResult<T, R, E>>
where
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
    E: Send + Sync + 'static,
    F: Fn(Context, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<R, TaskError<E>>> + Send + 'static,
{
    let total = inputs.len();
    if total == 0 {
        return Vec::new();
    }

    let run_id = Uuid::new_v4();
    let started = Instant::now();
    let workers = config.workers().min(total);
    debug!(
        %run_id,
        workers,
        inputs = total,
        ordered = config.is_ordered(),
        "worker pool started"
    );

    let arena: Arc<[T]> = inputs.into();
    let op = Arc::new(op);
    let (tx, rx) = mpsc::channel::<usize>(config.queue_capacity(total));
    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    let sink: SharedSink<T, R, E> = Arc::new(Mutex::new(Sink::new(total, config.is_ordered())));

    let handles: Vec<_> = (0..workers)
        .map(|_| {
            tokio::spawn(worker(
                ctx.clone(),
                Arc::clone(&arena),
                Arc::clone(&rx),
                Arc::clone(&op),
                Arc::clone(&sink),
            ))
        })
        .collect();

    let mut undispatched = Vec::new();
    for index in 0..total {
        if let Some(reason) = ctx.err() {
            undispatched.push(context_result(&arena, index, reason));
            continue;
        }
        tokio::select! {
            biased;
            _ = ctx.done() => {
                let reason = ctx.err().unwrap_or(ContextError::Canceled);
                undispatched.push(context_result(&arena, index, reason));
            }
            sent = tx.send(index) => {
                if sent.is_err() {
                    // Every worker is gone; the slot is back-filled below.
                    break;
                }
            }
        }
    }
    drop(tx);

    for joined in futures::future::join_all(handles).await {
        if let Err(err) = joined {
            warn!(%run_id, error = %err, "worker task terminated abnormally");
        }
    }

    let results = {
        let mut sink = lock(&sink);
        for result in undispatched {
            sink.put(result);
        }
        std::mem::replace(&mut *sink, Sink::Completed(Vec::new())).finish(&arena)
    };

    let summary = summarize(&results);
    debug!(
        %run_id,
        elapsed_ms = started.elapsed().as_millis() as u64,
        succeeded = summary.succeeded,
        failed = summary.failed,
        canceled = summary.canceled,
        "worker pool finished"
    );
    results
}

async fn worker<T, R, E, F, Fut>(
    ctx: Context,
    arena: Arc<[T]>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<usize>>>,
    op: Arc<F>,
    sink: SharedSink<T, R, E>,
) where
    T: Clone,
    F: Fn(Context, T) -> Fut,
    Fut: Future<Output = std::result::Result<R, TaskError<E>>>,
{
    loop {
        let next = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(index) = next else { break };

        let item = arena[index].clone();
        let outcome = match ctx.err() {
            Some(reason) => Err(reason.into()),
            None => op(ctx.clone(), item.clone()).await,
        };
        lock(&sink).put(TaskResult {
            index,
            item,
            outcome,
        });
    }
}

fn context_result<T: Clone, R, E>(
    arena: &[T],
    index: usize,
    reason: ContextError,
) -> TaskResult<T, R, E> {
    TaskResult {
        index,
        item: arena[index].clone(),
        outcome: Err(reason.into()),
    }
}

fn lost_result<T: Clone, R, E>(arena: &[T], index: usize) -> TaskResult<T, R, E> {
    TaskResult {
        index,
        item: arena[index].clone(),
        outcome: Err(TaskError::Panicked(
            "worker task terminated before reporting".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_empty_input_returns_empty() {
        let results: Vec<TaskResult<u32, u32, String>> = execute(
            &Context::new(),
            Vec::new(),
            |_ctx, n: u32| async move { Ok(n) },
            &PoolConfig::default(),
        )
        .await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_failures_stay_per_item() {
        let results = execute(
            &Context::new(),
            vec![1u32, 2, 3, 4],
            |_ctx, n: u32| async move {
                if n % 2 == 0 {
                    Err(format!("even {}", n))
                } else {
                    Ok(n * 10)
                }
            },
            &PoolConfig::default(),
        )
        .await;
        assert_eq!(results.len(), 4);
        assert_eq!(results[0].value(), Some(&10));
        assert_eq!(
            results[1].error().and_then(|e| e.item_error()).map(String::as_str),
            Some("even 2")
        );
        assert_eq!(results[2].value(), Some(&30));
    }

    #[tokio::test]
    async fn test_panic_is_isolated_to_its_item() {
        let results = execute(
            &Context::new(),
            vec![1u32, 2, 3],
            |_ctx, n: u32| async move {
                if n == 2 {
                    panic!("bad item {}", n);
                }
                Ok::<_, String>(n)
            },
            &PoolConfig::builder().with_workers(1).build().unwrap(),
        )
        .await;
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        match results[1].error() {
            Some(TaskError::Panicked(msg)) => assert!(msg.contains("bad item 2")),
            other => panic!("expected panic outcome, got {:?}", other),
        }
        assert!(results[2].is_ok());
    }

    #[tokio::test]
    async fn test_small_buffer_does_not_lose_items() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let config = PoolConfig::builder()
            .with_workers(2)
            .with_buffer_size(0)
            .build()
            .unwrap();
        let results = execute(
            &Context::new(),
            (0..25u32).collect(),
            move |_ctx, n: u32| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    Ok::<_, String>(n)
                }
            },
            &config,
        )
        .await;
        assert_eq!(results.len(), 25);
        assert_eq!(calls.load(Ordering::SeqCst), 25);
        for (i, r) in results.iter().enumerate() {
            assert_eq!(r.index, i);
            assert_eq!(r.value(), Some(&(i as u32)));
        }
    }

    #[tokio::test]
    async fn test_worker_pool_handle_reuses_config() {
        let pool = WorkerPool::new(PoolConfig::builder().with_workers(2).build().unwrap());
        assert_eq!(pool.config().workers(), 2);
        let results = pool
            .execute(&Context::new(), vec!["a", "b"], |_ctx, s: &'static str| async move {
                Ok::<_, String>(s.len())
            })
            .await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.value() == Some(&1)));
    }
}
