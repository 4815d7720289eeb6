//! Chunked execution: one operation call per contiguous chunk of inputs.

use super::config::PoolConfig;
use super::outcome::{ChunkError, TaskError, TaskResult};
use super::pool::{guarded, run_queue};
use crate::context::Context;
use crate::{Error, Result};
use std::future::Future;
use std::sync::Arc;

/// Splits `inputs` into chunks of `chunk_size` and runs `op` once per chunk, with at most
/// `config.workers()` chunks in flight.
///
/// Results come back per input item and in input order. When a chunk succeeds, item `i` of
/// the chunk gets `values[i]`. When it fails, or `op` returns a different number of values
/// than it was given, every item of the chunk carries the same `TaskError::Chunk`.
///
/// `chunk_size == 0` is rejected before anything runs.
pub async fn execute<T, R, E, F, Fut>(
    ctx: &Context,
    inputs: Vec<T>,
    chunk_size: usize,
    op: F,
    config: &PoolConfig,
) -> Result<Vec<TaskResult<T, R, E>>>
where
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
    E: Send + Sync + 'static,
    F: Fn(Context, Vec<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Vec<R>, E>> + Send + 'static,
{
    if chunk_size == 0 {
        return Err(Error::invalid_option(
            "chunk size must be at least 1",
            "batch.chunk_size",
            "batch",
            chunk_size,
        ));
    }

    let total = inputs.len();
    let chunks = partition(inputs, chunk_size);
    let op = Arc::new(op);
    let chunk_op = move |ctx: Context, chunk: Vec<T>| {
        let op = Arc::clone(&op);
        async move {
            let expected = chunk.len();
            let values = match guarded(async move { op(ctx, chunk).await }).await {
                Ok(values) => values,
                Err(err) => return Err(err),
            };
            if values.len() != expected {
                return Err(TaskError::Chunk(Arc::new(ChunkError::SizeMismatch {
                    expected,
                    actual: values.len(),
                })));
            }
            Ok(values)
        }
    };

    // Output order follows input order no matter how the caller configured the pool.
    let chunk_results = run_queue(ctx, chunks, chunk_op, &config.with_ordering(true)).await;

    let mut results = Vec::with_capacity(total);
    for chunk in chunk_results {
        let base = chunk.index * chunk_size;
        let items = chunk.item.into_iter().enumerate();
        match chunk.outcome {
            Ok(values) => {
                for ((offset, item), value) in items.zip(values) {
                    results.push(TaskResult {
                        index: base + offset,
                        item,
                        outcome: Ok(value),
                    });
                }
            }
            Err(err) => {
                let fate = ChunkFate::from(err);
                for (offset, item) in items {
                    results.push(TaskResult {
                        index: base + offset,
                        item,
                        outcome: Err(fate.item_error()),
                    });
                }
            }
        }
    }
    Ok(results)
}

fn partition<T>(inputs: Vec<T>, chunk_size: usize) -> Vec<Vec<T>> {
    let mut chunks = Vec::with_capacity(inputs.len().div_ceil(chunk_size));
    let mut current = Vec::with_capacity(chunk_size);
    for item in inputs {
        current.push(item);
        if current.len() == chunk_size {
            chunks.push(std::mem::replace(&mut current, Vec::with_capacity(chunk_size)));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// A chunk-level failure, normalized so it can be handed to every item of the chunk.
enum ChunkFate<E> {
    Failed(Arc<ChunkError<E>>),
    Context(TaskError<E>),
    Panicked(String),
}

impl<E> From<TaskError<E>> for ChunkFate<E> {
    fn from(err: TaskError<E>) -> Self {
        match err {
            TaskError::Item(e) => ChunkFate::Failed(Arc::new(ChunkError::Operation(e))),
            TaskError::Chunk(shared) => ChunkFate::Failed(shared),
            TaskError::Panicked(msg) => ChunkFate::Panicked(msg),
            other => ChunkFate::Context(other),
        }
    }
}

impl<E> ChunkFate<E> {
    fn item_error(&self) -> TaskError<E> {
        match self {
            ChunkFate::Failed(shared) => TaskError::Chunk(Arc::clone(shared)),
            ChunkFate::Context(TaskError::DeadlineExceeded) => TaskError::DeadlineExceeded,
            ChunkFate::Context(_) => TaskError::Canceled,
            ChunkFate::Panicked(msg) => TaskError::Panicked(msg.clone()),
        }
    }
}
