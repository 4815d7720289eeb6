//! Per-item outcomes of executor, batch and for-each invocations.

use crate::context::ContextError;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Why a single input did not produce a value.
#[derive(Debug, Error)]
pub enum TaskError<E> {
    /// The governing context was canceled before the item was dispatched.
    #[error("context canceled")]
    Canceled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// The operation returned an error for this item.
    #[error(transparent)]
    Item(E),

    /// The chunk containing this item failed. Every item of that chunk shares the same `Arc`.
    #[error("chunk failed: {0}")]
    Chunk(#[source] Arc<ChunkError<E>>),

    #[error("operation panicked: {0}")]
    Panicked(String),
}

impl<E> TaskError<E> {
    /// True for both cancellation and an elapsed deadline.
    pub fn is_canceled(&self) -> bool {
        matches!(self, TaskError::Canceled | TaskError::DeadlineExceeded)
    }

    pub fn context_error(&self) -> Option<ContextError> {
        match self {
            TaskError::Canceled => Some(ContextError::Canceled),
            TaskError::DeadlineExceeded => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn item_error(&self) -> Option<&E> {
        match self {
            TaskError::Item(e) => Some(e),
            _ => None,
        }
    }

    pub fn chunk_error(&self) -> Option<&Arc<ChunkError<E>>> {
        match self {
            TaskError::Chunk(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> From<ContextError> for TaskError<E> {
    fn from(reason: ContextError) -> Self {
        match reason {
            ContextError::Canceled => TaskError::Canceled,
            ContextError::DeadlineExceeded => TaskError::DeadlineExceeded,
        }
    }
}

/// Failure of one chunk in a batch invocation.
#[derive(Debug, Error)]
pub enum ChunkError<E> {
    #[error("chunk operation failed: {0}")]
    Operation(#[source] E),

    #[error("chunk operation returned {actual} values for {expected} items")]
    SizeMismatch { expected: usize, actual: usize },
}

/// One input paired with its outcome.
#[derive(Debug)]
pub struct TaskResult<T, R, E> {
    /// Position of `item` in the original input sequence.
    pub index: usize,
    pub item: T,
    pub outcome: Result<R, TaskError<E>>,
}

impl<T, R, E> TaskResult<T, R, E> {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn value(&self) -> Option<&R> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&TaskError<E>> {
        self.outcome.as_ref().err()
    }

    pub fn into_value(self) -> Option<R> {
        self.outcome.ok()
    }
}

/// Aggregate counts over a result sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionSummary {
    pub total: usize,
    pub succeeded: usize,
    /// Items whose operation (or chunk) failed or panicked.
    pub failed: usize,
    /// Items resolved from the context without running.
    pub canceled: usize,
}

impl ExecutionSummary {
    pub fn all_succeeded(&self) -> bool {
        self.succeeded == self.total
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.total as f64
        }
    }
}

pub fn summarize<T, R, E>(results: &[TaskResult<T, R, E>]) -> ExecutionSummary {
    results.iter().fold(
        ExecutionSummary {
            total: results.len(),
            ..ExecutionSummary::default()
        },
        |mut acc, r| {
            match &r.outcome {
                Ok(_) => acc.succeeded += 1,
                Err(e) if e.is_canceled() => acc.canceled += 1,
                Err(_) => acc.failed += 1,
            }
            acc
        },
    )
}
