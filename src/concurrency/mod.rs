//! 并发执行模块：有界工作池、分块批处理与快速失败迭代。
//!
//! # Bounded Concurrency Module
//!
//! Fan a caller-supplied operation out over a sequence of inputs with an explicit cap on
//! parallelism. The operation is usually a ledger API call, optionally wrapped in a
//! [`crate::resilience::retry::Retrier`] and gated by a
//! [`crate::resilience::rate_limiter::RateLimiter`].
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`pool::execute`] / [`WorkerPool`] | One call per input, partial success, ordered or completion order |
//! | [`batch::execute`] | One call per chunk, results fanned back out per item, input order |
//! | [`for_each::execute`] | Fail-fast: first error cancels everything not yet started |
//! | [`PoolConfig`] | Validated worker count, queue size and ordering |
//! | [`TaskResult`] / [`TaskError`] | Per-item outcome |
//!
//! ## Guarantees
//!
//! - The executor and batch always return one [`TaskResult`] per input, even on
//!   cancellation, operation errors or panics.
//! - Ordered mode: `results[i].item == inputs[i]`.
//! - Cancellation is cooperative: queued inputs resolve with the context error, running
//!   operations stop only if they watch their [`crate::Context`].
//!
//! ## Example
//!
//! ```rust
//! use ledger_sdk::concurrency::{pool, PoolConfig};
//! use ledger_sdk::Context;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> ledger_sdk::Result<()> {
//! let config = PoolConfig::builder().with_workers(2).build()?;
//! let results = pool::execute(
//!     &Context::new(),
//!     vec!["a", "b", "c"],
//!     |_ctx, s: &'static str| async move { Ok::<_, std::io::Error>(s.to_uppercase()) },
//!     &config,
//! )
//! .await;
//! let values: Vec<_> = results.iter().filter_map(|r| r.value().cloned()).collect();
//! assert_eq!(values, vec!["A", "B", "C"]);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod config;
pub mod for_each;
pub mod outcome;
pub mod pool;

pub use config::{PoolConfig, PoolConfigBuilder, DEFAULT_WORKERS};
pub use outcome::{summarize, ChunkError, ExecutionSummary, TaskError, TaskResult};
pub use pool::WorkerPool;
