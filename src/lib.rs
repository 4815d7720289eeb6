//! # ledger-sdk
//!
//! 远程账本 API 的 Rust 客户端 SDK：有界并发执行、限流与重试工具集。
//!
//! Client SDK toolkit for the remote ledger API: bounded fan-out, chunked batching,
//! fail-fast iteration, token-bucket rate limiting and retry with backoff.
//!
//! ## Overview
//!
//! Ledger calls are ordinary request/response operations. What needs care is running many
//! of them at once: keeping parallelism bounded, never dropping an outcome, staying under the
//! API's rate limits and retrying transient failures without stampeding the server. This
//! crate supplies those pieces; the HTTP call itself is the operation you hand it.
//!
//! ## Core Philosophy
//!
//! - **No lost results**: one outcome per input, whether it succeeded, failed, panicked or
//!   was canceled
//! - **Bounded**: every invocation runs on an explicit number of workers
//! - **Cooperative cancellation**: a single [`Context`] governs an invocation; operations
//!   observe it at well-defined suspension points
//! - **Validated configuration**: bad options are rejected before anything is dispatched
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ledger_sdk::concurrency::{PoolConfig, WorkerPool};
//! use ledger_sdk::resilience::{RateLimiter, Retrier, RetryOptions};
//! use ledger_sdk::Context;
//! use std::sync::Arc;
//!
//! # #[derive(Debug, thiserror::Error)]
//! # #[error("transport")]
//! # struct TransportError;
//! # async fn post_entry(_ctx: &Context, id: u64) -> Result<String, TransportError> { Ok(id.to_string()) }
//! #[tokio::main]
//! async fn main() -> ledger_sdk::Result<()> {
//!     let limiter = Arc::new(RateLimiter::new(20.0, 5)?);
//!     let retrier = Arc::new(Retrier::new(RetryOptions::default()));
//!     let pool = WorkerPool::new(PoolConfig::builder().with_workers(4).build()?);
//!
//!     let results = pool
//!         .execute(&Context::new(), vec![1u64, 2, 3], move |ctx, id| {
//!             let limiter = Arc::clone(&limiter);
//!             let retrier = Arc::clone(&retrier);
//!             async move {
//!                 retrier
//!                     .run(&ctx, |_attempt| {
//!                         let (limiter, ctx) = (Arc::clone(&limiter), ctx.clone());
//!                         async move {
//!                             limiter.wait(&ctx).await.map_err(|_| TransportError)?;
//!                             post_entry(&ctx, id).await
//!                         }
//!                     })
//!                     .await
//!             }
//!         })
//!         .await;
//!     assert_eq!(results.len(), 3);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`concurrency`] | Worker pool, batch and for-each executors |
//! | [`resilience`] | Rate limiter and retrier |
//! | [`context`] | Cancellation and deadlines |
//! | [`config`] | Environment-driven defaults |
//! | [`telemetry`] | `tracing` subscriber setup |

pub mod concurrency;
pub mod config;
pub mod context;
pub mod resilience;
pub mod telemetry;

pub use concurrency::{PoolConfig, TaskError, TaskResult, WorkerPool};
pub use config::SdkConfig;
pub use context::{Context, ContextError};
pub use resilience::{RateLimiter, Retrier, RetryError, RetryOptions};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
