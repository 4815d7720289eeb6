//! 弹性模式模块：提供令牌桶限流器和指数退避重试机制。
//!
//! # Resilience Primitives Module
//!
//! Process-local building blocks for calling the ledger API without overrunning its quotas
//! or giving up on transient failures. Both primitives are usually composed inside the
//! operation handed to a [`crate::concurrency`] executor.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`rate_limiter`] | Token bucket limiter with cancellable `wait` |
//! | [`retry`] | Retry with exponential backoff, jitter and a retry predicate |
//!
//! ## Rate Limiter
//!
//! ```rust
//! use ledger_sdk::resilience::rate_limiter::RateLimiter;
//! use ledger_sdk::Context;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> ledger_sdk::Result<()> {
//! let limiter = RateLimiter::new(50.0, 5)?; // 50 tokens per second, burst of 5
//! limiter.wait(&Context::new()).await?;
//! limiter.stop();
//! # Ok(())
//! # }
//! ```
//!
//! ## Retry
//!
//! ```rust
//! use ledger_sdk::resilience::retry::{RetryOptions, Retrier};
//! use ledger_sdk::Context;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> ledger_sdk::Result<()> {
//! let options = RetryOptions::builder()
//!     .with_max_retries(2)
//!     .with_initial_delay(Duration::from_millis(1))
//!     .build()?;
//! let value = Retrier::new(options)
//!     .run(&Context::new(), |attempt| async move {
//!         if attempt == 0 {
//!             Err(std::io::Error::new(std::io::ErrorKind::Other, "flaky"))
//!         } else {
//!             Ok(attempt)
//!         }
//!     })
//!     .await;
//! assert_eq!(value.ok(), Some(1));
//! # Ok(())
//! # }
//! ```

pub mod rate_limiter;
pub mod retry;

pub use rate_limiter::{RateLimiter, RateLimiterConfig, RateLimiterSnapshot};
pub use retry::{retry, retry_transient, Retrier, RetryError, RetryOptions, RetryOptionsBuilder};
