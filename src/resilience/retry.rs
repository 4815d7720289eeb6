//! Retry with exponential backoff and jitter.
//!
//! A [`Retrier`] drives one operation through at most `max_retries + 1` attempts:
//!
//! ```text
//! Idle -> Attempting -> Succeeded
//!              |
//!              +-> (non-retryable | out of retries) -> Failed
//!              +-> Waiting --(backoff elapsed)--> Attempting
//!                     |
//!                     +--(context done)--> Canceled
//! ```
//!
//! The wrapped operation must be safe to repeat. Nothing here deduplicates requests; pass an
//! idempotency key to the ledger call when that matters.

use crate::context::{Context, ContextError};
use crate::{Error, Result};
use rand::Rng;
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Decides whether a failed attempt is worth repeating.
pub type RetryPredicate = Arc<dyn Fn(&(dyn StdError + 'static)) -> bool + Send + Sync>;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

/// Lower bound of the jitter factor; delays are scaled into `[0.5, 1.0] * backoff`.
const JITTER_FLOOR: f64 = 0.5;

/// Default predicate: retry everything except cancellation and a closed rate limiter.
pub fn retry_transient(err: &(dyn StdError + 'static)) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if e.is::<ContextError>() {
            return false;
        }
        if let Some(Error::LimiterClosed) = e.downcast_ref::<Error>() {
            return false;
        }
        current = e.source();
    }
    true
}

#[derive(Clone)]
pub struct RetryOptions {
    max_retries: u32,
    initial_delay: Duration,
    max_delay: Duration,
    backoff_factor: f64,
    jitter: bool,
    predicate: RetryPredicate,
}

impl RetryOptions {
    pub fn builder() -> RetryOptionsBuilder {
        RetryOptionsBuilder::default()
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn backoff_factor(&self) -> f64 {
        self.backoff_factor
    }

    pub fn jitter(&self) -> bool {
        self.jitter
    }

    /// Un-jittered delay after failed attempt `attempt` (0-based):
    /// `min(max_delay, initial_delay * backoff_factor^attempt)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.min(i32::MAX as u32) as i32;
        let raw = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        // Anything past Duration's range (including +inf from powi) is capped.
        Duration::try_from_secs_f64(raw).map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    fn sleep_for(&self, attempt: u32) -> Duration {
        let delay = self.backoff_delay(attempt);
        if self.jitter {
            let factor = rand::thread_rng().gen_range(JITTER_FLOOR..=1.0);
            Duration::try_from_secs_f64(delay.as_secs_f64() * factor).map_or(delay, |d| d.min(delay))
        } else {
            delay
        }
    }

    fn is_retryable(&self, err: &(dyn StdError + 'static)) -> bool {
        (self.predicate)(err)
    }
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            jitter: true,
            predicate: Arc::new(retry_transient),
        }
    }
}

impl fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("max_retries", &self.max_retries)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_factor", &self.backoff_factor)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Default)]
pub struct RetryOptionsBuilder {
    options: RetryOptions,
}

impl RetryOptionsBuilder {
    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.options.max_retries = n;
        self
    }

    pub fn with_initial_delay(mut self, d: Duration) -> Self {
        self.options.initial_delay = d;
        self
    }

    pub fn with_max_delay(mut self, d: Duration) -> Self {
        self.options.max_delay = d;
        self
    }

    pub fn with_backoff_factor(mut self, f: f64) -> Self {
        self.options.backoff_factor = f;
        self
    }

    /// Replace the predicate that classifies errors as retryable.
    pub fn with_retryable_errors<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&(dyn StdError + 'static)) -> bool + Send + Sync + 'static,
    {
        self.options.predicate = Arc::new(predicate);
        self
    }

    /// Disable to sleep exactly the backoff schedule.
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.options.jitter = enabled;
        self
    }

    pub fn build(self) -> Result<RetryOptions> {
        let o = &self.options;
        if o.initial_delay.is_zero() {
            return Err(Error::invalid_option(
                "initial delay must be greater than zero",
                "retry.initial_delay",
                "retry_options",
                format_args!("{:?}", o.initial_delay),
            ));
        }
        if o.max_delay < o.initial_delay {
            return Err(Error::invalid_option(
                format!("max delay is shorter than initial delay {:?}", o.initial_delay),
                "retry.max_delay",
                "retry_options",
                format_args!("{:?}", o.max_delay),
            ));
        }
        if !o.backoff_factor.is_finite() || o.backoff_factor < 1.0 {
            return Err(Error::invalid_option(
                "backoff factor must be a finite number >= 1",
                "retry.backoff_factor",
                "retry_options",
                o.backoff_factor,
            ));
        }
        Ok(self.options)
    }
}

/// Terminal failure of a retried operation.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The last attempt failed and no further attempt was allowed, either because the error
    /// was not retryable or because retries ran out.
    #[error("retry exhausted after {attempts} attempt(s): {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: E,
    },

    /// The context ended before or between attempts.
    #[error("retry aborted after {attempts} attempt(s): {reason}")]
    Canceled { attempts: u32, reason: ContextError },
}

impl<E> RetryError<E> {
    /// Number of times the operation was invoked.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::Canceled { attempts, .. } => {
                *attempts
            }
        }
    }

    /// The last operation error, if the failure was not a cancellation.
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Exhausted { source, .. } => Some(source),
            RetryError::Canceled { .. } => None,
        }
    }

    pub fn context_error(&self) -> Option<ContextError> {
        match self {
            RetryError::Canceled { reason, .. } => Some(*reason),
            RetryError::Exhausted { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Retrier {
    options: RetryOptions,
}

impl Retrier {
    pub fn new(options: RetryOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RetryOptions {
        &self.options
    }

    /// Invoke `op` until it succeeds, fails with a non-retryable error, runs out of retries,
    /// or `ctx` ends. `op` receives the 0-based attempt number.
    pub async fn run<R, E, F, Fut>(&self, ctx: &Context, mut op: F) -> std::result::Result<R, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = std::result::Result<R, E>>,
        E: StdError + 'static,
    {
        let mut attempt: u32 = 0;
        loop {
            if let Some(reason) = ctx.err() {
                return Err(RetryError::Canceled {
                    attempts: attempt,
                    reason,
                });
            }

            let err = match op(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(
                            attempts = attempt.saturating_add(1),
                            "operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };
            let attempts = attempt.saturating_add(1);

            if attempt >= self.options.max_retries || !self.options.is_retryable(&err) {
                debug!(attempts, error = %err, "giving up on operation");
                return Err(RetryError::Exhausted {
                    attempts,
                    source: err,
                });
            }

            let delay = self.options.sleep_for(attempt);
            warn!(
                attempt = attempts,
                max_attempts = self.options.max_retries.saturating_add(1),
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "attempt failed; retrying"
            );
            tokio::select! {
                biased;
                _ = ctx.done() => {
                    return Err(RetryError::Canceled {
                        attempts,
                        reason: ctx.err().unwrap_or(ContextError::Canceled),
                    });
                }
                _ = tokio::time::sleep(delay) => {}
            }
            attempt = attempts;
        }
    }
}

/// Shorthand for `Retrier::new(options.clone()).run(ctx, op)`.
pub async fn retry<R, E, F, Fut>(
    ctx: &Context,
    options: &RetryOptions,
    op: F,
) -> std::result::Result<R, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<R, E>>,
    E: StdError + 'static,
{
    Retrier::new(options.clone()).run(ctx, op).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("transient")]
    struct Transient;

    #[test]
    fn test_retry_options_defaults() {
        let o = RetryOptions::default();
        assert_eq!(o.max_retries(), 3);
        assert_eq!(o.initial_delay(), Duration::from_millis(100));
        assert_eq!(o.max_delay(), Duration::from_secs(10));
        assert_eq!(o.backoff_factor(), 2.0);
        assert!(o.jitter());
    }

    #[test]
    fn test_backoff_schedule_is_capped() {
        let o = RetryOptions::builder()
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(500))
            .with_backoff_factor(2.0)
            .build()
            .unwrap();
        assert_eq!(o.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(o.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(o.backoff_delay(2), Duration::from_millis(400));
        assert_eq!(o.backoff_delay(3), Duration::from_millis(500));
        assert_eq!(o.backoff_delay(u32::MAX), Duration::from_millis(500));
    }

    #[test]
    fn test_unbounded_max_delay_does_not_overflow() {
        let o = RetryOptions::builder()
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::MAX)
            .build()
            .unwrap();
        assert_eq!(o.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(o.backoff_delay(200), Duration::MAX);
        assert_eq!(o.backoff_delay(u32::MAX), Duration::MAX);
        let jittered = o.sleep_for(200);
        assert!(jittered <= Duration::MAX);
        assert!(jittered >= Duration::from_secs(1 << 62));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let o = RetryOptions::builder()
            .with_initial_delay(Duration::from_millis(100))
            .build()
            .unwrap();
        for _ in 0..200 {
            let d = o.sleep_for(0);
            assert!(d >= Duration::from_millis(49) && d <= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_invalid_options_rejected_at_build() {
        let zero = RetryOptions::builder()
            .with_initial_delay(Duration::ZERO)
            .build();
        assert!(zero.is_err());

        let inverted = RetryOptions::builder()
            .with_initial_delay(Duration::from_secs(2))
            .with_max_delay(Duration::from_secs(1))
            .build()
            .unwrap_err();
        assert_eq!(
            inverted.context().and_then(|c| c.field_path.as_deref()),
            Some("retry.max_delay")
        );
        assert_eq!(
            inverted.context().and_then(|c| c.details.as_deref()),
            Some("rejected value: 1s")
        );

        assert!(RetryOptions::builder().with_backoff_factor(0.5).build().is_err());
        assert!(RetryOptions::builder()
            .with_backoff_factor(f64::NAN)
            .build()
            .is_err());
    }

    #[test]
    fn test_default_predicate_skips_cancellation() {
        assert!(retry_transient(&Transient));
        assert!(!retry_transient(&ContextError::Canceled));
        assert!(!retry_transient(&Error::Context(ContextError::DeadlineExceeded)));
        assert!(!retry_transient(&Error::LimiterClosed));
    }

    #[test]
    fn test_retry_error_accessors() {
        let err: RetryError<Transient> = RetryError::Exhausted {
            attempts: 4,
            source: Transient,
        };
        assert_eq!(err.attempts(), 4);
        assert_eq!(err.to_string(), "retry exhausted after 4 attempt(s): transient");
        assert!(err.into_inner().is_some());

        let canceled: RetryError<Transient> = RetryError::Canceled {
            attempts: 1,
            reason: ContextError::Canceled,
        };
        assert_eq!(canceled.context_error(), Some(ContextError::Canceled));
        assert!(canceled.into_inner().is_none());
    }
}
