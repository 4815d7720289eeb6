use crate::context::{Context, ContextError};
use crate::{Error, Result};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterSnapshot {
    pub rate_per_second: f64,
    pub burst: u32,
    pub tokens: f64,
    /// Estimated wait time until a token is available (ms), if currently empty.
    pub estimated_wait_ms: Option<u64>,
    pub closed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterConfig {
    /// Tokens added per second.
    pub rate_per_second: f64,
    /// Bucket capacity.
    pub burst: u32,
}

impl RateLimiterConfig {
    /// Config for `rps` with a burst of one second worth of tokens, at least 1.
    pub fn from_rps(rps: f64) -> Option<Self> {
        if !rps.is_finite() || rps <= 0.0 {
            return None;
        }
        Some(Self {
            rate_per_second: rps,
            burst: rps.ceil().clamp(1.0, u32::MAX as f64) as u32,
        })
    }

    pub fn with_burst(mut self, burst: u32) -> Self {
        self.burst = burst;
        self
    }

    pub fn with_refill_rate(mut self, rate: f64) -> Self {
        self.rate_per_second = rate;
        self
    }

    fn validate(&self) -> Result<()> {
        if !self.rate_per_second.is_finite() || self.rate_per_second <= 0.0 {
            return Err(Error::invalid_option(
                "rate must be a positive number of tokens per second",
                "rate_limiter.rate_per_second",
                "rate_limiter",
                self.rate_per_second,
            ));
        }
        if self.burst == 0 {
            return Err(Error::invalid_option(
                "burst must be at least 1",
                "rate_limiter.burst",
                "rate_limiter",
                self.burst,
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Process-local token-bucket rate limiter.
///
/// - Tokens accrue continuously (fractional) and are clamped to `[0, burst]`
/// - Refill is computed lazily on access; there is no background timer
/// - Fairness among concurrent waiters is best-effort, not FIFO: a waiter sleeps for its
///   computed deficit and then competes for the bucket again
pub struct RateLimiter {
    cfg: RateLimiterConfig,
    bucket: Mutex<Bucket>,
    closed: CancellationToken,
}

impl RateLimiter {
    /// A full bucket of `burst` tokens refilled at `rate_per_second`.
    pub fn new(rate_per_second: f64, burst: u32) -> Result<Self> {
        Self::with_config(RateLimiterConfig {
            rate_per_second,
            burst,
        })
    }

    pub fn with_config(cfg: RateLimiterConfig) -> Result<Self> {
        cfg.validate()?;
        let bucket = Mutex::new(Bucket {
            tokens: cfg.burst as f64,
            last_refill: Instant::now(),
        });
        Ok(Self {
            cfg,
            bucket,
            closed: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.cfg
    }

    fn refill_locked(cfg: &RateLimiterConfig, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            bucket.tokens = (bucket.tokens + elapsed * cfg.rate_per_second).min(cfg.burst as f64);
            bucket.last_refill = now;
        }
    }

    /// Time until one whole token is available, or `None` after consuming one.
    fn take_or_deficit(cfg: &RateLimiterConfig, bucket: &mut Bucket) -> Option<Duration> {
        Self::refill_locked(cfg, bucket);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return None;
        }
        let missing = 1.0 - bucket.tokens;
        Some(Duration::from_secs_f64(missing / cfg.rate_per_second))
    }

    /// Block until a token is available and consume it.
    ///
    /// Returns the context error without consuming a token if `ctx` ends first, and
    /// [`Error::LimiterClosed`] once [`RateLimiter::stop`] has been called.
    pub async fn wait(&self, ctx: &Context) -> Result<()> {
        loop {
            if self.closed.is_cancelled() {
                return Err(Error::LimiterClosed);
            }
            if let Some(reason) = ctx.err() {
                return Err(reason.into());
            }

            let deficit = {
                let mut bucket = self.bucket.lock().await;
                match Self::take_or_deficit(&self.cfg, &mut bucket) {
                    None => return Ok(()),
                    Some(deficit) => deficit,
                }
            };

            trace!(
                wait_ms = deficit.as_millis() as u64,
                "rate limiter empty; waiting for refill"
            );
            tokio::select! {
                biased;
                _ = self.closed.cancelled() => return Err(Error::LimiterClosed),
                _ = ctx.done() => {
                    return Err(ctx.err().unwrap_or(ContextError::Canceled).into());
                }
                _ = tokio::time::sleep(deficit) => {}
            }
        }
    }

    /// Consume a token if one is available right now.
    pub async fn try_wait(&self) -> Result<bool> {
        if self.closed.is_cancelled() {
            return Err(Error::LimiterClosed);
        }
        let mut bucket = self.bucket.lock().await;
        Ok(Self::take_or_deficit(&self.cfg, &mut bucket).is_none())
    }

    /// Close the limiter. Blocked and future waiters get [`Error::LimiterClosed`].
    /// Calling it again has no effect.
    pub fn stop(&self) {
        if !self.closed.is_cancelled() {
            debug!(
                rate_per_second = self.cfg.rate_per_second,
                burst = self.cfg.burst,
                "rate limiter stopped"
            );
        }
        self.closed.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub async fn snapshot(&self) -> RateLimiterSnapshot {
        let cfg = &self.cfg;
        let mut bucket = self.bucket.lock().await;
        Self::refill_locked(cfg, &mut bucket);

        let estimated_wait_ms = if bucket.tokens < 1.0 {
            let missing = 1.0 - bucket.tokens;
            Some((missing / cfg.rate_per_second * 1000.0).ceil() as u64)
        } else {
            None
        };

        RateLimiterSnapshot {
            rate_per_second: cfg.rate_per_second,
            burst: cfg.burst,
            tokens: bucket.tokens,
            estimated_wait_ms,
            closed: self.closed.is_cancelled(),
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("cfg", &self.cfg)
            .field("closed", &self.closed.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_config_from_rps() {
        let config = RateLimiterConfig::from_rps(10.0).unwrap();
        assert_eq!(config.rate_per_second, 10.0);
        assert_eq!(config.burst, 10);
    }

    #[test]
    fn test_rate_limiter_config_from_rps_low() {
        let config = RateLimiterConfig::from_rps(0.5).unwrap();
        assert_eq!(config.rate_per_second, 0.5);
        // burst should be at least 1
        assert_eq!(config.burst, 1);
    }

    #[test]
    fn test_rate_limiter_config_from_rps_invalid() {
        assert!(RateLimiterConfig::from_rps(0.0).is_none());
        assert!(RateLimiterConfig::from_rps(-1.0).is_none());
        assert!(RateLimiterConfig::from_rps(f64::NAN).is_none());
        assert!(RateLimiterConfig::from_rps(f64::INFINITY).is_none());
    }

    #[test]
    fn test_rate_limiter_rejects_bad_values() {
        assert!(RateLimiter::new(0.0, 1).is_err());
        assert!(RateLimiter::new(f64::NAN, 1).is_err());
        let err = RateLimiter::new(5.0, 0).unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("rate_limiter.burst")
        );
        assert_eq!(
            err.context().and_then(|c| c.details.as_deref()),
            Some("rejected value: 0")
        );
    }

    #[test]
    fn test_rate_limiter_config_builder() {
        let config = RateLimiterConfig::from_rps(1.0)
            .unwrap()
            .with_burst(100)
            .with_refill_rate(50.0);
        assert_eq!(config.burst, 100);
        assert_eq!(config.rate_per_second, 50.0);
    }

    #[tokio::test]
    async fn test_rate_limiter_initial_burst() {
        let limiter = RateLimiter::new(10.0, 10).unwrap();
        let snapshot = limiter.snapshot().await;
        assert_eq!(snapshot.burst, 10);
        assert!(snapshot.tokens >= 9.0);
        assert!(snapshot.estimated_wait_ms.is_none());
        assert!(!snapshot.closed);
    }

    #[tokio::test]
    async fn test_rate_limiter_try_wait_drains_burst() {
        let limiter = RateLimiter::new(1.0, 3).unwrap();
        assert!(limiter.try_wait().await.unwrap());
        assert!(limiter.try_wait().await.unwrap());
        assert!(limiter.try_wait().await.unwrap());
        assert!(!limiter.try_wait().await.unwrap());
        assert!(limiter.snapshot().await.estimated_wait_ms.is_some());
    }

    #[tokio::test]
    async fn test_rate_limiter_refill() {
        // 100 tokens/sec = 1 token/10ms
        let limiter = RateLimiter::new(100.0, 5).unwrap();
        for _ in 0..5 {
            assert!(limiter.try_wait().await.unwrap());
        }
        assert!(!limiter.try_wait().await.unwrap());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(limiter.try_wait().await.unwrap());
    }

    #[tokio::test]
    async fn test_tokens_never_exceed_burst() {
        let limiter = RateLimiter::new(1000.0, 2).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let snapshot = limiter.snapshot().await;
        assert!(snapshot.tokens <= 2.0);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_closes() {
        let limiter = RateLimiter::new(10.0, 1).unwrap();
        limiter.stop();
        limiter.stop();
        assert!(limiter.is_stopped());
        assert!(matches!(
            limiter.wait(&Context::new()).await,
            Err(Error::LimiterClosed)
        ));
        assert!(matches!(limiter.try_wait().await, Err(Error::LimiterClosed)));
        assert!(limiter.snapshot().await.closed);
    }
}
