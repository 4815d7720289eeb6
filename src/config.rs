//! Environment-driven defaults for the toolkit.
//!
//! Every knob is optional and unparseable values fall back to the default. Validation happens
//! when the components are built from the config.

use crate::concurrency::{PoolConfig, DEFAULT_WORKERS};
use crate::resilience::rate_limiter::{RateLimiter, RateLimiterConfig};
use crate::resilience::retry::{
    RetryOptions, DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES, DEFAULT_INITIAL_DELAY,
};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

pub const ENV_WORKERS: &str = "LEDGER_SDK_WORKERS";
pub const ENV_BUFFER_SIZE: &str = "LEDGER_SDK_BUFFER_SIZE";
pub const ENV_RPS: &str = "LEDGER_SDK_RPS";
pub const ENV_RPM: &str = "LEDGER_SDK_RPM";
pub const ENV_BURST: &str = "LEDGER_SDK_BURST";
pub const ENV_MAX_RETRIES: &str = "LEDGER_SDK_MAX_RETRIES";
pub const ENV_RETRY_INITIAL_DELAY_MS: &str = "LEDGER_SDK_RETRY_INITIAL_DELAY_MS";
pub const ENV_RETRY_MAX_DELAY_MS: &str = "LEDGER_SDK_RETRY_MAX_DELAY_MS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SdkConfig {
    pub workers: usize,
    /// `None` sizes the queue to the input length.
    pub buffer_size: Option<usize>,
    /// `None` disables rate limiting.
    pub rate_per_second: Option<f64>,
    /// `None` means one second worth of tokens.
    pub burst: Option<u32>,
    pub max_retries: u32,
    pub retry_initial_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            buffer_size: None,
            rate_per_second: None,
            burst: None,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_initial_delay_ms: DEFAULT_INITIAL_DELAY.as_millis() as u64,
            retry_max_delay_ms: DEFAULT_MAX_DELAY.as_millis() as u64,
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    lookup(name).and_then(|s| s.trim().parse::<T>().ok())
}

impl SdkConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source (e.g. a map in tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let rps = parsed::<f64>(&lookup, ENV_RPS);
        let rpm = parsed::<f64>(&lookup, ENV_RPM);
        Self {
            workers: parsed(&lookup, ENV_WORKERS).unwrap_or(defaults.workers),
            buffer_size: parsed(&lookup, ENV_BUFFER_SIZE),
            rate_per_second: rps.or_else(|| rpm.map(|rpm| rpm / 60.0)),
            burst: parsed(&lookup, ENV_BURST),
            max_retries: parsed(&lookup, ENV_MAX_RETRIES).unwrap_or(defaults.max_retries),
            retry_initial_delay_ms: parsed(&lookup, ENV_RETRY_INITIAL_DELAY_MS)
                .unwrap_or(defaults.retry_initial_delay_ms),
            retry_max_delay_ms: parsed(&lookup, ENV_RETRY_MAX_DELAY_MS)
                .unwrap_or(defaults.retry_max_delay_ms),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn pool_config(&self) -> Result<PoolConfig> {
        let mut builder = PoolConfig::builder().with_workers(self.workers);
        if let Some(n) = self.buffer_size {
            builder = builder.with_buffer_size(n);
        }
        builder.build()
    }

    /// A limiter when a rate is configured, `None` otherwise.
    pub fn rate_limiter(&self) -> Result<Option<RateLimiter>> {
        let Some(rps) = self.rate_per_second else {
            return Ok(None);
        };
        let burst = self
            .burst
            .unwrap_or_else(|| rps.ceil().clamp(1.0, u32::MAX as f64) as u32);
        let cfg = RateLimiterConfig {
            rate_per_second: rps,
            burst,
        };
        RateLimiter::with_config(cfg).map(Some)
    }

    pub fn retry_options(&self) -> Result<RetryOptions> {
        RetryOptions::builder()
            .with_max_retries(self.max_retries)
            .with_initial_delay(Duration::from_millis(self.retry_initial_delay_ms))
            .with_max_delay(Duration::from_millis(self.retry_max_delay_ms))
            .build()
    }
}
