//! Validated worker pool configuration.

use crate::{Error, Result};
use serde::Serialize;

pub const DEFAULT_WORKERS: usize = 10;

/// Immutable settings for one executor invocation.
///
/// Build through [`PoolConfig::builder`]; invalid values are rejected by `build()` so nothing
/// is dispatched with a bad configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolConfig {
    workers: usize,
    buffer_size: Option<usize>,
    ordered: bool,
}

impl PoolConfig {
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::default()
    }

    /// Defaults overridden by `LEDGER_SDK_WORKERS` / `LEDGER_SDK_BUFFER_SIZE`.
    pub fn from_env() -> Result<Self> {
        crate::config::SdkConfig::from_env().pool_config()
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Explicit queue size, or `None` to size the queue to the input length.
    pub fn buffer_size(&self) -> Option<usize> {
        self.buffer_size
    }

    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    /// Channel capacity for `len` inputs. Bounded channels need room for at least one item.
    pub(crate) fn queue_capacity(&self, len: usize) -> usize {
        self.buffer_size.unwrap_or(len).max(1)
    }

    pub(crate) fn with_ordering(&self, ordered: bool) -> Self {
        Self {
            ordered,
            ..self.clone()
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            buffer_size: None,
            ordered: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PoolConfigBuilder {
    workers: usize,
    buffer_size: Option<usize>,
    ordered: bool,
}

impl Default for PoolConfigBuilder {
    fn default() -> Self {
        let base = PoolConfig::default();
        Self {
            workers: base.workers,
            buffer_size: base.buffer_size,
            ordered: base.ordered,
        }
    }
}

impl PoolConfigBuilder {
    /// Number of concurrent workers; must be at least 1.
    pub fn with_workers(mut self, n: usize) -> Self {
        self.workers = n;
        self
    }

    /// How many inputs may queue ahead of the workers.
    pub fn with_buffer_size(mut self, n: usize) -> Self {
        self.buffer_size = Some(n);
        self
    }

    /// Emit results in completion order instead of input order.
    pub fn with_unordered_results(mut self) -> Self {
        self.ordered = false;
        self
    }

    pub fn build(self) -> Result<PoolConfig> {
        if self.workers == 0 {
            return Err(Error::invalid_option(
                "workers must be at least 1",
                "pool.workers",
                "pool_config",
                self.workers,
            ));
        }
        Ok(PoolConfig {
            workers: self.workers,
            buffer_size: self.buffer_size,
            ordered: self.ordered,
        })
    }
}
