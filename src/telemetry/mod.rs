//! 遥测模块：为二进制程序和测试安装 tracing 订阅器。
//!
//! Logging setup for binaries, demos and tests.
//!
//! Library code only emits `tracing` events (`ledger_sdk::concurrency`, `ledger_sdk::resilience`
//! targets) and never installs a subscriber on its own. Applications that have no subscriber
//! yet can call [`init_tracing`].

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset or unparseable.
pub const DEFAULT_FILTER: &str = "ledger_sdk=info";

/// Install a fmt subscriber filtered by `RUST_LOG`.
///
/// Returns `false` when a global subscriber was already installed, so repeated calls from
/// several tests are harmless.
pub fn init_tracing() -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
