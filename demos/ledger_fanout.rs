//! Ledger Fan-out Example
//!
//! Posts a set of journal entries to a simulated ledger using every piece of the toolkit:
//! 1. Worker pool - bounded, ordered fan-out of single posts
//! 2. Rate limiter - shared budget across all workers
//! 3. Retrier - transient failures retried with jittered backoff
//! 4. Batch - bulk verification in chunks
//! 5. ForEach - fail-fast archival
//!
//! Knobs come from the environment, e.g.
//! `LEDGER_SDK_WORKERS=4 LEDGER_SDK_RPS=50 RUST_LOG=ledger_sdk=debug cargo run --example ledger_fanout`

use anyhow::Context as _;
use ledger_sdk::concurrency::summarize;
use ledger_sdk::resilience::{RateLimiter, Retrier};
use ledger_sdk::{telemetry, Context, ContextError, SdkConfig, WorkerPool};
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
struct Entry {
    id: u64,
    account: String,
    amount_cents: i64,
}

#[derive(Debug, Clone, Serialize)]
struct Receipt {
    entry_id: u64,
    sequence: u64,
}

#[derive(Debug, thiserror::Error)]
enum LedgerError {
    #[error("ledger busy, try again")]
    Busy,
    #[error("entry {0} has a zero amount")]
    ZeroAmount(u64),
    #[error("{0}")]
    Sdk(#[from] ledger_sdk::Error),
}

/// Pretend HTTP call: 5-25ms latency, one call in five is rejected as busy.
async fn post_entry(ctx: &Context, entry: &Entry) -> Result<Receipt, LedgerError> {
    let (latency, busy) = {
        let mut rng = rand::thread_rng();
        (rng.gen_range(5..25), rng.gen_bool(0.2))
    };
    tokio::select! {
        _ = ctx.done() => return Err(LedgerError::Sdk(ctx.err().unwrap_or(ContextError::Canceled).into())),
        _ = tokio::time::sleep(Duration::from_millis(latency)) => {}
    }
    if busy {
        return Err(LedgerError::Busy);
    }
    Ok(Receipt {
        entry_id: entry.id,
        sequence: 10_000 + entry.id,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();

    let config = SdkConfig::from_env();
    println!("config: {}", serde_json::to_string(&config)?);

    let limiter = Arc::new(match config.rate_limiter()? {
        Some(limiter) => limiter,
        None => RateLimiter::new(100.0, 10)?,
    });
    let retrier = Arc::new(Retrier::new(config.retry_options()?));
    let pool = WorkerPool::new(config.pool_config()?);
    let ctx = Context::with_timeout(Duration::from_secs(10));

    let entries: Vec<Entry> = (1..=40)
        .map(|id| Entry {
            id,
            account: format!("acct-{:03}", id % 7),
            amount_cents: (id as i64) * 125 - 2_000,
        })
        .collect();

    // 1-3: single posts, rate limited and retried.
    let posted = {
        let (limiter, retrier) = (Arc::clone(&limiter), Arc::clone(&retrier));
        pool.execute(&ctx, entries.clone(), move |ctx, entry: Entry| {
            let (limiter, retrier) = (Arc::clone(&limiter), Arc::clone(&retrier));
            async move {
                retrier
                    .run(&ctx, |_attempt| {
                        let (limiter, ctx, entry) = (Arc::clone(&limiter), ctx.clone(), entry.clone());
                        async move {
                            limiter.wait(&ctx).await?;
                            post_entry(&ctx, &entry).await
                        }
                    })
                    .await
            }
        })
        .await
    };

    let summary = summarize(&posted);
    println!("post summary: {}", serde_json::to_string_pretty(&summary)?);
    for failed in posted.iter().filter(|r| !r.is_ok()) {
        if let Some(err) = failed.error() {
            println!("  entry {} failed: {}", failed.item.id, err);
        }
    }

    // 4: verify receipts in chunks of 8.
    let receipts: Vec<Receipt> = posted.into_iter().filter_map(|r| r.into_value()).collect();
    let verified = pool
        .execute_batch(&ctx, receipts, 8, |_ctx, chunk: Vec<Receipt>| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok::<_, LedgerError>(chunk.iter().map(|r| r.sequence > r.entry_id).collect::<Vec<_>>())
        })
        .await
        .context("batch verification rejected its options")?;
    let ok = verified.iter().filter(|r| r.value() == Some(&true)).count();
    println!("verified {}/{} receipts", ok, verified.len());

    // 5: archive; the first failure stops the rest.
    let archived = pool
        .for_each(&ctx, entries, |_ctx, entry: Entry| async move {
            if entry.amount_cents == 0 {
                return Err(LedgerError::ZeroAmount(entry.id));
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(())
        })
        .await;
    match archived {
        Ok(()) => println!("archived all entries"),
        Err(err) => println!("archival stopped early: {}", err),
    }

    limiter.stop();
    Ok(())
}
