//! Integration tests for the retrier, alone and composed with the limiter and pool.

use ledger_sdk::concurrency::{PoolConfig, WorkerPool};
use ledger_sdk::resilience::{retry, RateLimiter, Retrier, RetryError, RetryOptions};
use ledger_sdk::{Context, ContextError};
use std::error::Error as StdError;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
enum LedgerError {
    #[error("ledger unavailable")]
    Unavailable,
    #[error("entry rejected: {0}")]
    Rejected(String),
}

fn only_unavailable(err: &(dyn StdError + 'static)) -> bool {
    matches!(err.downcast_ref::<LedgerError>(), Some(LedgerError::Unavailable))
}

fn options(initial_ms: u64, jitter: bool) -> RetryOptions {
    RetryOptions::builder()
        .with_max_retries(3)
        .with_initial_delay(Duration::from_millis(initial_ms))
        .with_max_delay(Duration::from_secs(1))
        .with_backoff_factor(2.0)
        .with_jitter(jitter)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_three_failures_then_success_makes_four_calls() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let started = Instant::now();

    let res = Retrier::new(options(10, false))
        .run(&Context::new(), |attempt| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if attempt < 3 {
                    Err(LedgerError::Unavailable)
                } else {
                    Ok("posted")
                }
            }
        })
        .await;

    assert_eq!(tokio_test::assert_ok!(res), "posted");
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    // 10 + 20 + 40 ms of backoff.
    assert!(started.elapsed() >= Duration::from_millis(70));
}

#[tokio::test]
async fn test_jittered_backoff_respects_the_floor() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let started = Instant::now();

    let res = retry(&Context::new(), &options(20, true), |_attempt| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(LedgerError::Unavailable)
        }
    })
    .await;

    let err = tokio_test::assert_err!(res);
    assert_eq!(err.attempts(), 4);
    assert!(matches!(err.into_inner(), Some(LedgerError::Unavailable)));
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    // Half of 20 + 40 + 80 ms.
    assert!(started.elapsed() >= Duration::from_millis(69));
}

#[tokio::test]
async fn test_non_retryable_error_is_returned_after_one_call() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let opts = RetryOptions::builder()
        .with_initial_delay(Duration::from_millis(5))
        .with_retryable_errors(only_unavailable)
        .build()
        .unwrap();

    let res: Result<(), _> = Retrier::new(opts)
        .run(&Context::new(), |_attempt| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(LedgerError::Rejected("duplicate id".into()))
            }
        })
        .await;

    match res {
        Err(RetryError::Exhausted { attempts, source }) => {
            assert_eq!(attempts, 1);
            assert!(matches!(source, LedgerError::Rejected(_)));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancel_during_backoff_stops_further_attempts() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let ctx = Context::new();
    let trigger = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(40)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let res: Result<(), _> = Retrier::new(options(200, false))
        .run(&ctx, |_attempt| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(LedgerError::Unavailable)
            }
        })
        .await;

    let err = res.unwrap_err();
    assert_eq!(err.context_error(), Some(ContextError::Canceled));
    assert_eq!(err.attempts(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(started.elapsed() < Duration::from_millis(200));
}

#[tokio::test]
async fn test_deadline_before_first_attempt() {
    let ctx = Context::with_timeout(Duration::ZERO);
    tokio::time::sleep(Duration::from_millis(1)).await;
    let res: Result<(), RetryError<LedgerError>> =
        Retrier::default().run(&ctx, |_attempt| async { Ok(()) }).await;
    let err = res.unwrap_err();
    assert_eq!(err.context_error(), Some(ContextError::DeadlineExceeded));
    assert_eq!(err.attempts(), 0);
}

#[tokio::test]
async fn test_limiter_retrier_and_pool_compose() {
    let limiter = Arc::new(RateLimiter::new(200.0, 4).unwrap());
    let retrier = Arc::new(Retrier::new(options(5, true)));
    let pool = WorkerPool::new(PoolConfig::builder().with_workers(3).build().unwrap());

    let results = pool
        .execute(&Context::new(), (1..=12u64).collect(), move |ctx, id| {
            let (limiter, retrier) = (Arc::clone(&limiter), Arc::clone(&retrier));
            async move {
                retrier
                    .run(&ctx, |attempt| {
                        let (limiter, ctx) = (Arc::clone(&limiter), ctx.clone());
                        async move {
                            limiter
                                .wait(&ctx)
                                .await
                                .map_err(|_| LedgerError::Unavailable)?;
                            // Odd ids fail on their first attempt.
                            if attempt == 0 && id % 2 == 1 {
                                return Err(LedgerError::Unavailable);
                            }
                            Ok(id * 10)
                        }
                    })
                    .await
            }
        })
        .await;

    assert_eq!(results.len(), 12);
    for (i, r) in results.iter().enumerate() {
        assert_eq!(r.value(), Some(&((i as u64 + 1) * 10)));
    }
}

#[tokio::test]
async fn test_unbounded_retries_log_without_overflow() {
    // Retry events are only formatted while a subscriber is listening.
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let options = RetryOptions::builder()
        .with_max_retries(u32::MAX)
        .with_initial_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(10))
        .build()
        .unwrap();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);

    let res = Retrier::new(options)
        .run(&Context::new(), |attempt| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if attempt < 2 {
                    Err(LedgerError::Unavailable)
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

    assert_eq!(tokio_test::assert_ok!(res), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}
