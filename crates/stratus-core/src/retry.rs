//! Bounded fixed-delay retry.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Run `op` up to `attempts` times, sleeping `delay` between failures.
///
/// Returns the first success, or the last error once the budget is spent.
/// An `attempts` of zero is treated as one.
pub async fn retry_fixed<T, E, F, Fut>(
    attempts: u32,
    delay: Duration,
    what: &str,
    op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    retry_fixed_if(attempts, delay, what, |_| true, op).await
}

/// Like [`retry_fixed`], but errors for which `retryable` is false are
/// returned immediately.
pub async fn retry_fixed_if<T, E, F, Fut, P>(
    attempts: u32,
    delay: Duration,
    what: &str,
    retryable: P,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts && retryable(&e) => {
                warn!(what, attempt, attempts, error = %e, "attempt failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = retry_fixed(5, Duration::ZERO, "test", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 { Err(format!("fail {n}")) } else { Ok(n) }
        })
        .await;
        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn surfaces_last_error_when_exhausted() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = retry_fixed(4, Duration::ZERO, "test", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Err(format!("fail {n}"))
        })
        .await;
        assert_eq!(result, Err("fail 4".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = retry_fixed_if(
            5,
            Duration::ZERO,
            "test",
            |e: &&str| *e != "permanent",
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("permanent")
            },
        )
        .await;
        assert_eq!(result, Err("permanent"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_attempts_still_runs_once() {
        let calls = AtomicU32::new(0);
        let _: Result<(), &str> = retry_fixed(0, Duration::ZERO, "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("no")
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
