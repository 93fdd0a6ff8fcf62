//! Exponential-backoff retry for adapter HTTP calls, capped at a fixed
//! attempt count so one flaky provider response can't hang a sync
//! indefinitely.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::future::Future;
use std::time::Duration;

const MAX_ATTEMPTS: u32 = 10;

/// Retries `call` while `is_retryable` holds for the error it produced,
/// waiting an exponentially growing delay between attempts.
pub async fn retry<T, E, F, Fut, R>(mut call: F, is_retryable: R) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
{
    let mut backoff = ExponentialBackoff::default();
    let mut attempt = 0u32;

    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < MAX_ATTEMPTS && is_retryable(&err) => {
                attempt += 1;
                let delay = backoff.next_backoff().unwrap_or(Duration::from_secs(30));
                tracing::debug!(attempt, delay_ms = %delay.as_millis(), "retrying after transient adapter error");
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retrying_when_the_first_attempt_works() {
        let calls = AtomicU32::new(0);
        let result: Result<&str, &str> = retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("ok")
            },
            |_: &&str| true,
        )
        .await;
        assert_eq!(result, Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_a_retryable_error_until_it_succeeds() {
        let calls = AtomicU32::new(0);
        let result: Result<&str, &str> = retry(
            || async {
                let attempt = calls.fetch_add(1, Ordering::SeqCst);
                if attempt < 2 { Err("rate limited") } else { Ok("ok") }
            },
            |e: &&str| *e == "rate limited",
        )
        .await;
        assert_eq!(result, Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn a_non_retryable_error_surfaces_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<&str, &str> = retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("permanent failure")
            },
            |e: &&str| *e == "rate limited",
        )
        .await;
        assert_eq!(result, Err("permanent failure"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
