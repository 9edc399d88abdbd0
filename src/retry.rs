//! Exponential backoff retry, shared by connection retry (C4), OAuth token
//! refresh (C6), and the background catch-up loop's per-folder error
//! tolerance (C9).

use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub factor: u32,
    pub max_delay: Duration,
}

impl RetryConfig {
    pub fn new(max_retries: u32, initial_delay: Duration, factor: u32, max_delay: Duration) -> Self {
        Self { max_retries, initial_delay, factor, max_delay }
    }

    /// Connection retry defaults from §4.4: base 5s, factor 3 (5s, 15s, 45s).
    pub fn connect_default() -> Self {
        Self::new(3, Duration::from_secs(5), 3, Duration::from_secs(45))
    }

    /// OAuth refresh defaults from §6: 3 retries, base 2s, factor 2.
    pub fn oauth_refresh_default() -> Self {
        Self::new(3, Duration::from_secs(2), 2, Duration::from_secs(30))
    }
}

/// Retry `operation` up to `config.max_retries` additional times after the
/// first attempt, with exponential backoff capped at `config.max_delay`.
/// `should_retry` lets the caller fail fast on non-retryable errors (e.g.
/// `AuthenticationFailed` must never retry regardless of remaining budget).
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    mut should_retry: impl FnMut(&E) -> bool,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempts = 0u32;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                attempts += 1;
                if attempts > config.max_retries || !should_retry(&e) {
                    return Err(e);
                }
                tracing::warn!(
                    attempt = attempts,
                    max = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after failure: {e}"
                );
                tokio::time::sleep(delay).await;
                delay = (delay * config.factor).min(config.max_delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_first_try_without_sleeping() {
        let config = RetryConfig::new(3, Duration::from_millis(5), 2, Duration::from_millis(50));
        let attempts = AtomicU32::new(0);
        let result: Result<i32, &str> = with_retry(&config, |_| true, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Ok(42) }
        })
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let config = RetryConfig::new(3, Duration::from_millis(5), 2, Duration::from_millis(50));
        let attempts = AtomicU32::new(0);
        let result: Result<i32, &str> = with_retry(&config, |_| true, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            async move { if n < 3 { Err("transient") } else { Ok(7) } }
        })
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_fails_fast() {
        let config = RetryConfig::new(5, Duration::from_millis(5), 2, Duration::from_millis(50));
        let attempts = AtomicU32::new(0);
        let result: Result<i32, &str> = with_retry(&config, |_| false, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err("authentication failed") }
        })
        .await;
        assert_eq!(result, Err("authentication failed"));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_retries_and_returns_last_error() {
        let config = RetryConfig::new(2, Duration::from_millis(5), 2, Duration::from_millis(50));
        let attempts = AtomicU32::new(0);
        let result: Result<i32, &str> = with_retry(&config, |_| true, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err("permanent") }
        })
        .await;
        assert_eq!(result, Err("permanent"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
