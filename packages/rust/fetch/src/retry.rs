//! Bounded retries with exponential backoff.
//!
//! Retrying is a plain higher-order function: hand [`retry`] a closure that
//! produces a fresh future per attempt.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use regex::Regex;
use tracing::{debug, warn};

use webmark_shared::{Result, RetrySettings, WebmarkError};

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `retries + 1` attempts in total.
    pub retries: u32,
    pub factor: f64,
    pub min_timeout: Duration,
    pub max_timeout: Duration,
    /// Scale each delay by a uniform factor in `[0.5, 1.5]`.
    pub randomize: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            factor: 2.0,
            min_timeout: Duration::from_millis(1_000),
            max_timeout: Duration::from_millis(10_000),
            randomize: true,
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            retries: settings.retries,
            factor: settings.factor,
            min_timeout: Duration::from_millis(settings.min_timeout_ms),
            max_timeout: Duration::from_millis(settings.max_timeout_ms),
            randomize: settings.randomize,
        }
    }

    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    #[must_use]
    pub fn with_randomize(mut self, randomize: bool) -> Self {
        self.randomize = randomize;
        self
    }

    #[must_use]
    pub fn with_timeouts(mut self, min: Duration, max: Duration) -> Self {
        self.min_timeout = min;
        self.max_timeout = max;
        self
    }

    /// Un-jittered delay before retry `k` (0-indexed):
    /// `min(min_timeout * factor^k, max_timeout)`.
    pub fn base_delay(&self, k: u32) -> Duration {
        let exp = self.factor.powi(k.min(i32::MAX as u32) as i32);
        let ms = self.min_timeout.as_millis() as f64 * exp;
        let capped = ms.min(self.max_timeout.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Delay before retry `k`, jittered when `randomize` is set.
    pub fn delay_for(&self, k: u32) -> Duration {
        let base = self.base_delay(k);
        if self.randomize {
            base.mul_f64(rand::thread_rng().gen_range(0.5..=1.5))
        } else {
            base
        }
    }
}

/// Run `op` until it succeeds or the policy's attempts are used up.
pub async fn retry<F, Fut, T>(policy: &RetryPolicy, op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_with(policy, op, |_, _| {}).await
}

/// Like [`retry`], calling `on_retry(error, attempt)` before each backoff.
/// `attempt` is the 1-based number of the attempt that just failed.
pub async fn retry_with<F, Fut, T, R>(policy: &RetryPolicy, op: F, on_retry: R) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    R: FnMut(&WebmarkError, u32),
{
    run(policy, op, on_retry, |_| true).await
}

/// A predicate on an error's message.
#[derive(Debug, Clone)]
pub enum ErrorPattern {
    Contains(String),
    Regex(Regex),
}

impl ErrorPattern {
    pub fn contains(needle: impl Into<String>) -> Self {
        Self::Contains(needle.into())
    }

    pub fn matches(&self, message: &str) -> bool {
        match self {
            Self::Contains(needle) => message.contains(needle.as_str()),
            Self::Regex(re) => re.is_match(message),
        }
    }
}

/// Retry only errors whose message matches one of `patterns`.
///
/// Any other error is returned as-is on the spot, without counting as a retry
/// and without a [`WebmarkError::RetryExhausted`] wrapper.
pub async fn retry_on_error<F, Fut, T>(
    policy: &RetryPolicy,
    patterns: &[ErrorPattern],
    op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    run(policy, op, |_, _| {}, |err| {
        let message = err.to_string();
        patterns.iter().any(|p| p.matches(&message))
    })
    .await
}

/// Retry while `retryable(error)` holds, calling `on_retry` before each backoff.
/// Other errors come back unwrapped, like in [`retry_on_error`].
pub async fn retry_if<F, Fut, T, R, P>(
    policy: &RetryPolicy,
    op: F,
    on_retry: R,
    retryable: P,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    R: FnMut(&WebmarkError, u32),
    P: Fn(&WebmarkError) -> bool,
{
    run(policy, op, on_retry, retryable).await
}

async fn run<F, Fut, T, R, P>(
    policy: &RetryPolicy,
    mut op: F,
    mut on_retry: R,
    retryable: P,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    R: FnMut(&WebmarkError, u32),
    P: Fn(&WebmarkError) -> bool,
{
    let attempts = policy.retries.saturating_add(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !retryable(&err) {
            debug!(attempt, error = %err, "error not retryable");
            return Err(err);
        }
        if attempt >= attempts {
            warn!(attempts, error = %err, "retries exhausted");
            return Err(WebmarkError::RetryExhausted {
                attempts,
                source: Box::new(err),
            });
        }

        on_retry(&err, attempt);
        let delay = policy.delay_for(attempt - 1);
        debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(retries: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_retries(retries)
            .with_timeouts(Duration::from_millis(1), Duration::from_millis(5))
            .with_randomize(false)
    }

    #[tokio::test]
    async fn permanent_failure_runs_r_plus_one_times() {
        for retries in [0, 1, 3] {
            let calls = Arc::new(AtomicU32::new(0));
            let counter = calls.clone();
            let err = retry(&fast(retries), || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(WebmarkError::network("HTTP 503"))
                }
            })
            .await
            .unwrap_err();

            assert_eq!(calls.load(Ordering::SeqCst), retries + 1);
            assert_eq!(err.attempts(), Some(retries + 1));
            assert!(err.to_string().contains("HTTP 503"));
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = &AtomicU32::new(0);
        let mut seen = Vec::new();
        let value = retry_with(
            &fast(3),
            || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(WebmarkError::network("reset"))
                } else {
                    Ok("done")
                }
            },
            |_, attempt| seen.push(attempt),
        )
        .await
        .unwrap();

        assert_eq!(value, "done");
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn backoff_formula() {
        let policy = RetryPolicy {
            retries: 5,
            factor: 2.0,
            min_timeout: Duration::from_millis(100),
            max_timeout: Duration::from_millis(1_000),
            randomize: false,
        };
        let delays: Vec<u64> = (0..5)
            .map(|k| policy.base_delay(k).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000]);
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
    }

    #[test]
    fn jitter_stays_in_range() {
        let policy = RetryPolicy::default();
        for k in 0..4 {
            let base = policy.base_delay(k).as_secs_f64();
            for _ in 0..50 {
                let d = policy.delay_for(k).as_secs_f64();
                assert!(d >= base * 0.5 - 1e-9 && d <= base * 1.5 + 1e-9);
            }
        }
    }

    #[tokio::test]
    async fn non_matching_error_propagates_unwrapped() {
        let calls = &AtomicU32::new(0);
        let patterns = [ErrorPattern::contains("timeout")];
        let err = retry_on_error(&fast(3), &patterns, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(WebmarkError::parse("bad json"))
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, WebmarkError::Parse { .. }));
    }

    #[tokio::test]
    async fn matching_errors_are_retried() {
        let calls = &AtomicU32::new(0);
        let patterns = [ErrorPattern::Regex(Regex::new(r"HTTP 5\d\d").unwrap())];
        let err = retry_on_error(&fast(2), &patterns, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(WebmarkError::network("HTTP 502"))
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.attempts(), Some(3));
    }

    #[tokio::test]
    async fn retry_if_skips_permanent_errors() {
        let calls = &AtomicU32::new(0);
        let retried = &AtomicU32::new(0);
        let err = retry_if(
            &fast(3),
            || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Err::<(), _>(WebmarkError::network("connection reset"))
                } else {
                    Err(WebmarkError::ContentLength {
                        length: 3,
                        minimum: 50,
                    })
                }
            },
            |_, _| {
                retried.fetch_add(1, Ordering::SeqCst);
            },
            WebmarkError::is_transient,
        )
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(retried.load(Ordering::SeqCst), 1);
        assert!(matches!(err, WebmarkError::ContentLength { .. }));
    }
}
