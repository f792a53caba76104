//! Token-bucket rate limiting.
//!
//! [`RateLimiter`] refills lazily: tokens are only added when somebody looks
//! at the bucket, in whole tokens, based on the time since the last refill.
//! [`AdaptiveRateLimiter`] wraps one and lowers its refill rate while a
//! server keeps failing, then walks it back up once things calm down.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use webmark_shared::{RateLimitSettings, Result, WebmarkError};

/// Lowest accepted refill rate, in tokens per second.
const MIN_REFILL_RATE: f64 = 0.001;

// ---------------------------------------------------------------------------
// RateLimiter
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
    refill_rate: f64,
}

impl Bucket {
    fn refill(&mut self, max_tokens: f64, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        let to_add = (elapsed * self.refill_rate).floor();
        if to_add < 1.0 {
            return;
        }

        let room = max_tokens - self.tokens;
        if to_add >= room {
            self.tokens = max_tokens;
            self.last_refill = now;
        } else {
            self.tokens += to_add;
            // Keep the fractional remainder for the next refill.
            self.last_refill += Duration::from_secs_f64(to_add / self.refill_rate);
        }
    }
}

/// Token bucket bounding requests per unit of time.
#[derive(Debug)]
pub struct RateLimiter {
    max_tokens: u32,
    max_wait: Option<Duration>,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// A full bucket of `max_tokens` refilled at `refill_per_sec`.
    pub fn new(max_tokens: u32, refill_per_sec: f64) -> Self {
        Self {
            max_tokens,
            max_wait: None,
            bucket: Mutex::new(Bucket {
                tokens: f64::from(max_tokens),
                last_refill: Instant::now(),
                refill_rate: refill_per_sec.max(MIN_REFILL_RATE),
            }),
        }
    }

    /// Build from the `[settings.rate_limit]` section.
    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        let limiter = Self::new(settings.max_tokens, settings.refill_per_sec);
        match settings.max_wait_ms {
            Some(ms) => limiter.with_max_wait(Duration::from_millis(ms)),
            None => limiter,
        }
    }

    /// Fail instead of sleeping when a `consume` would wait longer than `max_wait`.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    /// Take `n` tokens, waiting for the bucket to refill if necessary.
    ///
    /// Asking for more than the bucket can ever hold is an error, as is a wait
    /// longer than the configured maximum.
    pub async fn consume(&self, n: u32) -> Result<()> {
        if n > self.max_tokens {
            return Err(WebmarkError::RateLimit(format!(
                "requested {n} tokens but the bucket holds at most {}",
                self.max_tokens
            )));
        }

        let wanted = f64::from(n);
        let started = Instant::now();
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                bucket.refill(f64::from(self.max_tokens), Instant::now());
                if bucket.tokens >= wanted {
                    bucket.tokens -= wanted;
                    return Ok(());
                }
                Duration::from_secs_f64((wanted - bucket.tokens) / bucket.refill_rate)
            };

            if let Some(max_wait) = self.max_wait {
                if started.elapsed() + wait > max_wait {
                    return Err(WebmarkError::RateLimit(format!(
                        "waiting {}ms for {n} tokens exceeds the {}ms limit",
                        wait.as_millis(),
                        max_wait.as_millis()
                    )));
                }
            }

            debug!(tokens = n, wait_ms = wait.as_millis() as u64, "rate limited");
            tokio::time::sleep(wait).await;
        }
    }

    /// Whole tokens currently available. Refills first.
    pub async fn available_tokens(&self) -> u32 {
        let mut bucket = self.bucket.lock().await;
        bucket.refill(f64::from(self.max_tokens), Instant::now());
        bucket.tokens as u32
    }

    /// Current refill rate in tokens per second.
    pub async fn refill_rate(&self) -> f64 {
        self.bucket.lock().await.refill_rate
    }

    /// Change the refill rate. Time elapsed so far is credited at the old rate.
    pub async fn set_refill_rate(&self, refill_per_sec: f64) {
        let mut bucket = self.bucket.lock().await;
        bucket.refill(f64::from(self.max_tokens), Instant::now());
        bucket.refill_rate = refill_per_sec.max(MIN_REFILL_RATE);
    }
}

// ---------------------------------------------------------------------------
// AdaptiveRateLimiter
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Outcomes {
    errors: u32,
    successes: u32,
    last_error: Option<Instant>,
}

/// A [`RateLimiter`] whose refill rate follows the observed error history.
#[derive(Debug)]
pub struct AdaptiveRateLimiter {
    limiter: RateLimiter,
    baseline: f64,
    error_threshold: u32,
    window: Duration,
    outcomes: Mutex<Outcomes>,
}

impl AdaptiveRateLimiter {
    pub fn new(limiter: RateLimiter, baseline: f64, error_threshold: u32, window: Duration) -> Self {
        Self {
            limiter,
            baseline: baseline.max(MIN_REFILL_RATE),
            error_threshold,
            window,
            outcomes: Mutex::new(Outcomes::default()),
        }
    }

    /// Build from the `[settings.rate_limit]` section.
    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        Self::new(
            RateLimiter::from_settings(settings),
            settings.refill_per_sec,
            settings.error_threshold,
            Duration::from_millis(settings.adaptation_window_ms),
        )
    }

    pub async fn consume(&self, n: u32) -> Result<()> {
        self.limiter.consume(n).await
    }

    pub async fn available_tokens(&self) -> u32 {
        self.limiter.available_tokens().await
    }

    pub async fn current_rate(&self) -> f64 {
        self.limiter.refill_rate().await
    }

    /// The rate the limiter returns to when errors stop.
    pub fn baseline(&self) -> f64 {
        self.baseline
    }

    /// Note a failed request. Past the threshold the rate drops to
    /// `baseline / (errors - threshold + 1)`.
    pub async fn record_error(&self) {
        let mut outcomes = self.outcomes.lock().await;
        outcomes.errors += 1;
        outcomes.last_error = Some(Instant::now());

        if outcomes.errors > self.error_threshold {
            let divisor = f64::from(outcomes.errors - self.error_threshold + 1);
            let rate = self.baseline / divisor;
            warn!(
                errors = outcomes.errors,
                rate, "error threshold exceeded, throttling"
            );
            self.limiter.set_refill_rate(rate).await;
        }
    }

    /// Note a successful request. After a quiet window with enough successes
    /// the rate moves halfway back toward the baseline and the counters reset.
    pub async fn record_success(&self) {
        let mut outcomes = self.outcomes.lock().await;
        outcomes.successes += 1;

        let quiet = outcomes
            .last_error
            .is_none_or(|at| at.elapsed() >= self.window);
        if !quiet || outcomes.successes <= 10 {
            return;
        }

        let current = self.limiter.refill_rate().await;
        if current < self.baseline {
            let mut next = current + (self.baseline - current) / 2.0;
            if (self.baseline - next) / self.baseline <= 0.01 {
                next = self.baseline;
            }
            info!(from = current, to = next, "recovering request rate");
            self.limiter.set_refill_rate(next).await;
        }
        *outcomes = Outcomes::default();
    }
}
