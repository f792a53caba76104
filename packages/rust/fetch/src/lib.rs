//! Network acquisition for Webmark.
//!
//! Admission control ([`RateLimiter`], [`AdaptiveRateLimiter`],
//! [`ConcurrencyLimiter`]), bounded retries ([`retry`], [`retry_on_error`]),
//! and the [`Fetcher`] implementations that actually talk to servers.

pub mod concurrency;
pub mod http;
pub mod rate_limit;
pub mod retry;
#[cfg(any(feature = "stealth", test))]
mod session;
#[cfg(feature = "stealth")]
pub mod stealth;

use async_trait::async_trait;

use webmark_shared::{FetchOptions, RawContent, Result};

pub use concurrency::ConcurrencyLimiter;
pub use http::HttpFetcher;
pub use rate_limit::{AdaptiveRateLimiter, RateLimiter};
pub use retry::{ErrorPattern, RetryPolicy, retry, retry_if, retry_on_error, retry_with};
#[cfg(feature = "stealth")]
pub use stealth::StealthFetcher;

/// Something that turns a URL into a response body.
///
/// Implementations do one attempt per call; retries, rate limiting and
/// concurrency bounds are applied by the caller.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Fetch `url` once.
    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<RawContent>;

    /// Release any long-lived resources. The default does nothing.
    async fn shutdown(&self) {}
}
