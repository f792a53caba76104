//! Shared state for every fetch made by one process.
//!
//! A [`FetchContext`] is built once at start-up, handed by reference to the
//! pipeline and search functions, and torn down with
//! [`FetchContext::shutdown`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, warn};
use url::Url;

use webmark_fetch::{AdaptiveRateLimiter, ConcurrencyLimiter, Fetcher, HttpFetcher, RateLimiter};
use webmark_shared::{AppConfig, ConfigStore, GlobalSettings, Result, WebmarkError};

/// Process-wide request admission: either a fixed or a self-tuning bucket.
#[derive(Debug)]
enum GlobalLimiter {
    Fixed(RateLimiter),
    Adaptive(AdaptiveRateLimiter),
}

impl GlobalLimiter {
    fn from_settings(settings: &GlobalSettings) -> Self {
        let rate = &settings.rate_limit;
        if rate.adaptive {
            Self::Adaptive(AdaptiveRateLimiter::from_settings(rate))
        } else {
            Self::Fixed(RateLimiter::from_settings(rate))
        }
    }

    async fn consume(&self, n: u32) -> Result<()> {
        match self {
            Self::Fixed(l) => l.consume(n).await,
            Self::Adaptive(l) => l.consume(n).await,
        }
    }

    async fn available_tokens(&self) -> u32 {
        match self {
            Self::Fixed(l) => l.available_tokens().await,
            Self::Adaptive(l) => l.available_tokens().await,
        }
    }
}

/// Limiters, fetchers and configuration shared by all requests.
pub struct FetchContext {
    config: ConfigStore,
    limiter: GlobalLimiter,
    /// Dedicated buckets for hosts whose website sets `requests_per_second`.
    host_limiters: Mutex<HashMap<String, Arc<RateLimiter>>>,
    concurrency: ConcurrencyLimiter,
    http: Arc<dyn Fetcher>,
    stealth: Option<Arc<dyn Fetcher>>,
}

impl FetchContext {
    /// Build a context with the real HTTP fetcher, plus the headless browser
    /// fetcher when the `stealth` feature is compiled in.
    pub fn new(config: ConfigStore) -> Result<Self> {
        let snapshot = config.snapshot();
        let http: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(&snapshot.settings)?);
        let stealth = default_stealth(&snapshot.settings);
        Ok(Self::with_fetchers(config, http, stealth))
    }

    /// Build a context around caller-supplied fetchers.
    pub fn with_fetchers(
        config: ConfigStore,
        http: Arc<dyn Fetcher>,
        stealth: Option<Arc<dyn Fetcher>>,
    ) -> Self {
        let snapshot = config.snapshot();
        let settings = &snapshot.settings;
        let ctx = Self {
            limiter: GlobalLimiter::from_settings(settings),
            host_limiters: Mutex::new(HashMap::new()),
            concurrency: ConcurrencyLimiter::new(settings.concurrency.max_concurrent),
            http,
            stealth,
            config,
        };
        ctx.register_site_limiters(&snapshot);
        info!(
            max_concurrent = ctx.concurrency.max_concurrency(),
            adaptive = settings.rate_limit.adaptive,
            stealth = ctx.stealth.is_some(),
            "fetch context ready"
        );
        ctx
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> Arc<AppConfig> {
        self.config.snapshot()
    }

    pub fn config_store(&self) -> &ConfigStore {
        &self.config
    }

    pub fn concurrency(&self) -> &ConcurrencyLimiter {
        &self.concurrency
    }

    /// Tokens left in the global bucket.
    pub async fn available_tokens(&self) -> u32 {
        self.limiter.available_tokens().await
    }

    /// Install a dedicated bucket for `host`, replacing any existing one.
    pub fn set_host_limiter(&self, host: impl Into<String>, limiter: RateLimiter) {
        self.host_limiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(host.into(), Arc::new(limiter));
    }

    fn host_limiter(&self, url: &Url) -> Option<Arc<RateLimiter>> {
        let host = url.host_str()?;
        self.host_limiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(host)
            .cloned()
    }

    fn register_site_limiters(&self, config: &AppConfig) {
        for site in &config.websites {
            let Some(rps) = site
                .custom_settings
                .as_ref()
                .and_then(|c| c.requests_per_second)
                .filter(|r| *r > 0.0)
            else {
                continue;
            };
            let Some(host) = Url::parse(&site.url)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string))
            else {
                continue;
            };
            let burst = rps.ceil().max(1.0) as u32;
            debug!(site = %site.name, %host, rps, "per-host rate limit");
            self.set_host_limiter(host, RateLimiter::new(burst, rps));
        }
    }

    /// Take one token from the global bucket, then from the host's own
    /// bucket if it has one.
    pub(crate) async fn admit(&self, url: &Url) -> Result<()> {
        self.limiter.consume(1).await?;
        if let Some(limiter) = self.host_limiter(url) {
            limiter.consume(1).await?;
        }
        Ok(())
    }

    /// Feed an outcome to the adaptive limiter, if one is in use.
    pub(crate) async fn record_outcome(&self, success: bool) {
        if let GlobalLimiter::Adaptive(l) = &self.limiter {
            if success {
                l.record_success().await;
            } else {
                l.record_error().await;
            }
        }
    }

    /// The fetcher for a request. Without a browser fetcher, stealth requests
    /// go over plain HTTP.
    pub(crate) fn fetcher(&self, stealth: bool) -> &dyn Fetcher {
        match (&self.stealth, stealth) {
            (Some(browser), true) => browser.as_ref(),
            (None, true) => {
                warn!("stealth requested but no browser fetcher is available, using HTTP");
                self.http.as_ref()
            }
            _ => self.http.as_ref(),
        }
    }

    /// Stop admitting work and release fetcher resources.
    pub async fn shutdown(&self) {
        self.concurrency.close();
        self.http.shutdown().await;
        if let Some(stealth) = &self.stealth {
            stealth.shutdown().await;
        }
        info!("fetch context shut down");
    }

    /// Fail fast on a context that has been shut down.
    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.concurrency.is_closed() {
            return Err(WebmarkError::Closed("fetch context"));
        }
        Ok(())
    }
}

impl std::fmt::Debug for FetchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchContext")
            .field("limiter", &self.limiter)
            .field("concurrency", &self.concurrency)
            .field("http", &self.http.name())
            .field("stealth", &self.stealth.as_ref().map(|s| s.name()))
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "stealth")]
fn default_stealth(settings: &GlobalSettings) -> Option<Arc<dyn Fetcher>> {
    Some(Arc::new(webmark_fetch::StealthFetcher::new(settings)))
}

#[cfg(not(feature = "stealth"))]
fn default_stealth(_settings: &GlobalSettings) -> Option<Arc<dyn Fetcher>> {
    None
}
