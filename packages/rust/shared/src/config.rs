//! Application configuration for Webmark.
//!
//! User config lives at `~/.webmark/webmark.toml`.
//! CLI flags override config file values, which override defaults.
//!
//! The core never writes configuration. It reads an immutable snapshot per
//! operation from a [`ConfigStore`]; whoever owns the file (the CLI today)
//! pushes new snapshots with [`ConfigStore::replace`] and interested parties
//! observe them through [`ConfigStore::subscribe`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, WebmarkError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "webmark.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".webmark";

/// Browser-like User-Agent used when nothing else is configured.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

// ---------------------------------------------------------------------------
// Config structs (matching webmark.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global settings.
    #[serde(default)]
    pub settings: GlobalSettings,

    /// Configured websites, in the order they were declared.
    #[serde(default)]
    pub websites: Vec<Website>,
}

impl AppConfig {
    /// Websites that are switched on, in declaration order.
    pub fn enabled_websites(&self) -> impl Iterator<Item = &Website> {
        self.websites.iter().filter(|w| w.enabled)
    }

    /// Look up a website by name (case-insensitive).
    pub fn website(&self, name: &str) -> Option<&Website> {
        self.websites
            .iter()
            .find(|w| w.name.eq_ignore_ascii_case(name))
    }

    /// Reject values that would make the fetch pipeline misbehave.
    pub fn validate(&self) -> Result<()> {
        let s = &self.settings;
        if s.timeout_ms == 0 {
            return Err(WebmarkError::config("settings.timeout_ms must be > 0"));
        }
        if s.concurrency.max_concurrent == 0 {
            return Err(WebmarkError::config(
                "settings.concurrency.max_concurrent must be > 0",
            ));
        }
        if s.rate_limit.max_tokens == 0 || s.rate_limit.refill_per_sec <= 0.0 {
            return Err(WebmarkError::config(
                "settings.rate_limit needs max_tokens > 0 and refill_per_sec > 0",
            ));
        }
        if s.retry.factor < 1.0 {
            return Err(WebmarkError::config("settings.retry.factor must be >= 1"));
        }
        if s.content.max_length < s.content.min_length {
            return Err(WebmarkError::config(
                "settings.content.max_length must be >= min_length",
            ));
        }

        for site in &self.websites {
            let parsed = Url::parse(&site.url).map_err(|e| {
                WebmarkError::config(format!("website {:?} has invalid url: {e}", site.name))
            })?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(WebmarkError::config(format!(
                    "website {:?} must use http or https",
                    site.name
                )));
            }
        }
        Ok(())
    }
}

/// `[settings]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalSettings {
    /// Per-request network timeout.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// User-Agent sent by the plain HTTP fetcher.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Responses with a status at or above this value are failures.
    #[serde(default = "default_success_below")]
    pub success_status_below: u16,

    /// Maximum redirects followed by the plain HTTP fetcher.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    #[serde(default)]
    pub concurrency: ConcurrencySettings,

    #[serde(default)]
    pub content: ContentSettings,

    #[serde(default)]
    pub stealth: StealthSettings,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            user_agent: default_user_agent(),
            success_status_below: default_success_below(),
            max_redirects: default_max_redirects(),
            retry: RetrySettings::default(),
            rate_limit: RateLimitSettings::default(),
            concurrency: ConcurrencySettings::default(),
            content: ContentSettings::default(),
            stealth: StealthSettings::default(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    30_000
}
fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.into()
}
fn default_success_below() -> u16 {
    400
}
fn default_max_redirects() -> usize {
    5
}

/// `[settings.retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Retries after the first attempt.
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Exponential backoff factor.
    #[serde(default = "default_factor")]
    pub factor: f64,
    #[serde(default = "default_min_timeout_ms")]
    pub min_timeout_ms: u64,
    #[serde(default = "default_max_timeout_ms")]
    pub max_timeout_ms: u64,
    /// Scale each delay by a random factor in `[0.5, 1.5]`.
    #[serde(default = "default_true")]
    pub randomize: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            factor: default_factor(),
            min_timeout_ms: default_min_timeout_ms(),
            max_timeout_ms: default_max_timeout_ms(),
            randomize: true,
        }
    }
}

fn default_retries() -> u32 {
    3
}
fn default_factor() -> f64 {
    2.0
}
fn default_min_timeout_ms() -> u64 {
    1_000
}
fn default_max_timeout_ms() -> u64 {
    10_000
}

/// `[settings.rate_limit]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Bucket capacity (burst size).
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Tokens added per second.
    #[serde(default = "default_refill_per_sec")]
    pub refill_per_sec: f64,
    /// Slow down automatically after repeated failures.
    #[serde(default)]
    pub adaptive: bool,
    /// Errors tolerated before the adaptive limiter throttles.
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,
    /// Error-free period required before the rate recovers.
    #[serde(default = "default_adaptation_window_ms")]
    pub adaptation_window_ms: u64,
    /// Longest a caller will wait for tokens. Unbounded when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_wait_ms: Option<u64>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            refill_per_sec: default_refill_per_sec(),
            adaptive: false,
            error_threshold: default_error_threshold(),
            adaptation_window_ms: default_adaptation_window_ms(),
            max_wait_ms: None,
        }
    }
}

fn default_max_tokens() -> u32 {
    10
}
fn default_refill_per_sec() -> f64 {
    2.0
}
fn default_error_threshold() -> u32 {
    3
}
fn default_adaptation_window_ms() -> u64 {
    60_000
}

/// `[settings.concurrency]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencySettings {
    /// Maximum fetches in flight at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for ConcurrencySettings {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
        }
    }
}

fn default_max_concurrent() -> usize {
    5
}

/// `[settings.content]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentSettings {
    /// Converted Markdown shorter than this is rejected.
    #[serde(default = "default_min_length")]
    pub min_length: usize,
    /// Converted Markdown longer than this is truncated.
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    #[serde(default = "default_true")]
    pub remove_ads: bool,
    #[serde(default = "default_true")]
    pub remove_navigation: bool,
    #[serde(default = "default_true")]
    pub remove_footer: bool,
    #[serde(default = "default_true")]
    pub remove_sidebar: bool,
    /// Emit reading time, word count, language and summary lines.
    #[serde(default = "default_true")]
    pub include_metrics: bool,
    /// Target length of the extractive summary, in characters.
    #[serde(default = "default_summary_length")]
    pub summary_length: usize,
}

impl Default for ContentSettings {
    fn default() -> Self {
        Self {
            min_length: default_min_length(),
            max_length: default_max_length(),
            remove_ads: true,
            remove_navigation: true,
            remove_footer: true,
            remove_sidebar: true,
            include_metrics: true,
            summary_length: default_summary_length(),
        }
    }
}

fn default_min_length() -> usize {
    50
}
fn default_max_length() -> usize {
    100_000
}
fn default_summary_length() -> usize {
    200
}

/// `[settings.stealth]` section (headless browser path).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StealthSettings {
    /// Use the headless browser for every fetch, not just opted-in sites.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub headless: bool,
    /// Block images, fonts and media to speed up navigation.
    #[serde(default = "default_true")]
    pub block_resources: bool,
    /// Navigation budget of the browser's own rate limiter.
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    /// Explicit Chrome/Chromium executable. Auto-detected when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chrome_path: Option<String>,
}

impl Default for StealthSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            headless: true,
            block_resources: true,
            requests_per_minute: default_requests_per_minute(),
            chrome_path: None,
        }
    }
}

fn default_requests_per_minute() -> u32 {
    20
}
fn default_true() -> bool {
    true
}

/// `[[websites]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Website {
    /// Human-readable name.
    pub name: String,
    /// Entry URL fetched for this site.
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Per-site overrides of the global settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_settings: Option<WebsiteSettings>,
}

impl Website {
    /// Create an enabled website with no description or overrides.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            description: None,
            enabled: true,
            custom_settings: None,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// `[websites.custom_settings]` overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebsiteSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    /// Fetch this site through the headless browser.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_stealth: Option<bool>,
    /// Dedicated token bucket for this site's host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_second: Option<f64>,
}

// ---------------------------------------------------------------------------
// ConfigStore
// ---------------------------------------------------------------------------

type Listener = Arc<dyn Fn(&AppConfig) + Send + Sync>;

struct StoreInner {
    current: RwLock<Arc<AppConfig>>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
}

/// Shared holder of the current configuration snapshot.
///
/// Cheap to clone; all clones observe the same snapshot and subscribers.
#[derive(Clone)]
pub struct ConfigStore {
    inner: Arc<StoreInner>,
}

impl ConfigStore {
    /// Create a store holding `config`.
    pub fn new(config: AppConfig) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                current: RwLock::new(Arc::new(config)),
                listeners: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// The configuration as of now. Later replacements do not affect it.
    pub fn snapshot(&self) -> Arc<AppConfig> {
        self.inner
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Install a new configuration and notify subscribers.
    pub fn replace(&self, config: AppConfig) {
        let config = Arc::new(config);
        *self
            .inner
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = config.clone();

        // Call listeners outside the lock so they may subscribe/unsubscribe.
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        tracing::debug!(listeners = listeners.len(), "configuration replaced");
        for listener in listeners {
            listener(&config);
        }
    }

    /// Register `callback` to run after every [`replace`](Self::replace).
    ///
    /// The callback stays registered until the returned [`Subscription`] is
    /// dropped or explicitly unsubscribed.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&AppConfig) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));
        Subscription {
            id,
            store: Arc::downgrade(&self.inner),
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(AppConfig::default())
    }
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

/// Handle returned by [`ConfigStore::subscribe`].
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    store: Weak<StoreInner>,
}

impl Subscription {
    /// Detach the callback. Equivalent to dropping the handle.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(store) = self.store.upgrade() {
            store
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(id, _)| *id != self.id);
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.webmark/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| WebmarkError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.webmark/webmark.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load and validate the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| WebmarkError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        WebmarkError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    config.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| WebmarkError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| WebmarkError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| WebmarkError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("timeout_ms"));
        assert!(toml_str.contains("refill_per_sec"));
    }

    #[test]
    fn config_with_websites() {
        let toml_str = r#"
[settings]
timeout_ms = 5000

[settings.rate_limit]
max_tokens = 3

[[websites]]
name = "Rust Docs"
url = "https://doc.rust-lang.org/book/"
description = "The Rust programming language book"

[[websites]]
name = "Legacy"
url = "https://legacy.example.com"
enabled = false

[websites.custom_settings]
use_stealth = true
requests_per_second = 0.5
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        config.validate().expect("valid");
        assert_eq!(config.settings.timeout_ms, 5000);
        assert_eq!(config.settings.rate_limit.max_tokens, 3);
        assert_eq!(config.settings.rate_limit.refill_per_sec, 2.0);
        assert_eq!(config.websites.len(), 2);
        assert!(config.websites[0].enabled);

        let legacy = config.website("legacy").expect("lookup");
        let custom = legacy.custom_settings.as_ref().expect("custom settings");
        assert_eq!(custom.use_stealth, Some(true));

        let enabled: Vec<_> = config.enabled_websites().map(|w| w.name.as_str()).collect();
        assert_eq!(enabled, vec!["Rust Docs"]);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.settings.concurrency.max_concurrent = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.websites.push(Website::new("ftp", "ftp://example.com"));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("http or https"));
    }

    #[test]
    fn store_snapshot_is_stable() {
        let store = ConfigStore::default();
        let before = store.snapshot();

        let mut next = AppConfig::default();
        next.websites.push(Website::new("a", "https://a.example.com"));
        store.replace(next);

        assert!(before.websites.is_empty());
        assert_eq!(store.snapshot().websites.len(), 1);
    }

    #[test]
    fn subscribe_and_unsubscribe() {
        let store = ConfigStore::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let sub = store.subscribe(move |cfg| {
            assert_eq!(cfg.settings.timeout_ms, 1234);
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(store.subscriber_count(), 1);

        let mut next = AppConfig::default();
        next.settings.timeout_ms = 1234;
        store.replace(next.clone());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        sub.unsubscribe();
        assert_eq!(store.subscriber_count(), 0);
        store.replace(next);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
