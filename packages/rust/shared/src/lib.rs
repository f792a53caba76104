//! Shared types, error model, and configuration for Webmark.
//!
//! This crate is the foundation depended on by all other Webmark crates.
//! It provides:
//! - [`WebmarkError`]: the unified error type
//! - Request/result types ([`FetchRequest`], [`RawContent`], [`FetchResult`], [`SearchHit`])
//! - Configuration ([`AppConfig`], [`Website`], [`ConfigStore`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ConcurrencySettings, ConfigStore, ContentSettings, DEFAULT_USER_AGENT,
    GlobalSettings, RateLimitSettings, RetrySettings, StealthSettings, Subscription, Website,
    WebsiteSettings, config_dir, config_file_path, init_config, load_config, load_config_from,
};
pub use error::{Result, WebmarkError};
pub use types::{FetchOptions, FetchRequest, FetchResult, Link, RawContent, SearchHit};
