//! Request and result types shared by the fetch pipeline.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{GlobalSettings, Website};

// ---------------------------------------------------------------------------
// FetchRequest
// ---------------------------------------------------------------------------

/// Per-call options. Fields left unset fall back to the global settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchOptions {
    pub timeout: Option<Duration>,
    pub user_agent: Option<String>,
    /// Extra request headers; these win over the fetcher's defaults.
    pub headers: BTreeMap<String, String>,
    pub retries: Option<u32>,
    /// Route the request through the headless browser.
    pub stealth: bool,
}

impl FetchOptions {
    /// Resolve options for a configured website: global settings first,
    /// then the site's overrides.
    pub fn for_website(settings: &GlobalSettings, site: &Website) -> Self {
        let mut opts = Self {
            stealth: settings.stealth.enabled,
            ..Self::default()
        };
        if let Some(custom) = &site.custom_settings {
            opts.timeout = custom.timeout_ms.map(Duration::from_millis);
            opts.user_agent = custom.user_agent.clone();
            opts.headers = custom.headers.clone();
            opts.retries = custom.retries;
            if let Some(stealth) = custom.use_stealth {
                opts.stealth = stealth;
            }
        }
        opts
    }
}

/// One fetch of one URL.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub url: String,
    pub options: FetchOptions,
}

impl FetchRequest {
    /// A request with default options.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            options: FetchOptions::default(),
        }
    }

    pub fn with_options(mut self, options: FetchOptions) -> Self {
        self.options = options;
        self
    }
}

// ---------------------------------------------------------------------------
// RawContent
// ---------------------------------------------------------------------------

/// What a fetcher hands back: the body plus what the server said about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawContent {
    /// Final URL after redirects.
    pub url: String,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub body: String,
}

impl RawContent {
    /// Content type without parameters, lowercased (`text/html; charset=utf-8` -> `text/html`).
    pub fn mime(&self) -> Option<String> {
        self.content_type.as_deref().map(|ct| {
            ct.split(';')
                .next()
                .unwrap_or(ct)
                .trim()
                .to_ascii_lowercase()
        })
    }
}

// ---------------------------------------------------------------------------
// FetchResult
// ---------------------------------------------------------------------------

/// An anchor found in the main content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub text: String,
    pub url: String,
}

/// Outcome of one successful page fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResult {
    pub url: String,
    pub title: String,
    /// The HTML (or other body) as received.
    pub raw_content: String,
    pub markdown: String,
    pub word_count: usize,
    pub reading_time_minutes: usize,
    /// `zh` or `en`.
    pub language: String,
    pub summary: String,
    pub extracted_images: Vec<String>,
    pub extracted_links: Vec<Link>,
    pub metadata: BTreeMap<String, String>,
    pub fetched_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// SearchHit
// ---------------------------------------------------------------------------

/// One ranked entry produced by relevance search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub name: String,
    pub url: String,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}
