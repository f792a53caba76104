//! End-to-end fetch pipeline: URL → admission → fetch (with retries) → convert.
//!
//! Content recognised as an API description goes through `webmark-openapi`;
//! everything else is treated as HTML and runs extract → convert → analyze.

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use url::Url;

use webmark_fetch::{RetryPolicy, retry_if};
use webmark_markdown::{
    ContentExtractor, ConvertOptions, ExtractOptions, analyze, title_from_markdown,
};
use webmark_openapi::OpenApiDocument;
use webmark_shared::{
    ContentSettings, FetchOptions, FetchRequest, FetchResult, GlobalSettings, RawContent, Result,
    WebmarkError, Website,
};

use crate::context::FetchContext;

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// What one pipeline run produced.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetchOutcome {
    /// An HTML page converted to Markdown.
    Page(FetchResult),
    /// An OpenAPI / Swagger document.
    OpenApi {
        url: String,
        document: OpenApiDocument,
    },
}

impl FetchOutcome {
    pub fn url(&self) -> &str {
        match self {
            Self::Page(page) => &page.url,
            Self::OpenApi { url, .. } => url,
        }
    }

    /// Body Markdown: the converted page, or the API summary block.
    pub fn markdown(&self) -> &str {
        match self {
            Self::Page(page) => &page.markdown,
            Self::OpenApi { document, .. } => &document.formatted,
        }
    }

    /// Page title, or the API's `info.title`.
    pub fn title(&self) -> Option<&str> {
        match self {
            Self::Page(page) => Some(page.title.as_str()),
            Self::OpenApi { document, .. } => document
                .spec
                .get("info")
                .and_then(|i| i.get("title"))
                .and_then(|t| t.as_str()),
        }
    }

    pub fn summary(&self) -> &str {
        match self {
            Self::Page(page) => &page.summary,
            Self::OpenApi { document, .. } => &document.summary,
        }
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for batch operations.
pub trait ProgressReporter: Send + Sync {
    /// Called when work on `url` begins.
    fn started(&self, url: &str);
    /// Called when work on `url` ends, successfully or not.
    fn finished(&self, url: &str, success: bool);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn started(&self, _url: &str) {}
    fn finished(&self, _url: &str, _success: bool) {}
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Run the whole pipeline for one request.
///
/// Any failure comes back as [`WebmarkError::Fetch`] naming the URL.
#[instrument(skip_all, fields(url = %request.url))]
pub async fn fetch(ctx: &FetchContext, request: &FetchRequest) -> Result<FetchOutcome> {
    let result = async {
        let raw = fetch_raw(ctx, request).await?;
        let config = ctx.config();
        process(raw, &config.settings)
    }
    .await;

    match result {
        Ok(outcome) => {
            info!(kind = outcome_kind(&outcome), "fetch complete");
            Ok(outcome)
        }
        Err(e) => Err(e.at(&request.url)),
    }
}

/// Fetch the entry URL of a configured website with its overrides applied.
pub async fn fetch_website(ctx: &FetchContext, site: &Website) -> Result<FetchOutcome> {
    let config = ctx.config();
    let options = FetchOptions::for_website(&config.settings, site);
    fetch(ctx, &FetchRequest::new(&site.url).with_options(options)).await
}

/// Run several requests concurrently; results keep the input order.
///
/// Concurrency is bounded by the context's limiter, not by this function.
pub async fn fetch_all(
    ctx: &FetchContext,
    requests: &[FetchRequest],
    progress: &dyn ProgressReporter,
) -> Vec<Result<FetchOutcome>> {
    join_all(requests.iter().map(|request| async move {
        progress.started(&request.url);
        let result = fetch(ctx, request).await;
        progress.finished(&request.url, result.is_ok());
        result
    }))
    .await
}

/// Admission, bounded concurrency and retries around one fetcher call.
pub async fn fetch_raw(ctx: &FetchContext, request: &FetchRequest) -> Result<RawContent> {
    ctx.ensure_open()?;
    let url = Url::parse(&request.url)
        .map_err(|e| WebmarkError::invalid_url(&request.url, e.to_string()))?;

    ctx.admit(&url).await?;

    let config = ctx.config();
    let mut policy = RetryPolicy::from_settings(&config.settings.retry);
    if let Some(retries) = request.options.retries {
        policy = policy.with_retries(retries);
    }

    let fetcher = ctx.fetcher(request.options.stealth);
    let options = &request.options;
    let target = request.url.as_str();
    debug!(fetcher = fetcher.name(), retries = policy.retries, "fetching");

    ctx.concurrency()
        .run(retry_if(
            &policy,
            || async move {
                let result = fetcher.fetch(target, options).await;
                ctx.record_outcome(result.is_ok()).await;
                result
            },
            |err, attempt| warn!(attempt, error = %err, "fetch attempt failed"),
            WebmarkError::is_transient,
        ))
        .await
}

/// Turn fetched content into an outcome.
pub fn process(raw: RawContent, settings: &GlobalSettings) -> Result<FetchOutcome> {
    let content_type = raw.mime();
    if let Some(reason) = webmark_openapi::detect(&raw.body, content_type.as_deref(), &raw.url) {
        debug!(?reason, "API description detected");
        let document = webmark_openapi::process(&raw.body, Some(&raw.url))?;
        return Ok(FetchOutcome::OpenApi {
            url: raw.url,
            document,
        });
    }
    convert_page(raw, &settings.content).map(FetchOutcome::Page)
}

/// Extract, convert and analyze an HTML page.
pub fn convert_page(raw: RawContent, content: &ContentSettings) -> Result<FetchResult> {
    let base =
        Url::parse(&raw.url).map_err(|e| WebmarkError::invalid_url(&raw.url, e.to_string()))?;

    let extracted = ContentExtractor::new(ExtractOptions::from(content)).extract(&raw.body, &base);
    let options = ConvertOptions::from(content).with_base_url(base.clone());
    let markdown = webmark_markdown::convert(&extracted.content_html, &options)?;
    let analysis = analyze(&markdown, content.summary_length);

    let title = extracted
        .title
        .or_else(|| title_from_markdown(&markdown))
        .unwrap_or_else(|| base.host_str().unwrap_or(base.as_str()).to_string());

    debug!(
        %title,
        words = analysis.word_count,
        language = %analysis.language,
        "page converted"
    );

    Ok(FetchResult {
        url: raw.url,
        title,
        raw_content: raw.body,
        markdown,
        word_count: analysis.word_count,
        reading_time_minutes: analysis.reading_time_minutes,
        language: analysis.language,
        summary: analysis.summary,
        extracted_images: extracted.images,
        extracted_links: extracted.links,
        metadata: extracted.metadata,
        fetched_at: Utc::now(),
    })
}

fn outcome_kind(outcome: &FetchOutcome) -> &'static str {
    match outcome {
        FetchOutcome::Page(_) => "page",
        FetchOutcome::OpenApi { .. } => "openapi",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use webmark_fetch::{Fetcher, HttpFetcher};
    use webmark_shared::{AppConfig, ConfigStore};

    use crate::context::FetchContext;

    /// Config with one retry and millisecond backoff.
    pub(crate) fn fast_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.settings.timeout_ms = 2_000;
        config.settings.retry.retries = 1;
        config.settings.retry.min_timeout_ms = 1;
        config.settings.retry.max_timeout_ms = 5;
        config.settings.retry.randomize = false;
        config.settings.rate_limit.max_tokens = 100;
        config.settings.rate_limit.refill_per_sec = 100.0;
        config
    }

    pub(crate) fn context(config: AppConfig) -> FetchContext {
        let http: Arc<dyn Fetcher> =
            Arc::new(HttpFetcher::new(&config.settings).expect("http fetcher"));
        FetchContext::with_fetchers(ConfigStore::new(config), http, None)
    }

    pub(crate) fn article_page(title: &str, body: &str) -> String {
        format!(
            "<html><head><title>{title}</title></head><body>\
             <nav><a href=\"/\">Home</a> <a href=\"/about\">About us</a></nav>\
             <article><h1>{title}</h1><p>{body}</p>\
             <p>This paragraph carries enough ordinary prose to clear every content \
             threshold the extractor and converter apply to a page.</p></article>\
             <footer>Copyright footer text</footer></body></html>"
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::test_support::{article_page, context, fast_config};
    use super::*;

    #[tokio::test]
    async fn html_page_becomes_fetch_result() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/guide"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html; charset=utf-8")
                    .set_body_string(article_page("Getting Started", "Install the tool first.")),
            )
            .mount(&server)
            .await;

        let ctx = context(fast_config());
        let url = format!("{}/guide", server.uri());
        let outcome = fetch(&ctx, &FetchRequest::new(&url)).await.unwrap();

        let FetchOutcome::Page(page) = outcome else {
            panic!("expected a page");
        };
        assert_eq!(page.title, "Getting Started");
        assert!(page.markdown.contains("Install the tool first."));
        assert!(!page.markdown.contains("About us"));
        assert!(!page.markdown.contains("Copyright footer"));
        assert!(page.word_count > 0);
        assert!(page.reading_time_minutes >= 1);
        assert_eq!(page.language, "en");
        assert!(page.raw_content.contains("<nav>"));
    }

    #[tokio::test]
    async fn openapi_json_is_routed_to_processor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/openapi.json"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{"openapi":"3.0.0","info":{"title":"T","version":"1.0"},"paths":{"/a":{"get":{}}}}"#,
                "application/json",
            ))
            .mount(&server)
            .await;

        let ctx = context(fast_config());
        let url = format!("{}/openapi.json", server.uri());
        let outcome = fetch(&ctx, &FetchRequest::new(&url)).await.unwrap();

        assert!(matches!(outcome, FetchOutcome::OpenApi { .. }));
        assert!(outcome.markdown().contains("Total of **1** endpoints"));
        assert_eq!(outcome.title(), Some("T"));
    }

    #[tokio::test]
    async fn server_errors_are_retried_then_named() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let ctx = context(fast_config());
        let url = format!("{}/down", server.uri());
        let err = fetch(&ctx, &FetchRequest::new(&url)).await.unwrap_err();

        assert!(matches!(err, WebmarkError::Fetch { .. }));
        assert_eq!(err.attempts(), Some(2));
        let message = err.to_string();
        assert!(message.starts_with(&url));
        assert!(message.contains("503"));
    }

    #[tokio::test]
    async fn short_content_fails_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string("<html><body><p>tiny</p></body></html>"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let ctx = context(fast_config());
        let err = fetch(&ctx, &FetchRequest::new(server.uri()))
            .await
            .unwrap_err();

        let WebmarkError::Fetch { source, .. } = err else {
            panic!("expected Fetch error");
        };
        assert!(matches!(*source, WebmarkError::ContentLength { minimum: 50, .. }));
    }

    #[tokio::test]
    async fn request_retries_override_settings() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let ctx = context(fast_config());
        let request = FetchRequest::new(server.uri()).with_options(FetchOptions {
            retries: Some(0),
            ..FetchOptions::default()
        });
        let err = fetch(&ctx, &request).await.unwrap_err();
        assert_eq!(err.attempts(), Some(1));
    }

    #[tokio::test]
    async fn invalid_url_is_not_fetched() {
        let ctx = context(fast_config());
        let err = fetch(&ctx, &FetchRequest::new("not a url"))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("not a url: invalid URL"));
    }

    #[tokio::test]
    async fn fetch_all_keeps_order_and_reports_progress() {
        struct Recorder(Mutex<Vec<(String, bool)>>);
        impl ProgressReporter for Recorder {
            fn started(&self, _url: &str) {}
            fn finished(&self, url: &str, success: bool) {
                self.0.lock().unwrap().push((url.to_string(), success));
            }
        }

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string(article_page("Fine", "All good here.")),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(410))
            .mount(&server)
            .await;

        let ctx = context(fast_config());
        let requests = vec![
            FetchRequest::new(format!("{}/gone", server.uri())),
            FetchRequest::new(format!("{}/ok", server.uri())),
        ];
        let recorder = Recorder(Mutex::new(Vec::new()));
        let results = fetch_all(&ctx, &requests, &recorder).await;

        assert!(results[0].is_err());
        assert!(results[1].is_ok());
        let seen = recorder.0.into_inner().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().any(|(u, ok)| u.ends_with("/ok") && *ok));
        assert!(seen.iter().any(|(u, ok)| u.ends_with("/gone") && !*ok));
    }

    #[tokio::test]
    async fn closed_context_rejects_requests() {
        let ctx = context(fast_config());
        ctx.shutdown().await;
        let err = fetch(&ctx, &FetchRequest::new("https://example.com/"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("fetch context is closed"));
    }
}
