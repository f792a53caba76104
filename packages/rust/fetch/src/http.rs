//! Plain HTTP fetcher built on `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, USER_AGENT,
};
use tracing::{debug, instrument};
use url::Url;

use webmark_shared::{FetchOptions, GlobalSettings, RawContent, Result, WebmarkError};

use crate::Fetcher;

const DEFAULT_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,application/json;q=0.8,*/*;q=0.7";
const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// GET requests with browser-like headers.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    user_agent: String,
    timeout: Duration,
    success_below: u16,
}

impl HttpFetcher {
    pub fn new(settings: &GlobalSettings) -> Result<Self> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::limited(settings.max_redirects))
            .build()
            .map_err(|e| WebmarkError::network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            user_agent: settings.user_agent.clone(),
            timeout: Duration::from_millis(settings.timeout_ms),
            success_below: settings.success_status_below,
        })
    }

    fn headers(&self, options: &FetchOptions) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(DEFAULT_ACCEPT_LANGUAGE));

        let ua = options.user_agent.as_deref().unwrap_or(&self.user_agent);
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(ua)
                .map_err(|e| WebmarkError::validation(format!("invalid user agent: {e}")))?,
        );

        for (name, value) in &options.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| WebmarkError::validation(format!("invalid header {name:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| WebmarkError::validation(format!("invalid header value: {e}")))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    fn name(&self) -> &'static str {
        "http"
    }

    #[instrument(skip_all, fields(url = %url))]
    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<RawContent> {
        let parsed = Url::parse(url).map_err(|e| WebmarkError::invalid_url(url, e.to_string()))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(WebmarkError::invalid_url(url, "only http and https are supported"));
        }

        let response = self
            .client
            .get(parsed)
            .headers(self.headers(options)?)
            .timeout(options.timeout.unwrap_or(self.timeout))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    WebmarkError::network(format!("request timed out: {e}"))
                } else {
                    WebmarkError::network(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() >= self.success_below {
            return Err(WebmarkError::network(format!("HTTP {status}")));
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response
            .text()
            .await
            .map_err(|e| WebmarkError::network(format!("body read failed: {e}")))?;

        debug!(status = status.as_u16(), bytes = body.len(), "fetched");

        Ok(RawContent {
            url: final_url,
            status: status.as_u16(),
            content_type,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use wiremock::matchers::{header, header_exists, headers, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(&GlobalSettings::default()).unwrap()
    }

    #[tokio::test]
    async fn sends_browser_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .and(header_exists("user-agent"))
            // The matcher splits header values on commas.
            .and(headers("accept-language", vec!["en-US", "en;q=0.9"]))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html; charset=utf-8")
                    .set_body_string("<h1>Hi</h1>"),
            )
            .mount(&server)
            .await;

        let raw = fetcher()
            .fetch(&format!("{}/page", server.uri()), &FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(raw.status, 200);
        assert_eq!(raw.body, "<h1>Hi</h1>");
        assert_eq!(raw.mime().as_deref(), Some("text/html"));
    }

    #[tokio::test]
    async fn per_request_headers_override() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("user-agent", "custom-agent/1.0"))
            .and(header("x-token", "abc"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let options = FetchOptions {
            user_agent: Some("custom-agent/1.0".into()),
            headers: BTreeMap::from([("x-token".to_string(), "abc".to_string())]),
            ..FetchOptions::default()
        };
        let raw = fetcher().fetch(&server.uri(), &options).await.unwrap();
        assert_eq!(raw.body, "ok");
    }

    #[tokio::test]
    async fn error_status_is_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = fetcher()
            .fetch(&server.uri(), &FetchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WebmarkError::Network { .. }));
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn follows_redirects() {
        let server = MockServer::start().await;
        Mock::given(path("/old"))
            .respond_with(
                ResponseTemplate::new(301).insert_header("location", format!("{}/new", server.uri())),
            )
            .mount(&server)
            .await;
        Mock::given(path("/new"))
            .respond_with(ResponseTemplate::new(200).set_body_string("moved"))
            .mount(&server)
            .await;

        let raw = fetcher()
            .fetch(&format!("{}/old", server.uri()), &FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(raw.body, "moved");
        assert!(raw.url.ends_with("/new"));
    }

    #[tokio::test]
    async fn timeout_is_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let options = FetchOptions {
            timeout: Some(Duration::from_millis(50)),
            ..FetchOptions::default()
        };
        let err = fetcher().fetch(&server.uri(), &options).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn rejects_non_http_scheme() {
        let err = fetcher()
            .fetch("ftp://example.com/file", &FetchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WebmarkError::InvalidUrl { .. }));
    }
}
