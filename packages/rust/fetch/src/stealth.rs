//! Headless Chromium fetcher for sites that turn away plain HTTP clients.
//!
//! Every fetch runs in its own browser, browser context and page. Whatever
//! happens during navigation, the page is closed first, then the context is
//! disposed, then the browser is shut down.

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType,
};
use chromiumoxide::cdp::browser_protocol::network::{EnableParams, SetBlockedUrLsParams};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::Page;
use futures::StreamExt;
use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use webmark_shared::{
    FetchOptions, GlobalSettings, RawContent, Result, StealthSettings, WebmarkError,
};

use crate::session::{Session, scoped_render};
use crate::{Fetcher, RateLimiter};

const VIEWPORT_WIDTH: u32 = 1366;
const VIEWPORT_HEIGHT: u32 = 768;

const LAUNCH_ARGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--disable-infobars",
    "--disable-dev-shm-usage",
    "--no-first-run",
    "--no-default-browser-check",
    "--disable-extensions",
    "--disable-popup-blocking",
    "--disable-background-networking",
    "--disable-sync",
    "--disable-translate",
    "--window-size=1366,768",
];

/// Runs before any page script.
const STEALTH_JS: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'plugins', {
  get: () => [
    { name: 'Chrome PDF Plugin', filename: 'internal-pdf-viewer' },
    { name: 'Chrome PDF Viewer', filename: 'mhjfbmdgcfjbbpaeojofohoefgiehjai' },
    { name: 'Native Client', filename: 'internal-nacl-plugin' },
  ],
});
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
Object.defineProperty(navigator, 'hardwareConcurrency', { get: () => 8 });
Object.defineProperty(navigator, 'deviceMemory', { get: () => 8 });
window.chrome = window.chrome || { runtime: {} };
const originalQuery = window.navigator.permissions && window.navigator.permissions.query;
if (originalQuery) {
  window.navigator.permissions.query = (parameters) =>
    parameters.name === 'notifications'
      ? Promise.resolve({ state: Notification.permission })
      : originalQuery(parameters);
}
"#;

const BLOCKED_PATTERNS: &[&str] = &[
    "*.png", "*.jpg", "*.jpeg", "*.gif", "*.webp", "*.svg", "*.ico", "*.woff", "*.woff2",
    "*.ttf", "*.otf", "*.mp4", "*.webm", "*.mp3", "*.avi",
];

/// Fetcher that drives a real browser with anti-automation countermeasures.
#[derive(Debug)]
pub struct StealthFetcher {
    settings: StealthSettings,
    user_agent: String,
    timeout: Duration,
    limiter: RateLimiter,
}

impl StealthFetcher {
    pub fn new(settings: &GlobalSettings) -> Self {
        let rpm = settings.stealth.requests_per_minute.max(1);
        Self {
            settings: settings.stealth.clone(),
            user_agent: settings.user_agent.clone(),
            timeout: Duration::from_millis(settings.timeout_ms),
            limiter: RateLimiter::new(rpm, f64::from(rpm) / 60.0),
        }
    }

    async fn launch(&self) -> Result<(Browser, JoinHandle<()>)> {
        let mut builder = BrowserConfig::builder()
            .viewport(Some(Viewport {
                width: VIEWPORT_WIDTH,
                height: VIEWPORT_HEIGHT,
                device_scale_factor: Some(1.0),
                ..Default::default()
            }))
            .args(LAUNCH_ARGS.iter().copied());
        if !self.settings.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.settings.chrome_path {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(WebmarkError::BrowserInit)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| WebmarkError::BrowserInit(e.to_string()))?;
        let handle = tokio::spawn(async move { while handler.next().await.is_some() {} });
        Ok((browser, handle))
    }

    /// Navigate and read the rendered HTML. Does not release anything.
    async fn render(&self, page: &Page, url: &str, options: &FetchOptions) -> Result<String> {
        let ua = options.user_agent.as_deref().unwrap_or(&self.user_agent);
        page.set_user_agent(ua).await.map_err(cdp)?;
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(STEALTH_JS))
            .await
            .map_err(cdp)?;

        if self.settings.block_resources {
            page.execute(EnableParams::default()).await.map_err(cdp)?;
            let patterns = BLOCKED_PATTERNS.iter().map(|p| p.to_string()).collect();
            page.execute(SetBlockedUrLsParams::new(patterns))
                .await
                .map_err(cdp)?;
        }

        let timeout = options.timeout.unwrap_or(self.timeout);
        tokio::time::timeout(timeout, async {
            page.goto(url).await.map_err(cdp)?;
            page.wait_for_navigation().await.map_err(cdp)?;
            Ok::<_, WebmarkError>(())
        })
        .await
        .map_err(|_| WebmarkError::network(format!("navigation timed out after {timeout:?}")))??;

        self.act_human(page).await;

        page.content().await.map_err(cdp)
    }

    /// A few mouse moves and scrolls with small random pauses.
    async fn act_human(&self, page: &Page) {
        let moves = random_in(2, 5);
        for _ in 0..moves {
            let x = random_in(50, u64::from(VIEWPORT_WIDTH) - 50) as f64;
            let y = random_in(50, u64::from(VIEWPORT_HEIGHT) - 50) as f64;
            let event = DispatchMouseEventParams::new(DispatchMouseEventType::MouseMoved, x, y);
            if let Err(e) = page.execute(event).await {
                debug!(error = %e, "mouse move failed");
            }
            tokio::time::sleep(Duration::from_millis(random_in(50, 200))).await;
        }

        let scroll = random_in(200, 800);
        if let Err(e) = page.evaluate(format!("window.scrollBy(0, {scroll})")).await {
            debug!(error = %e, "scroll failed");
        }
        tokio::time::sleep(Duration::from_millis(random_in(300, 900))).await;
    }
}

#[async_trait]
impl Fetcher for StealthFetcher {
    fn name(&self) -> &'static str {
        "stealth"
    }

    #[instrument(skip_all, fields(url = %url))]
    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<RawContent> {
        self.limiter.consume(1).await?;

        let (browser, handler) = self.launch().await?;
        info!("browser launched");

        let mut session = ChromeSession {
            fetcher: self,
            browser,
            handler,
            url,
            options,
        };
        let body = scoped_render(&mut session).await?;
        Ok(RawContent {
            url: url.to_string(),
            status: 200,
            content_type: Some("text/html".into()),
            body,
        })
    }
}

struct ChromeSession<'a> {
    fetcher: &'a StealthFetcher,
    browser: Browser,
    handler: JoinHandle<()>,
    url: &'a str,
    options: &'a FetchOptions,
}

#[async_trait]
impl Session for ChromeSession<'_> {
    type Context = BrowserContextId;
    type Page = Page;

    async fn open_context(&mut self) -> Result<BrowserContextId> {
        let response = self
            .browser
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(|e| WebmarkError::BrowserInit(format!("browser context: {e}")))?;
        Ok(response.result.browser_context_id)
    }

    async fn open_page(&mut self, context: BrowserContextId) -> Result<Page> {
        let params = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context)
            .build()
            .map_err(WebmarkError::BrowserInit)?;
        self.browser
            .new_page(params)
            .await
            .map_err(|e| WebmarkError::BrowserInit(format!("new page: {e}")))
    }

    async fn render(&mut self, page: &Page) -> Result<String> {
        self.fetcher.render(page, self.url, self.options).await
    }

    async fn close_page(&mut self, page: Page) -> Result<()> {
        page.close().await.map_err(cdp)
    }

    async fn dispose_context(&mut self, context: BrowserContextId) -> Result<()> {
        self.browser
            .execute(DisposeBrowserContextParams::new(context))
            .await
            .map(|_| ())
            .map_err(cdp)
    }

    async fn close(&mut self) -> Result<()> {
        let closed = self.browser.close().await.map(|_| ()).map_err(cdp);
        if let Err(e) = self.browser.wait().await {
            debug!(error = %e, "browser process did not exit cleanly");
        }
        self.handler.abort();
        closed
    }
}

fn cdp(e: chromiumoxide::error::CdpError) -> WebmarkError {
    WebmarkError::network(format!("browser: {e}"))
}

fn random_in(lo: u64, hi: u64) -> u64 {
    rand::thread_rng().gen_range(lo..=hi)
}
