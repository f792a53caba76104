//! Scoped acquisition and release of headless-browser resources.

use async_trait::async_trait;
use tracing::warn;

use webmark_shared::Result;

/// A launched browser and the steps of one render inside it.
#[async_trait]
pub(crate) trait Session: Send {
    type Context: Clone + Send + Sync;
    type Page: Send + Sync;

    async fn open_context(&mut self) -> Result<Self::Context>;
    async fn open_page(&mut self, context: Self::Context) -> Result<Self::Page>;
    async fn render(&mut self, page: &Self::Page) -> Result<String>;
    async fn close_page(&mut self, page: Self::Page) -> Result<()>;
    async fn dispose_context(&mut self, context: Self::Context) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

/// Render in a fresh context and page, then release page, context and
/// browser in that order whatever failed along the way.
pub(crate) async fn scoped_render<S: Session>(session: &mut S) -> Result<String> {
    let result = match session.open_context().await {
        Ok(context) => {
            let result = match session.open_page(context.clone()).await {
                Ok(page) => {
                    let result = session.render(&page).await;
                    if let Err(e) = session.close_page(page).await {
                        warn!(error = %e, "failed to close page");
                    }
                    result
                }
                Err(e) => Err(e),
            };
            if let Err(e) = session.dispose_context(context).await {
                warn!(error = %e, "failed to dispose browser context");
            }
            result
        }
        Err(e) => Err(e),
    };

    if let Err(e) = session.close().await {
        warn!(error = %e, "failed to close browser");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use webmark_shared::WebmarkError;

    /// Records every step and fails the ones it is told to.
    #[derive(Default)]
    struct FakeSession {
        steps: Vec<&'static str>,
        fail: Vec<&'static str>,
    }

    impl FakeSession {
        fn failing(steps: &[&'static str]) -> Self {
            Self {
                fail: steps.to_vec(),
                ..Self::default()
            }
        }

        fn step(&mut self, name: &'static str) -> Result<()> {
            self.steps.push(name);
            if self.fail.contains(&name) {
                return Err(WebmarkError::network(format!("{name} failed")));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Session for FakeSession {
        type Context = u32;
        type Page = u32;

        async fn open_context(&mut self) -> Result<u32> {
            self.step("open_context").map(|_| 1)
        }
        async fn open_page(&mut self, _context: u32) -> Result<u32> {
            self.step("open_page").map(|_| 2)
        }
        async fn render(&mut self, _page: &u32) -> Result<String> {
            self.step("render").map(|_| "<html></html>".to_string())
        }
        async fn close_page(&mut self, _page: u32) -> Result<()> {
            self.step("close_page")
        }
        async fn dispose_context(&mut self, _context: u32) -> Result<()> {
            self.step("dispose_context")
        }
        async fn close(&mut self) -> Result<()> {
            self.step("close")
        }
    }

    const FULL_SEQUENCE: [&str; 6] = [
        "open_context",
        "open_page",
        "render",
        "close_page",
        "dispose_context",
        "close",
    ];

    #[tokio::test]
    async fn releases_in_reverse_order_on_success() {
        let mut session = FakeSession::default();
        let body = scoped_render(&mut session).await.unwrap();
        assert_eq!(body, "<html></html>");
        assert_eq!(session.steps, FULL_SEQUENCE);
    }

    #[tokio::test]
    async fn render_failure_still_releases_everything() {
        let mut session = FakeSession::failing(&["render", "close_page"]);
        let err = scoped_render(&mut session).await.unwrap_err();
        assert_eq!(err.to_string(), "network error: render failed");
        assert_eq!(session.steps, FULL_SEQUENCE);
    }

    #[tokio::test]
    async fn page_failure_disposes_context_and_browser() {
        let mut session = FakeSession::failing(&["open_page"]);
        assert!(scoped_render(&mut session).await.is_err());
        assert_eq!(
            session.steps,
            ["open_context", "open_page", "dispose_context", "close"]
        );
    }

    #[tokio::test]
    async fn context_failure_closes_browser() {
        let mut session = FakeSession::failing(&["open_context"]);
        assert!(scoped_render(&mut session).await.is_err());
        assert_eq!(session.steps, ["open_context", "close"]);
    }
}
