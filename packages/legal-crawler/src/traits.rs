use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::config::ClipRegion;
use crate::cookies::Cookie;
use crate::error::{BrowserResult, CrawlResult};
use crate::types::{CrawlRequest, DocumentRecord, Label};

// ============================================================================
// BROWSER: one live page in an automation engine
// ============================================================================

#[async_trait]
pub trait BrowserPage: Send + Sync {
    async fn title(&self) -> BrowserResult<String>;

    async fn url(&self) -> BrowserResult<String>;

    async fn reload(&self) -> BrowserResult<()>;

    /// Whether `selector` currently matches an element
    async fn exists(&self, selector: &str) -> BrowserResult<bool>;

    /// Wait until `selector` is attached to the DOM
    async fn wait_for(&self, selector: &str, timeout: Duration) -> BrowserResult<()>;

    /// Click the first match, waiting up to `timeout` for it to appear
    async fn click(&self, selector: &str, timeout: Duration) -> BrowserResult<()>;

    /// Click the first match whose text contains `text`
    async fn click_with_text(
        &self,
        selector: &str,
        text: &str,
        timeout: Duration,
    ) -> BrowserResult<()>;

    /// Replace the value of an input
    async fn fill(&self, selector: &str, value: &str) -> BrowserResult<()>;

    /// Send a key press (e.g. `Enter`) to an element
    async fn press(&self, selector: &str, key: &str) -> BrowserResult<()>;

    async fn inner_html(&self, selector: &str) -> BrowserResult<Option<String>>;

    async fn inner_text(&self, selector: &str) -> BrowserResult<Option<String>>;

    async fn attribute(&self, selector: &str, name: &str) -> BrowserResult<Option<String>>;

    /// Full document HTML
    async fn content(&self) -> BrowserResult<String>;

    /// Read a page-global variable as a string (`None` when undefined)
    async fn global(&self, name: &str) -> BrowserResult<Option<String>>;

    async fn viewport_width(&self) -> BrowserResult<Option<f64>>;

    /// JPEG screenshot of a region
    async fn screenshot(&self, region: ClipRegion) -> BrowserResult<Vec<u8>>;

    /// Cookies of the page's browser context
    async fn cookies(&self) -> BrowserResult<Vec<Cookie>>;

    async fn add_cookies(&self, cookies: &[Cookie]) -> BrowserResult<()>;

    async fn clear_cookies(&self) -> BrowserResult<()>;

    async fn close(&self) -> BrowserResult<()> {
        Ok(())
    }
}

/// Opens a page navigated to a URL, sharing one browser context.
#[async_trait]
pub trait PageProvider: Send + Sync {
    async fn open(&self, url: &Url) -> BrowserResult<Arc<dyn BrowserPage>>;
}

// ============================================================================
// SESSION: "is this client signed in according to the remote system"
// ============================================================================

#[async_trait]
pub trait SessionProbe: Send + Sync {
    async fn is_signed_in(&self, page: &dyn BrowserPage) -> BrowserResult<bool>;
}

/// Signed in when a page global equals the configured marker value.
#[derive(Debug, Clone)]
pub struct MarkerProbe {
    pub variable: String,
    pub expected: String,
}

impl MarkerProbe {
    pub fn new(variable: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            expected: expected.into(),
        }
    }
}

#[async_trait]
impl SessionProbe for MarkerProbe {
    async fn is_signed_in(&self, page: &dyn BrowserPage) -> BrowserResult<bool> {
        let value = page.global(&self.variable).await?;
        let signed_in = value.as_deref() == Some(self.expected.as_str());
        tracing::debug!(signed_in, "Session marker checked");
        Ok(signed_in)
    }
}

/// Durable cookie snapshot for one browser context.
#[async_trait]
pub trait CookieStore: Send + Sync {
    /// An empty vector means no session (missing or cleared file).
    async fn load(&self) -> CrawlResult<Vec<Cookie>>;

    async fn save(&self, cookies: &[Cookie]) -> CrawlResult<()>;

    async fn clear(&self) -> CrawlResult<()>;
}

// ============================================================================
// CHALLENGE: digits from a screenshot
// ============================================================================

/// A detected challenge waiting to be solved. Never persisted.
#[derive(Debug, Clone)]
pub struct Challenge {
    pub screenshot: Vec<u8>,
    pub mime: &'static str,
    /// Not known up front on the current site
    pub expected_digits: Option<usize>,
}

impl Challenge {
    pub fn jpeg(screenshot: Vec<u8>) -> Self {
        Self {
            screenshot,
            mime: "image/jpeg",
            expected_digits: None,
        }
    }
}

#[async_trait]
pub trait ChallengeSolver: Send + Sync {
    /// `Ok(None)` when the service produced no usable digits.
    async fn solve(&self, challenge: &Challenge) -> CrawlResult<Option<String>>;
}

// ============================================================================
// FRONTIER + OUTPUT
// ============================================================================

/// The task queue's intake. Dedup by normalized URL is the queue's job.
#[async_trait]
pub trait CrawlQueue: Send + Sync {
    /// Returns how many URLs were new to the queue.
    async fn enqueue(&self, urls: Vec<Url>, label: Label) -> usize;
}

#[async_trait]
pub trait DocumentSink: Send + Sync {
    async fn save(&self, record: &DocumentRecord) -> CrawlResult<()>;
}

// ============================================================================
// HANDLERS: what the engine runs per request
// ============================================================================

/// Tagged result of one handler invocation.
#[derive(Debug)]
pub enum HandlerOutcome {
    Done,
    /// Finished without output (e.g. unpublished document)
    Skipped(String),
    /// Schedule another attempt, up to the retry limit
    Retry(crate::error::CrawlError),
    /// Give up on this request
    Failed(crate::error::CrawlError),
}

impl HandlerOutcome {
    /// `Retry` for retryable errors, `Failed` otherwise.
    pub fn from_error(error: crate::error::CrawlError) -> Self {
        if error.is_retryable() {
            HandlerOutcome::Retry(error)
        } else {
            HandlerOutcome::Failed(error)
        }
    }
}

#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: &CrawlRequest, queue: &dyn CrawlQueue) -> HandlerOutcome;
}
