use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{ClearBrowserCookiesParams, CookieParam};
use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, Viewport};
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use super::{
    attribute_script, click_script, click_with_text_script, exists_script, fill_script,
    global_script, inner_html_script, inner_text_script,
};
use crate::config::ClipRegion;
use crate::cookies::Cookie;
use crate::error::{BrowserError, BrowserResult};
use crate::traits::{BrowserPage, PageProvider};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

fn protocol(e: impl std::fmt::Display) -> BrowserError {
    BrowserError::Protocol(e.to_string())
}

/// One Chromium tab.
#[derive(Debug, Clone)]
pub struct ChromiumPage {
    page: Page,
}

impl ChromiumPage {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    async fn eval<T: DeserializeOwned>(&self, script: String) -> BrowserResult<T> {
        self.page
            .evaluate(script)
            .await
            .map_err(protocol)?
            .into_value::<T>()
            .map_err(protocol)
    }

    /// Re-run `script` until it evaluates to `true` or `timeout` expires.
    async fn poll(&self, script: String, selector: &str, timeout: Duration) -> BrowserResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.eval::<bool>(script.clone()).await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::timeout(selector, timeout));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl BrowserPage for ChromiumPage {
    async fn title(&self) -> BrowserResult<String> {
        Ok(self
            .page
            .get_title()
            .await
            .map_err(protocol)?
            .unwrap_or_default())
    }

    async fn url(&self) -> BrowserResult<String> {
        Ok(self.page.url().await.map_err(protocol)?.unwrap_or_default())
    }

    async fn reload(&self) -> BrowserResult<()> {
        self.page
            .reload()
            .await
            .map_err(|e| BrowserError::Navigation(e.to_string()))?;
        Ok(())
    }

    async fn exists(&self, selector: &str) -> BrowserResult<bool> {
        self.eval(exists_script(selector)).await
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> BrowserResult<()> {
        self.poll(exists_script(selector), selector, timeout).await
    }

    async fn click(&self, selector: &str, timeout: Duration) -> BrowserResult<()> {
        self.poll(click_script(selector), selector, timeout).await
    }

    async fn click_with_text(
        &self,
        selector: &str,
        text: &str,
        timeout: Duration,
    ) -> BrowserResult<()> {
        self.poll(click_with_text_script(selector, text), selector, timeout)
            .await
    }

    async fn fill(&self, selector: &str, value: &str) -> BrowserResult<()> {
        if self.eval::<bool>(fill_script(selector, value)).await? {
            Ok(())
        } else {
            Err(BrowserError::NotFound(selector.to_string()))
        }
    }

    async fn press(&self, selector: &str, key: &str) -> BrowserResult<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| BrowserError::NotFound(selector.to_string()))?;
        element.focus().await.map_err(protocol)?;
        element.press_key(key).await.map_err(protocol)?;
        Ok(())
    }

    async fn inner_html(&self, selector: &str) -> BrowserResult<Option<String>> {
        self.eval(inner_html_script(selector)).await
    }

    async fn inner_text(&self, selector: &str) -> BrowserResult<Option<String>> {
        self.eval(inner_text_script(selector)).await
    }

    async fn attribute(&self, selector: &str, name: &str) -> BrowserResult<Option<String>> {
        self.eval(attribute_script(selector, name)).await
    }

    async fn content(&self) -> BrowserResult<String> {
        self.page.content().await.map_err(protocol)
    }

    async fn global(&self, name: &str) -> BrowserResult<Option<String>> {
        self.eval(global_script(name)).await
    }

    async fn viewport_width(&self) -> BrowserResult<Option<f64>> {
        self.eval("window.innerWidth".to_string()).await
    }

    async fn screenshot(&self, region: ClipRegion) -> BrowserResult<Vec<u8>> {
        let width = match region.width {
            Some(width) => width,
            None => self.viewport_width().await?.unwrap_or(1920.0),
        };
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Jpeg)
            .clip(Viewport {
                x: region.x,
                y: region.y,
                width,
                height: region.height,
                scale: 1.0,
            })
            .build();
        self.page.screenshot(params).await.map_err(protocol)
    }

    async fn cookies(&self) -> BrowserResult<Vec<Cookie>> {
        let cookies = self.page.get_cookies().await.map_err(protocol)?;
        let value = serde_json::to_value(cookies).map_err(protocol)?;
        serde_json::from_value(value).map_err(protocol)
    }

    async fn add_cookies(&self, cookies: &[Cookie]) -> BrowserResult<()> {
        let params = cookies
            .iter()
            .map(to_cookie_param)
            .collect::<BrowserResult<Vec<_>>>()?;
        self.page.set_cookies(params).await.map_err(protocol)?;
        debug!(count = cookies.len(), "Cookies added to browser context");
        Ok(())
    }

    async fn clear_cookies(&self) -> BrowserResult<()> {
        self.page
            .execute(ClearBrowserCookiesParams::default())
            .await
            .map_err(protocol)?;
        Ok(())
    }

    async fn close(&self) -> BrowserResult<()> {
        self.page.clone().close().await.map_err(protocol)
    }
}

/// Session cookies (`expires < 0`) are sent without an expiry.
fn to_cookie_param(cookie: &Cookie) -> BrowserResult<CookieParam> {
    let mut value = serde_json::to_value(cookie).map_err(protocol)?;
    if cookie.expires < 0.0 {
        if let Some(object) = value.as_object_mut() {
            object.remove("expires");
        }
    }
    serde_json::from_value(value).map_err(protocol)
}

/// Launches Chromium and opens one tab per request in its default context.
pub struct ChromiumProvider {
    browser: Mutex<Browser>,
    handler: JoinHandle<()>,
}

impl ChromiumProvider {
    pub async fn launch(headless: bool) -> BrowserResult<Self> {
        let mut builder = BrowserConfig::builder().window_size(1920, 1080);
        if !headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(BrowserError::Protocol)?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(protocol)?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!(error = %e, "Browser handler stopped");
                    break;
                }
            }
        });

        Ok(Self {
            browser: Mutex::new(browser),
            handler,
        })
    }

    pub async fn shutdown(self) {
        if let Err(e) = self.browser.lock().await.close().await {
            warn!(error = %e, "Failed to close browser");
        }
        self.handler.abort();
    }
}

#[async_trait]
impl PageProvider for ChromiumProvider {
    async fn open(&self, url: &Url) -> BrowserResult<Arc<dyn BrowserPage>> {
        let page = self
            .browser
            .lock()
            .await
            .new_page(url.as_str())
            .await
            .map_err(|e| BrowserError::Navigation(e.to_string()))?;
        page.wait_for_navigation()
            .await
            .map_err(|e| BrowserError::Navigation(e.to_string()))?;
        Ok(Arc::new(ChromiumPage::new(page)) as Arc<dyn BrowserPage>)
    }
}
