//! Testing utilities including mock implementations.
//!
//! These drive the crawl pipeline without a browser, a vision service, or a
//! filesystem.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::config::ClipRegion;
use crate::cookies::Cookie;
use crate::error::{BrowserError, BrowserResult, CrawlError, CrawlResult};
use crate::traits::{
    BrowserPage, Challenge, ChallengeSolver, CookieStore, CrawlQueue, DocumentSink, PageProvider,
};
use crate::types::{DocumentRecord, Label};

// ============================================================================
// PAGE
// ============================================================================

/// Observable state of a [`MockPage`], mutable from scripted reactions.
#[derive(Debug, Clone, Default)]
pub struct PageState {
    pub url: String,
    pub title: String,
    /// Selectors that match an element
    pub elements: HashSet<String>,
    /// Inner HTML by selector
    pub html: HashMap<String, String>,
    /// Inner text by selector
    pub texts: HashMap<String, String>,
    /// Attribute values by (selector, name)
    pub attributes: HashMap<(String, String), String>,
    pub globals: HashMap<String, String>,
    pub content: String,
    pub cookies: Vec<Cookie>,
    /// Input values by selector
    pub fields: HashMap<String, String>,
    pub viewport_width: Option<f64>,
}

impl PageState {
    fn matches(&self, selector: &str) -> bool {
        self.elements.contains(selector)
            || self.html.contains_key(selector)
            || self.texts.contains_key(selector)
    }
}

/// Record of a call made to the mock page.
#[derive(Debug, Clone, PartialEq)]
pub enum PageCall {
    Reload,
    Click(String),
    Fill(String, String),
    Press(String, String),
    Screenshot(ClipRegion),
    AddCookies(usize),
    ClearCookies,
    Close,
}

type Reaction = Box<dyn Fn(&mut PageState) + Send + Sync>;

/// A scripted browser page.
///
/// Clicks, key presses and reloads can mutate the page state through
/// reactions, which is how tests model "submit the form, the title changes".
#[derive(Default)]
pub struct MockPage {
    state: Arc<RwLock<PageState>>,
    calls: Arc<RwLock<Vec<PageCall>>>,
    on_click: HashMap<String, Reaction>,
    on_press: HashMap<String, Reaction>,
    on_reload: Option<Reaction>,
    /// Remaining forced failures per selector
    failing_clicks: Arc<RwLock<HashMap<String, usize>>>,
    /// Delay before `content` and `global` answer
    latency: Option<Duration>,
}

impl MockPage {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        let page = Self::default();
        {
            let mut state = page.state.write().unwrap();
            state.url = url.into();
            state.title = title.into();
        }
        page
    }

    pub fn with_element(self, selector: impl Into<String>) -> Self {
        self.state.write().unwrap().elements.insert(selector.into());
        self
    }

    pub fn with_html(self, selector: impl Into<String>, html: impl Into<String>) -> Self {
        self.state
            .write()
            .unwrap()
            .html
            .insert(selector.into(), html.into());
        self
    }

    pub fn with_text(self, selector: impl Into<String>, text: impl Into<String>) -> Self {
        self.state
            .write()
            .unwrap()
            .texts
            .insert(selector.into(), text.into());
        self
    }

    pub fn with_attribute(
        self,
        selector: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.state
            .write()
            .unwrap()
            .attributes
            .insert((selector.into(), name.into()), value.into());
        self
    }

    pub fn with_global(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.state
            .write()
            .unwrap()
            .globals
            .insert(name.into(), value.into());
        self
    }

    pub fn with_content(self, html: impl Into<String>) -> Self {
        self.state.write().unwrap().content = html.into();
        self
    }

    pub fn with_cookies(self, cookies: Vec<Cookie>) -> Self {
        self.state.write().unwrap().cookies = cookies;
        self
    }

    pub fn with_viewport_width(self, width: f64) -> Self {
        self.state.write().unwrap().viewport_width = Some(width);
        self
    }

    /// Make page reads slow, e.g. to outlast a request timeout.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Run `reaction` after every successful click on `selector`.
    pub fn on_click<F>(mut self, selector: impl Into<String>, reaction: F) -> Self
    where
        F: Fn(&mut PageState) + Send + Sync + 'static,
    {
        self.on_click.insert(selector.into(), Box::new(reaction));
        self
    }

    /// Run `reaction` after every key press sent to `selector`.
    pub fn on_press<F>(mut self, selector: impl Into<String>, reaction: F) -> Self
    where
        F: Fn(&mut PageState) + Send + Sync + 'static,
    {
        self.on_press.insert(selector.into(), Box::new(reaction));
        self
    }

    pub fn on_reload<F>(mut self, reaction: F) -> Self
    where
        F: Fn(&mut PageState) + Send + Sync + 'static,
    {
        self.on_reload = Some(Box::new(reaction));
        self
    }

    /// Make the next `times` clicks on `selector` time out.
    pub fn failing_click(self, selector: impl Into<String>, times: usize) -> Self {
        self.failing_clicks
            .write()
            .unwrap()
            .insert(selector.into(), times);
        self
    }

    /// Get all calls made to this mock.
    pub fn calls(&self) -> Vec<PageCall> {
        self.calls.read().unwrap().clone()
    }

    /// Selectors of successful clicks, in order.
    pub fn clicked(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                PageCall::Click(selector) => Some(selector),
                _ => None,
            })
            .collect()
    }

    /// Current value of an input.
    pub fn filled(&self, selector: &str) -> Option<String> {
        self.state.read().unwrap().fields.get(selector).cloned()
    }

    pub fn state(&self) -> PageState {
        self.state.read().unwrap().clone()
    }

    async fn lag(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn record(&self, call: PageCall) {
        self.calls.write().unwrap().push(call);
    }

    fn react(&self, reaction: Option<&Reaction>) {
        if let Some(reaction) = reaction {
            let mut state = self.state.write().unwrap();
            reaction(&mut *state);
        }
    }

    fn try_click(&self, selector: &str, timeout: Duration) -> BrowserResult<()> {
        {
            let mut failing = self.failing_clicks.write().unwrap();
            if let Some(remaining) = failing.get_mut(selector).filter(|n| **n > 0) {
                *remaining -= 1;
                return Err(BrowserError::timeout(selector, timeout));
            }
        }
        if !self.state.read().unwrap().matches(selector) {
            return Err(BrowserError::timeout(selector, timeout));
        }
        self.record(PageCall::Click(selector.to_string()));
        self.react(self.on_click.get(selector));
        Ok(())
    }
}

#[async_trait]
impl BrowserPage for MockPage {
    async fn title(&self) -> BrowserResult<String> {
        Ok(self.state.read().unwrap().title.clone())
    }

    async fn url(&self) -> BrowserResult<String> {
        Ok(self.state.read().unwrap().url.clone())
    }

    async fn reload(&self) -> BrowserResult<()> {
        self.record(PageCall::Reload);
        self.react(self.on_reload.as_ref());
        Ok(())
    }

    async fn exists(&self, selector: &str) -> BrowserResult<bool> {
        Ok(self.state.read().unwrap().matches(selector))
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> BrowserResult<()> {
        if self.state.read().unwrap().matches(selector) {
            Ok(())
        } else {
            Err(BrowserError::timeout(selector, timeout))
        }
    }

    async fn click(&self, selector: &str, timeout: Duration) -> BrowserResult<()> {
        self.try_click(selector, timeout)
    }

    async fn click_with_text(
        &self,
        selector: &str,
        _text: &str,
        timeout: Duration,
    ) -> BrowserResult<()> {
        self.try_click(selector, timeout)
    }

    async fn fill(&self, selector: &str, value: &str) -> BrowserResult<()> {
        self.record(PageCall::Fill(selector.to_string(), value.to_string()));
        self.state
            .write()
            .unwrap()
            .fields
            .insert(selector.to_string(), value.to_string());
        Ok(())
    }

    async fn press(&self, selector: &str, key: &str) -> BrowserResult<()> {
        self.record(PageCall::Press(selector.to_string(), key.to_string()));
        self.react(self.on_press.get(selector));
        Ok(())
    }

    async fn inner_html(&self, selector: &str) -> BrowserResult<Option<String>> {
        Ok(self.state.read().unwrap().html.get(selector).cloned())
    }

    async fn inner_text(&self, selector: &str) -> BrowserResult<Option<String>> {
        Ok(self.state.read().unwrap().texts.get(selector).cloned())
    }

    async fn attribute(&self, selector: &str, name: &str) -> BrowserResult<Option<String>> {
        let key = (selector.to_string(), name.to_string());
        Ok(self.state.read().unwrap().attributes.get(&key).cloned())
    }

    async fn content(&self) -> BrowserResult<String> {
        self.lag().await;
        Ok(self.state.read().unwrap().content.clone())
    }

    async fn global(&self, name: &str) -> BrowserResult<Option<String>> {
        self.lag().await;
        Ok(self.state.read().unwrap().globals.get(name).cloned())
    }

    async fn viewport_width(&self) -> BrowserResult<Option<f64>> {
        Ok(self.state.read().unwrap().viewport_width)
    }

    async fn screenshot(&self, region: ClipRegion) -> BrowserResult<Vec<u8>> {
        self.record(PageCall::Screenshot(region));
        Ok(vec![0xff, 0xd8, 0xff, 0xe0])
    }

    async fn cookies(&self) -> BrowserResult<Vec<Cookie>> {
        Ok(self.state.read().unwrap().cookies.clone())
    }

    async fn add_cookies(&self, cookies: &[Cookie]) -> BrowserResult<()> {
        self.record(PageCall::AddCookies(cookies.len()));
        let mut state = self.state.write().unwrap();
        for cookie in cookies {
            state.cookies.retain(|c| c.name != cookie.name);
            state.cookies.push(cookie.clone());
        }
        Ok(())
    }

    async fn clear_cookies(&self) -> BrowserResult<()> {
        self.record(PageCall::ClearCookies);
        self.state.write().unwrap().cookies.clear();
        Ok(())
    }

    async fn close(&self) -> BrowserResult<()> {
        self.record(PageCall::Close);
        Ok(())
    }
}

type PageFactory = Box<dyn Fn() -> MockPage + Send + Sync>;

/// Hands out a fresh [`MockPage`] per `open`, built by a per-URL factory.
#[derive(Default)]
pub struct MockPageProvider {
    factories: HashMap<String, PageFactory>,
    opened: Arc<RwLock<Vec<(String, Arc<MockPage>)>>>,
}

impl MockPageProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page<F>(mut self, url: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> MockPage + Send + Sync + 'static,
    {
        self.factories.insert(url.into(), Box::new(factory));
        self
    }

    /// URLs opened so far, in order.
    pub fn opened(&self) -> Vec<String> {
        self.opened
            .read()
            .unwrap()
            .iter()
            .map(|(url, _)| url.clone())
            .collect()
    }

    /// Pages handed out so far, in order.
    pub fn pages(&self) -> Vec<Arc<MockPage>> {
        self.opened
            .read()
            .unwrap()
            .iter()
            .map(|(_, page)| page.clone())
            .collect()
    }
}

#[async_trait]
impl PageProvider for MockPageProvider {
    async fn open(&self, url: &Url) -> BrowserResult<Arc<dyn BrowserPage>> {
        let factory = self
            .factories
            .get(url.as_str())
            .ok_or_else(|| BrowserError::Navigation(format!("no mock page for {}", url)))?;
        let page = Arc::new(factory());
        self.opened
            .write()
            .unwrap()
            .push((url.to_string(), page.clone()));
        Ok(page as Arc<dyn BrowserPage>)
    }
}

// ============================================================================
// SOLVER + SESSION STORAGE
// ============================================================================

/// Returns the same answer for every challenge.
pub struct MockSolver {
    answer: Option<String>,
    failure: Option<Box<dyn Fn() -> CrawlError + Send + Sync>>,
    calls: AtomicUsize,
}

impl MockSolver {
    pub fn new(answer: Option<&str>) -> Self {
        Self {
            answer: answer.map(String::from),
            failure: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail every call with the error built by `failure`.
    pub fn failing<F>(failure: F) -> Self
    where
        F: Fn() -> CrawlError + Send + Sync + 'static,
    {
        Self {
            answer: None,
            failure: Some(Box::new(failure)),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChallengeSolver for MockSolver {
    async fn solve(&self, _challenge: &Challenge) -> CrawlResult<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = &self.failure {
            return Err(failure());
        }
        Ok(self.answer.clone())
    }
}

/// In-memory cookie file.
#[derive(Default)]
pub struct MemoryCookieStore {
    cookies: Arc<RwLock<Vec<Cookie>>>,
    saves: AtomicUsize,
    fail_load: bool,
}

impl MemoryCookieStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cookies(self, cookies: Vec<Cookie>) -> Self {
        *self.cookies.write().unwrap() = cookies;
        self
    }

    /// Make `load` fail like a corrupt file would.
    pub fn failing_load(mut self) -> Self {
        self.fail_load = true;
        self
    }

    pub fn saved(&self) -> Vec<Cookie> {
        self.cookies.read().unwrap().clone()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CookieStore for MemoryCookieStore {
    async fn load(&self) -> CrawlResult<Vec<Cookie>> {
        if self.fail_load {
            return Err(CrawlError::Config("mock cookie file is corrupt".into()));
        }
        Ok(self.cookies.read().unwrap().clone())
    }

    async fn save(&self, cookies: &[Cookie]) -> CrawlResult<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        *self.cookies.write().unwrap() = cookies.to_vec();
        Ok(())
    }

    async fn clear(&self) -> CrawlResult<()> {
        self.cookies.write().unwrap().clear();
        Ok(())
    }
}

// ============================================================================
// QUEUE + SINK
// ============================================================================

/// Records every enqueue verbatim, without dedup.
#[derive(Default)]
pub struct RecordingQueue {
    enqueued: Arc<RwLock<Vec<(Url, Label)>>>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<(Url, Label)> {
        self.enqueued.read().unwrap().clone()
    }

    /// URLs enqueued with `label`, as strings.
    pub fn urls(&self, label: Label) -> Vec<String> {
        self.all()
            .into_iter()
            .filter(|(_, l)| *l == label)
            .map(|(url, _)| url.to_string())
            .collect()
    }
}

#[async_trait]
impl CrawlQueue for RecordingQueue {
    async fn enqueue(&self, urls: Vec<Url>, label: Label) -> usize {
        let count = urls.len();
        self.enqueued
            .write()
            .unwrap()
            .extend(urls.into_iter().map(|url| (url, label)));
        count
    }
}

/// Keeps saved records in memory.
#[derive(Default)]
pub struct MemorySink {
    records: Arc<RwLock<Vec<DocumentRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<DocumentRecord> {
        self.records.read().unwrap().clone()
    }
}

#[async_trait]
impl DocumentSink for MemorySink {
    async fn save(&self, record: &DocumentRecord) -> CrawlResult<()> {
        record.identifier()?;
        self.records.write().unwrap().push(record.clone());
        Ok(())
    }
}
