//! Request routing by label.
//!
//! - `Start`: enqueue the search-result seeds as `List`.
//! - `List`: enqueue document links as `Detail` and pager links as `List`.
//! - `Detail`: fetch, extract, forward relations, save.

use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::CrawlerConfig;
use crate::error::CrawlResult;
use crate::extractor::DocumentExtractor;
use crate::fetch::{FetchOutcome, PageFetchOrchestrator};
use crate::frontier::{LinkFrontier, ListPageParser};
use crate::session::SessionManager;
use crate::traits::{
    BrowserPage, ChallengeSolver, CrawlQueue, DocumentSink, HandlerOutcome, PageProvider,
    RequestHandler,
};
use crate::types::{CrawlRequest, Label};

pub struct DocumentRouter {
    pages: Arc<dyn PageProvider>,
    orchestrator: PageFetchOrchestrator,
    extractor: DocumentExtractor,
    lists: ListPageParser,
    sink: Arc<dyn DocumentSink>,
    seed_urls: Vec<Url>,
}

impl DocumentRouter {
    pub fn new(
        config: &CrawlerConfig,
        pages: Arc<dyn PageProvider>,
        session: Arc<SessionManager>,
        solver: Arc<dyn ChallengeSolver>,
        sink: Arc<dyn DocumentSink>,
    ) -> CrawlResult<Self> {
        let orchestrator = PageFetchOrchestrator::new(
            session,
            solver,
            config.challenge.clone(),
            config.content.clone(),
            config.timeouts,
        );
        Ok(Self {
            pages,
            orchestrator,
            extractor: DocumentExtractor::new(&config.extractor)?,
            lists: ListPageParser::new(&config.list)?,
            sink,
            seed_urls: config.seed_urls.clone(),
        })
    }

    async fn handle_start(&self, queue: &dyn CrawlQueue) -> HandlerOutcome {
        info!("Starting crawler...");
        LinkFrontier::new(queue)
            .discover(self.seed_urls.clone(), Label::List)
            .await;
        HandlerOutcome::Done
    }

    async fn handle_list(&self, request: &CrawlRequest, queue: &dyn CrawlQueue) -> CrawlResult<()> {
        info!(url = %request.url, "Enqueuing document list...");

        let page = PageGuard::new(self.pages.open(&request.url).await?);
        let html = page.content().await;
        page.close().await;
        let html = html?;

        let frontier = LinkFrontier::new(queue);
        frontier
            .discover(self.lists.document_links(&html, &request.url), Label::Detail)
            .await;
        frontier
            .discover(self.lists.pager_links(&html, &request.url), Label::List)
            .await;
        Ok(())
    }

    async fn handle_detail(&self, request: &CrawlRequest, queue: &dyn CrawlQueue) -> HandlerOutcome {
        let page = match self.pages.open(&request.url).await {
            Ok(page) => PageGuard::new(page),
            Err(e) => return HandlerOutcome::from_error(e.into()),
        };
        let outcome = self.detail(&*page, request, queue).await;
        page.close().await;
        outcome
    }

    async fn detail(
        &self,
        page: &dyn BrowserPage,
        request: &CrawlRequest,
        queue: &dyn CrawlQueue,
    ) -> HandlerOutcome {
        let snapshot = match self.orchestrator.fetch(page, request).await {
            FetchOutcome::Ready(snapshot) => snapshot,
            FetchOutcome::Transient(e) => return HandlerOutcome::Retry(e),
            FetchOutcome::Fatal(e) => return HandlerOutcome::Failed(e),
        };

        let extraction = match self.extractor.extract(&snapshot) {
            Ok(extraction) => extraction,
            Err(e) => return HandlerOutcome::from_error(e),
        };

        LinkFrontier::new(queue)
            .forward_relations(&extraction.links)
            .await;

        if extraction.placeholder {
            info!(url = %request.url, "Document is not updated. Skipping...");
            return HandlerOutcome::Skipped("content not published yet".to_string());
        }

        match self.sink.save(&extraction.record).await {
            Ok(()) => HandlerOutcome::Done,
            Err(e) => HandlerOutcome::from_error(e),
        }
    }
}

/// Owns an open page for the length of one request.
///
/// `close` is the normal path. When the request future is dropped first (the
/// engine's request timeout), the page is closed from a spawned task instead.
struct PageGuard {
    page: Arc<dyn BrowserPage>,
    closed: bool,
}

impl PageGuard {
    fn new(page: Arc<dyn BrowserPage>) -> Self {
        Self {
            page,
            closed: false,
        }
    }

    async fn close(mut self) {
        self.closed = true;
        if let Err(e) = self.page.close().await {
            debug!(error = %e, "Failed to close page");
        }
    }
}

impl Deref for PageGuard {
    type Target = dyn BrowserPage;

    fn deref(&self) -> &Self::Target {
        self.page.as_ref()
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let page = self.page.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = page.close().await {
                        warn!(error = %e, "Failed to close abandoned page");
                    } else {
                        debug!("Closed abandoned page");
                    }
                });
            }
            Err(_) => warn!("No runtime to close abandoned page"),
        }
    }
}

#[async_trait]
impl RequestHandler for DocumentRouter {
    async fn handle(&self, request: &CrawlRequest, queue: &dyn CrawlQueue) -> HandlerOutcome {
        match request.label {
            Label::Start => self.handle_start(queue).await,
            Label::List => match self.handle_list(request, queue).await {
                Ok(()) => HandlerOutcome::Done,
                Err(e) => HandlerOutcome::from_error(e),
            },
            Label::Detail => self.handle_detail(request, queue).await,
        }
    }
}
