//! In-process task queue.
//!
//! FIFO queue, visited set keyed by normalized URL, bounded concurrency,
//! a cap on accepted requests, and bounded retries. Only
//! [`HandlerOutcome::Retry`] re-schedules a request.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashSet;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, info_span, warn, Instrument};
use url::Url;

use crate::config::EngineConfig;
use crate::error::CrawlError;
use crate::frontier::normalize_url;
use crate::traits::{CrawlQueue, HandlerOutcome, RequestHandler};
use crate::types::{CrawlRequest, Label};

/// Counters reported when a crawl finishes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlStats {
    pub requests_total: usize,
    pub requests_succeeded: usize,
    pub requests_skipped: usize,
    pub requests_failed: usize,
    pub requests_retried: usize,
    /// Unique URLs dropped because the request cap was reached
    pub requests_over_limit: usize,
}

struct QueueState {
    pending: Mutex<VecDeque<CrawlRequest>>,
    seen: DashSet<String>,
    accepted: AtomicUsize,
    over_limit: AtomicUsize,
    max_requests: Option<usize>,
}

impl QueueState {
    fn admit(&self) -> bool {
        match self.max_requests {
            None => {
                self.accepted.fetch_add(1, Ordering::SeqCst);
                true
            }
            Some(max) => self
                .accepted
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    (n < max).then_some(n + 1)
                })
                .is_ok(),
        }
    }
}

#[async_trait]
impl CrawlQueue for QueueState {
    async fn enqueue(&self, urls: Vec<Url>, label: Label) -> usize {
        let mut added = Vec::new();
        for url in urls {
            if !self.seen.insert(normalize_url(&url)) {
                continue;
            }
            if !self.admit() {
                self.over_limit.fetch_add(1, Ordering::SeqCst);
                continue;
            }
            added.push(CrawlRequest::new(url, label));
        }

        let count = added.len();
        if count > 0 {
            self.pending.lock().await.extend(added);
        }
        count
    }
}

pub struct CrawlEngine {
    config: EngineConfig,
    queue: Arc<QueueState>,
}

impl CrawlEngine {
    pub fn new(config: EngineConfig) -> Self {
        let queue = Arc::new(QueueState {
            pending: Mutex::new(VecDeque::new()),
            seen: DashSet::new(),
            accepted: AtomicUsize::new(0),
            over_limit: AtomicUsize::new(0),
            max_requests: config.max_requests_per_crawl,
        });
        Self { config, queue }
    }

    /// Process the queue until it drains.
    pub async fn run(&self, handler: Arc<dyn RequestHandler>) -> CrawlStats {
        let start = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut tasks: JoinSet<(CrawlRequest, HandlerOutcome)> = JoinSet::new();
        let mut stats = CrawlStats::default();

        info!(
            max_concurrency = self.config.max_concurrency,
            max_requests = ?self.config.max_requests_per_crawl,
            max_retries = self.config.max_request_retries,
            "Starting crawl"
        );

        loop {
            while let Some(joined) = tasks.try_join_next() {
                self.absorb(joined, &mut stats).await;
            }

            let next = self.queue.pending.lock().await.pop_front();
            let Some(request) = next else {
                match tasks.join_next().await {
                    Some(joined) => {
                        self.absorb(joined, &mut stats).await;
                        continue;
                    }
                    None => break,
                }
            };

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let handler = handler.clone();
            let queue = self.queue.clone();
            let timeout = self.config.request_timeout;
            let span = info_span!(
                "request",
                url = %request.url,
                label = %request.label,
                retry_count = request.retry_count
            );

            tasks.spawn(
                async move {
                    let _permit = permit;
                    let outcome =
                        match tokio::time::timeout(timeout, handler.handle(&request, queue.as_ref()))
                            .await
                        {
                            Ok(outcome) => outcome,
                            Err(_) => HandlerOutcome::Retry(CrawlError::RequestTimeout(timeout)),
                        };
                    (request, outcome)
                }
                .instrument(span),
            );
        }

        stats.requests_over_limit = self.queue.over_limit.load(Ordering::SeqCst);
        info!(
            total = stats.requests_total,
            succeeded = stats.requests_succeeded,
            skipped = stats.requests_skipped,
            failed = stats.requests_failed,
            retried = stats.requests_retried,
            over_limit = stats.requests_over_limit,
            duration_ms = start.elapsed().as_millis() as u64,
            "Crawl finished"
        );
        stats
    }

    async fn absorb(
        &self,
        joined: Result<(CrawlRequest, HandlerOutcome), tokio::task::JoinError>,
        stats: &mut CrawlStats,
    ) {
        let (request, outcome) = match joined {
            Ok(done) => done,
            Err(e) => {
                error!(error = %e, "Request task panicked");
                stats.requests_total += 1;
                stats.requests_failed += 1;
                return;
            }
        };

        match outcome {
            HandlerOutcome::Done => {
                stats.requests_total += 1;
                stats.requests_succeeded += 1;
            }
            HandlerOutcome::Skipped(reason) => {
                info!(url = %request.url, reason = %reason, "Request skipped");
                stats.requests_total += 1;
                stats.requests_skipped += 1;
            }
            HandlerOutcome::Retry(e) if request.retry_count < self.config.max_request_retries => {
                warn!(
                    url = %request.url,
                    retry_count = request.retry_count,
                    error = %e,
                    "Request failed, retrying"
                );
                stats.requests_retried += 1;
                self.queue.pending.lock().await.push_back(request.retried());
            }
            HandlerOutcome::Retry(e) | HandlerOutcome::Failed(e) => {
                error!(
                    url = %request.url,
                    retry_count = request.retry_count,
                    error = %e,
                    "Request failed"
                );
                stats.requests_total += 1;
                stats.requests_failed += 1;
            }
        }
    }
}

#[async_trait]
impl CrawlQueue for CrawlEngine {
    async fn enqueue(&self, urls: Vec<Url>, label: Label) -> usize {
        self.queue.enqueue(urls, label).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::RwLock;

    /// Counts calls per URL and replays a scripted outcome.
    struct ScriptedHandler {
        calls: RwLock<Vec<(String, u32)>>,
        script: fn(&CrawlRequest) -> HandlerOutcome,
        links: Vec<Url>,
    }

    impl ScriptedHandler {
        fn new(script: fn(&CrawlRequest) -> HandlerOutcome) -> Self {
            Self {
                calls: RwLock::new(Vec::new()),
                script,
                links: Vec::new(),
            }
        }

        fn with_links(mut self, links: Vec<Url>) -> Self {
            self.links = links;
            self
        }

        fn calls(&self) -> Vec<(String, u32)> {
            self.calls.read().unwrap().clone()
        }
    }

    #[async_trait]
    impl RequestHandler for ScriptedHandler {
        async fn handle(&self, request: &CrawlRequest, queue: &dyn CrawlQueue) -> HandlerOutcome {
            self.calls
                .write()
                .unwrap()
                .push((request.url.to_string(), request.retry_count));
            if !self.links.is_empty() {
                queue.enqueue(self.links.clone(), Label::Detail).await;
            }
            (self.script)(request)
        }
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_urls_fetched_once() {
        let engine = CrawlEngine::new(EngineConfig::default().with_max_concurrency(3));
        let handler = Arc::new(
            ScriptedHandler::new(|_| HandlerOutcome::Done).with_links(vec![
                url("https://example.com/doc/a.aspx"),
                url("https://example.com/doc/a.aspx#top"),
                url("https://example.com/doc/b.aspx/"),
            ]),
        );

        engine
            .enqueue(vec![url("https://example.com/doc/b.aspx")], Label::Detail)
            .await;
        let stats = engine.run(handler.clone()).await;

        assert_eq!(stats.requests_total, 2);
        assert_eq!(stats.requests_succeeded, 2);
        assert_eq!(handler.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_retry_is_bounded() {
        let engine = CrawlEngine::new(EngineConfig::default().with_max_retries(2));
        let handler = Arc::new(ScriptedHandler::new(|_| {
            HandlerOutcome::Retry(CrawlError::AuthenticationLost)
        }));

        engine
            .enqueue(vec![url("https://example.com/doc/a.aspx")], Label::Detail)
            .await;
        let stats = engine.run(handler.clone()).await;

        let retry_counts: Vec<u32> = handler.calls().into_iter().map(|(_, n)| n).collect();
        assert_eq!(retry_counts, vec![0, 1, 2]);
        assert_eq!(stats.requests_retried, 2);
        assert_eq!(stats.requests_failed, 1);
    }

    #[tokio::test]
    async fn test_fatal_failure_not_retried() {
        let engine = CrawlEngine::new(EngineConfig::default());
        let handler = Arc::new(ScriptedHandler::new(|request| {
            HandlerOutcome::Failed(CrawlError::MissingIdentifier {
                url: request.url.to_string(),
            })
        }));

        engine
            .enqueue(vec![url("https://example.com/doc/a.aspx")], Label::Detail)
            .await;
        let stats = engine.run(handler.clone()).await;

        assert_eq!(handler.calls().len(), 1);
        assert_eq!(stats.requests_failed, 1);
        assert_eq!(stats.requests_retried, 0);
    }

    #[tokio::test]
    async fn test_request_cap() {
        let engine =
            CrawlEngine::new(EngineConfig::default().with_max_requests(Some(2)));

        let added = engine
            .enqueue(
                vec![
                    url("https://example.com/1.aspx"),
                    url("https://example.com/2.aspx"),
                    url("https://example.com/3.aspx"),
                ],
                Label::Detail,
            )
            .await;
        let stats = engine
            .run(Arc::new(ScriptedHandler::new(|_| HandlerOutcome::Done)))
            .await;

        assert_eq!(added, 2);
        assert_eq!(stats.requests_total, 2);
        assert_eq!(stats.requests_over_limit, 1);
    }

    #[tokio::test]
    async fn test_request_timeout_counts_as_retry() {
        struct Slow;

        #[async_trait]
        impl RequestHandler for Slow {
            async fn handle(&self, _: &CrawlRequest, _: &dyn CrawlQueue) -> HandlerOutcome {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                HandlerOutcome::Done
            }
        }

        let engine = CrawlEngine::new(
            EngineConfig::default()
                .with_max_retries(0)
                .with_request_timeout(std::time::Duration::from_millis(10)),
        );
        engine
            .enqueue(vec![url("https://example.com/slow.aspx")], Label::Detail)
            .await;
        let stats = engine.run(Arc::new(Slow)).await;

        assert_eq!(stats.requests_failed, 1);
    }
}
