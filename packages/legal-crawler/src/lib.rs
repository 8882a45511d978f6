//! Authenticated Legal Document Crawler
//!
//! Crawls a membership-gated legislative-document site: keeps a browser
//! session signed in, recovers from numeric CAPTCHA interstitials with a
//! vision model, follows each document's relation graph, and writes one JSON
//! record per document.
//!
//! # Usage
//!
//! ```rust,ignore
//! use legal_crawler::{CrawlEngine, CrawlerConfig, Credentials, DocumentRouter, Label};
//!
//! let config = CrawlerConfig::new(Credentials::new("reader", "secret", "member-42"));
//! let engine = CrawlEngine::new(config.engine.clone());
//! let router = DocumentRouter::new(&config, pages, session, solver, sink)?;
//!
//! engine.enqueue(vec![start_url], Label::Start).await;
//! let stats = engine.run(Arc::new(router)).await;
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Seams (browser page, cookie store, solver, queue, sink)
//! - [`session`] - Sign-in state machine and cookie persistence
//! - [`fetch`] - Per-document fetch with CAPTCHA recovery
//! - [`extractor`] - Metadata, relation panels, and content extraction
//! - [`frontier`] - URL normalization and link discovery
//! - [`engine`] - Bounded-concurrency task queue
//! - [`writer`] - Atomic JSON output
//! - [`testing`] - Mock implementations for testing

#[cfg(feature = "chromium")]
pub mod browser;

pub mod challenge;
pub mod config;
pub mod cookies;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod fetch;
pub mod fields;
pub mod frontier;
pub mod markdown;
pub mod router;
pub mod session;
pub mod testing;
pub mod traits;
pub mod types;
pub mod writer;

pub use challenge::VisionChallengeSolver;
pub use config::{
    ChallengeConfig, ClipRegion, ContentSelectors, CrawlerConfig, Credentials, EngineConfig,
    ExtractorSelectors, ListSelectors, SignInSelectors, SubmitMode, Timeouts,
};
pub use cookies::{Cookie, FileCookieStore};
pub use engine::{CrawlEngine, CrawlStats};
pub use error::{BrowserError, BrowserResult, CrawlError, CrawlResult};
pub use extractor::{DocumentExtractor, Extraction, RelationLink};
pub use fetch::{ContentSnapshot, FetchOutcome, PageFetchOrchestrator};
pub use frontier::{normalize_url, LinkFrontier, ListPageParser};
pub use router::DocumentRouter;
pub use session::{SessionManager, SignInPath};
pub use traits::{
    BrowserPage, Challenge, ChallengeSolver, CookieStore, CrawlQueue, DocumentSink,
    HandlerOutcome, MarkerProbe, PageProvider, RequestHandler, SessionProbe,
};
pub use types::{
    CrawlRequest, DocumentProperties, DocumentRecord, Label, RelatedDocument, RelationKind,
    Relations,
};
pub use writer::DocumentWriter;

#[cfg(feature = "chromium")]
pub use browser::{ChromiumPage, ChromiumProvider};
