//! Page fetch orchestrator.
//!
//! Drives one document page from `Start` to `ContentReady`:
//!
//! ```text
//! Start ──sign in──▶ Authenticated ──tabs──▶ ContentReady
//!                      │      ▲
//!             challenge│      │solved
//!                      ▼      │
//!                  ChallengeDetected
//! ```
//!
//! The challenge is solved at most once per attempt. A page that is still
//! challenged or signed out afterwards fails the attempt and the engine
//! schedules a fresh one from `Start`.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{ChallengeConfig, ContentSelectors, SubmitMode, Timeouts};
use crate::error::{CrawlError, CrawlResult};
use crate::session::SessionManager;
use crate::traits::{BrowserPage, Challenge, ChallengeSolver};
use crate::types::CrawlRequest;

const FALLBACK_VIEWPORT_WIDTH: f64 = 1920.0;

/// Markup captured from a page in the `ContentReady` state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentSnapshot {
    pub url: String,
    /// Page title at the time the content tabs were opened
    pub title: String,
    /// Full page HTML with the schema tab open
    pub schema_html: String,
    pub body_html: String,
    /// Empty when the secondary-language tab is absent or disabled
    pub body_html_en: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchState {
    Start,
    Authenticated,
    ChallengeDetected,
    ContentReady(ContentSnapshot),
}

/// Tagged result of one fetch attempt.
#[derive(Debug)]
pub enum FetchOutcome {
    Ready(ContentSnapshot),
    /// Worth another attempt from `Start`
    Transient(CrawlError),
    Fatal(CrawlError),
}

impl From<CrawlResult<ContentSnapshot>> for FetchOutcome {
    fn from(result: CrawlResult<ContentSnapshot>) -> Self {
        match result {
            Ok(snapshot) => FetchOutcome::Ready(snapshot),
            Err(e) if e.is_retryable() => FetchOutcome::Transient(e),
            Err(e) => FetchOutcome::Fatal(e),
        }
    }
}

pub struct PageFetchOrchestrator {
    session: Arc<SessionManager>,
    solver: Arc<dyn ChallengeSolver>,
    challenge: ChallengeConfig,
    content: ContentSelectors,
    timeouts: Timeouts,
}

impl PageFetchOrchestrator {
    pub fn new(
        session: Arc<SessionManager>,
        solver: Arc<dyn ChallengeSolver>,
        challenge: ChallengeConfig,
        content: ContentSelectors,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            session,
            solver,
            challenge,
            content,
            timeouts,
        }
    }

    pub async fn fetch(&self, page: &dyn BrowserPage, request: &CrawlRequest) -> FetchOutcome {
        self.run(page, request).await.into()
    }

    async fn run(
        &self,
        page: &dyn BrowserPage,
        request: &CrawlRequest,
    ) -> CrawlResult<ContentSnapshot> {
        let mut state = FetchState::Start;
        let mut solved = false;

        loop {
            state = match state {
                FetchState::Start => {
                    let path = self.session.ensure_signed_in(page).await?;
                    debug!(?path, "Authenticated");
                    FetchState::Authenticated
                }
                FetchState::Authenticated => {
                    let title = page.title().await?;
                    let url = page.url().await?;

                    if self.is_challenge(&title, &url) {
                        if solved {
                            return Err(CrawlError::ChallengeUnsolved {
                                reason: "challenge still present after submitting an answer"
                                    .to_string(),
                            });
                        }
                        FetchState::ChallengeDetected
                    } else {
                        if solved && !self.session.is_signed_in(page).await? {
                            return Err(CrawlError::AuthenticationLost);
                        }
                        info!(title = %title, retry_count = request.retry_count, "Document page");
                        FetchState::ContentReady(self.collect(page, title, url).await?)
                    }
                }
                FetchState::ChallengeDetected => {
                    self.resolve_challenge(page).await?;
                    solved = true;
                    FetchState::Authenticated
                }
                FetchState::ContentReady(snapshot) => return Ok(snapshot),
            };
        }
    }

    /// Challenge page title, signed-out landing title, or the verification path.
    pub fn is_challenge(&self, title: &str, url: &str) -> bool {
        self.challenge.titles.iter().any(|t| t == title)
            || url.contains(&self.challenge.verification_path)
    }

    async fn resolve_challenge(&self, page: &dyn BrowserPage) -> CrawlResult<()> {
        warn!("Challenge detected");

        let mut region = self.challenge.region;
        if region.width.is_none() {
            let width = page.viewport_width().await?;
            region.width = Some(width.unwrap_or(FALLBACK_VIEWPORT_WIDTH));
        }

        let screenshot = page.screenshot(region).await?;
        let answer = self
            .solver
            .solve(&Challenge::jpeg(screenshot))
            .await?
            .filter(|digits| !digits.is_empty());

        let Some(answer) = answer else {
            return Err(CrawlError::ChallengeUnsolved {
                reason: "solver returned no digits".to_string(),
            });
        };
        info!(answer = %answer, "Challenge answered");

        page.fill(&self.challenge.input, &answer).await?;
        match self.challenge.submit_mode {
            SubmitMode::Click => self.submit_by_click(page).await?,
            SubmitMode::Keyboard => page.press(&self.challenge.input, "Enter").await?,
            SubmitMode::Auto => {
                if page.exists(&self.challenge.submit_button).await? {
                    self.submit_by_click(page).await?;
                } else {
                    page.press(&self.challenge.input, "Enter").await?;
                }
            }
        }

        tokio::time::sleep(self.timeouts.settle).await;
        Ok(())
    }

    async fn submit_by_click(&self, page: &dyn BrowserPage) -> CrawlResult<()> {
        page.click(&self.challenge.submit_button, self.timeouts.tab)
            .await?;
        Ok(())
    }

    async fn collect(
        &self,
        page: &dyn BrowserPage,
        title: String,
        url: String,
    ) -> CrawlResult<ContentSnapshot> {
        let c = &self.content;
        let mut reloaded = false;

        self.open_tab(page, &c.schema_tab, &c.schema_container, &mut reloaded)
            .await?;
        let schema_html = page.content().await?;

        self.open_tab(page, &c.body_tab, &c.body_container, &mut reloaded)
            .await?;
        let body_html = page.inner_html(&c.body).await?.unwrap_or_default();

        let body_html_en = self.secondary_body(page, &mut reloaded).await;

        Ok(ContentSnapshot {
            url,
            title,
            schema_html,
            body_html,
            body_html_en,
        })
    }

    /// Click a tab and wait for its container. A failed click gets a reload
    /// and a second click, at most once across all tabs of one attempt.
    async fn open_tab(
        &self,
        page: &dyn BrowserPage,
        tab: &str,
        container: &str,
        reloaded: &mut bool,
    ) -> CrawlResult<()> {
        if let Err(e) = page.click(tab, self.timeouts.tab).await {
            if *reloaded {
                return Err(e.into());
            }
            warn!(tab, error = %e, "Tab click failed, reloading once");
            *reloaded = true;
            page.reload().await?;
            page.click(tab, self.timeouts.tab).await?;
        }
        page.wait_for(container, self.timeouts.tab).await?;
        Ok(())
    }

    /// Secondary-language body, or an empty string when it is not offered.
    async fn secondary_body(&self, page: &dyn BrowserPage, reloaded: &mut bool) -> String {
        let c = &self.content;

        let available = match page.exists(&c.secondary_tab).await {
            Ok(true) => page
                .attribute(&c.secondary_tab, &c.secondary_enabled_attr)
                .await
                .map(|value| value.as_deref() != Some("False"))
                .unwrap_or(false),
            _ => false,
        };

        if !available {
            warn!("English content is not available");
            return String::new();
        }

        let result = async {
            self.open_tab(page, &c.secondary_tab, &c.body_container, reloaded)
                .await?;
            Ok::<_, CrawlError>(page.inner_html(&c.body).await?.unwrap_or_default())
        }
        .await;

        result.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read English content");
            String::new()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Credentials, SignInSelectors};
    use crate::testing::{MemoryCookieStore, MockPage, MockSolver, PageCall};
    use crate::traits::MarkerProbe;
    use crate::types::Label;
    use openai_client::OpenAIError;
    use url::Url;

    const MARKER: &str = "member-42";
    const CAPTCHA_TITLE: &str = "THƯ VIỆN PHÁP LUẬT - Captcha";

    fn orchestrator(solver: Arc<MockSolver>, mode: SubmitMode) -> PageFetchOrchestrator {
        let session = SessionManager::new(
            Credentials::new("reader", "secret", MARKER),
            SignInSelectors::default(),
            Timeouts::immediate(),
            Arc::new(MarkerProbe::new("MemberGA", MARKER)),
            Arc::new(MemoryCookieStore::new()),
        );
        let challenge = ChallengeConfig {
            submit_mode: mode,
            ..ChallengeConfig::default()
        };
        PageFetchOrchestrator::new(
            Arc::new(session),
            solver,
            challenge,
            ContentSelectors::default(),
            Timeouts::immediate(),
        )
    }

    fn request() -> CrawlRequest {
        CrawlRequest::new(
            Url::parse("https://thuvienphapluat.vn/van-ban/Doanh-nghiep/Luat-Dau-tu-2020.aspx")
                .unwrap(),
            Label::Detail,
        )
    }

    fn document_page(title: &str) -> MockPage {
        let c = ContentSelectors::default();
        MockPage::new(
            "https://thuvienphapluat.vn/van-ban/Doanh-nghiep/Luat-Dau-tu-2020.aspx",
            title,
        )
        .with_global("MemberGA", MARKER)
        .with_element(&c.schema_tab)
        .with_element(&c.schema_container)
        .with_element(&c.body_tab)
        .with_element(&c.body_container)
        .with_html(&c.body, "<p>Điều 1</p>")
        .with_content("<html><body><div id=\"viewingDocument\"></div></body></html>")
    }

    #[test]
    fn test_challenge_detection() {
        let o = orchestrator(Arc::new(MockSolver::new(None)), SubmitMode::Auto);
        assert!(o.is_challenge(CAPTCHA_TITLE, "https://thuvienphapluat.vn/a.aspx"));
        assert!(o.is_challenge(
            "THƯ VIỆN PHÁP LUẬT _ Tra cứu, Nắm bắt Pháp Luật Việt Nam",
            "https://thuvienphapluat.vn/"
        ));
        assert!(o.is_challenge("Luật Đầu tư", "https://thuvienphapluat.vn/page/checkvb.aspx?x=1"));
        assert!(!o.is_challenge("Luật Đầu tư", "https://thuvienphapluat.vn/van-ban/a.aspx"));
    }

    #[tokio::test]
    async fn test_plain_page_reaches_content_ready() {
        let solver = Arc::new(MockSolver::new(Some("1234")));
        let page = document_page("Luật Đầu tư 2020");

        let outcome = orchestrator(solver.clone(), SubmitMode::Auto)
            .fetch(&page, &request())
            .await;

        let FetchOutcome::Ready(snapshot) = outcome else {
            panic!("expected content");
        };
        assert_eq!(snapshot.title, "Luật Đầu tư 2020");
        assert_eq!(snapshot.body_html, "<p>Điều 1</p>");
        assert_eq!(snapshot.body_html_en, "");
        assert_eq!(solver.call_count(), 0);
    }

    #[tokio::test]
    async fn test_challenge_submitted_by_keyboard() {
        let solver = Arc::new(MockSolver::new(Some("1234")));
        let input = ChallengeConfig::default().input;
        let page = document_page(CAPTCHA_TITLE).on_press(&input, |state| {
            state.title = "Luật Đầu tư 2020".into();
        });

        let outcome = orchestrator(solver.clone(), SubmitMode::Keyboard)
            .fetch(&page, &request())
            .await;

        assert!(matches!(outcome, FetchOutcome::Ready(_)));
        assert_eq!(page.filled(&input).as_deref(), Some("1234"));
        assert!(page
            .calls()
            .contains(&PageCall::Press(input.clone(), "Enter".into())));
    }

    #[tokio::test]
    async fn test_screenshot_spans_viewport_width() {
        let solver = Arc::new(MockSolver::new(Some("1234")));
        let submit = ChallengeConfig::default().submit_button;
        let page = document_page(CAPTCHA_TITLE)
            .with_viewport_width(1280.0)
            .with_element(&submit)
            .on_click(&submit, |state| state.title = "Luật Đầu tư 2020".into());

        orchestrator(solver, SubmitMode::Auto)
            .fetch(&page, &request())
            .await;

        let region = page
            .calls()
            .into_iter()
            .find_map(|call| match call {
                PageCall::Screenshot(region) => Some(region),
                _ => None,
            })
            .unwrap();
        assert_eq!(region.y, 134.0);
        assert_eq!(region.height, 70.0);
        assert_eq!(region.width, Some(1280.0));
    }

    #[tokio::test]
    async fn test_challenge_persisting_after_answer_is_unsolved() {
        let solver = Arc::new(MockSolver::new(Some("1234")));
        let submit = ChallengeConfig::default().submit_button;
        let page = document_page(CAPTCHA_TITLE).with_element(&submit);

        let outcome = orchestrator(solver.clone(), SubmitMode::Auto)
            .fetch(&page, &request())
            .await;

        assert!(matches!(
            outcome,
            FetchOutcome::Transient(CrawlError::ChallengeUnsolved { .. })
        ));
        assert_eq!(solver.call_count(), 1);
    }

    #[tokio::test]
    async fn test_rejected_solver_key_is_fatal() {
        let solver = Arc::new(MockSolver::failing(|| {
            OpenAIError::Api {
                status: 401,
                message: "invalid api key".into(),
            }
            .into()
        }));
        let submit = ChallengeConfig::default().submit_button;
        let page = document_page(CAPTCHA_TITLE).with_element(&submit);

        let outcome = orchestrator(solver.clone(), SubmitMode::Auto)
            .fetch(&page, &request())
            .await;

        assert!(matches!(outcome, FetchOutcome::Fatal(CrawlError::Config(_))));
        assert_eq!(solver.call_count(), 1);
    }

    #[tokio::test]
    async fn test_overloaded_solver_is_transient() {
        let solver = Arc::new(MockSolver::failing(|| OpenAIError::Timeout.into()));
        let page = document_page(CAPTCHA_TITLE);

        let outcome = orchestrator(solver, SubmitMode::Auto)
            .fetch(&page, &request())
            .await;

        assert!(matches!(outcome, FetchOutcome::Transient(CrawlError::Solver(_))));
    }

    #[tokio::test]
    async fn test_tab_click_reloads_once() {
        let c = ContentSelectors::default();
        let page = document_page("Luật Đầu tư 2020").failing_click(&c.schema_tab, 1);

        let outcome = orchestrator(Arc::new(MockSolver::new(None)), SubmitMode::Auto)
            .fetch(&page, &request())
            .await;

        assert!(matches!(outcome, FetchOutcome::Ready(_)));
        let reloads = page
            .calls()
            .iter()
            .filter(|c| matches!(c, PageCall::Reload))
            .count();
        assert_eq!(reloads, 1);
    }

    #[tokio::test]
    async fn test_reload_shared_across_tabs() {
        let c = ContentSelectors::default();
        let page = document_page("Luật Đầu tư 2020")
            .failing_click(&c.schema_tab, 1)
            .failing_click(&c.body_tab, 1);

        let outcome = orchestrator(Arc::new(MockSolver::new(None)), SubmitMode::Auto)
            .fetch(&page, &request())
            .await;

        assert!(matches!(
            outcome,
            FetchOutcome::Transient(CrawlError::TransientNavigation(_))
        ));
        let reloads = page
            .calls()
            .iter()
            .filter(|c| matches!(c, PageCall::Reload))
            .count();
        assert_eq!(reloads, 1);
    }

    #[tokio::test]
    async fn test_tab_failing_twice_is_transient() {
        let c = ContentSelectors::default();
        let page = document_page("Luật Đầu tư 2020").failing_click(&c.body_tab, 2);

        let outcome = orchestrator(Arc::new(MockSolver::new(None)), SubmitMode::Auto)
            .fetch(&page, &request())
            .await;

        assert!(matches!(
            outcome,
            FetchOutcome::Transient(CrawlError::TransientNavigation(_))
        ));
    }

    #[tokio::test]
    async fn test_secondary_tab_read_when_enabled() {
        let c = ContentSelectors::default();
        let body = c.body.clone();
        let page = document_page("Luật Đầu tư 2020")
            .with_element(&c.secondary_tab)
            .with_attribute(&c.secondary_tab, &c.secondary_enabled_attr, "True")
            .on_click(&c.secondary_tab, move |state| {
                state.html.insert(body.clone(), "<p>Article 1</p>".into());
            });

        let outcome = orchestrator(Arc::new(MockSolver::new(None)), SubmitMode::Auto)
            .fetch(&page, &request())
            .await;

        let FetchOutcome::Ready(snapshot) = outcome else {
            panic!("expected content");
        };
        assert_eq!(snapshot.body_html, "<p>Điều 1</p>");
        assert_eq!(snapshot.body_html_en, "<p>Article 1</p>");
    }

    #[tokio::test]
    async fn test_disabled_secondary_tab_is_not_clicked() {
        let c = ContentSelectors::default();
        let page = document_page("Luật Đầu tư 2020")
            .with_element(&c.secondary_tab)
            .with_attribute(&c.secondary_tab, &c.secondary_enabled_attr, "False");

        let outcome = orchestrator(Arc::new(MockSolver::new(None)), SubmitMode::Auto)
            .fetch(&page, &request())
            .await;

        let FetchOutcome::Ready(snapshot) = outcome else {
            panic!("expected content");
        };
        assert_eq!(snapshot.body_html_en, "");
        assert!(!page.clicked().contains(&c.secondary_tab));
    }
}
