//! Sign-in state machine for one browser context.
//!
//! 1. Probe the live page; signed in → done.
//! 2. Load the persisted cookies, reload, probe again.
//! 3. Interactive sign-in (dismiss stale-session and promo dialogs, fill the
//!    form, acknowledge the post-login warning).
//! 4. Persist the resulting cookie set unconditionally.
//!
//! Steps 2-4 run under one async mutex, so a context shared by several
//! workers has a single cookie writer.

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::{CrawlerConfig, Credentials, SignInSelectors, Timeouts};
use crate::cookies::Cookie;
use crate::error::{CrawlError, CrawlResult};
use crate::traits::{BrowserPage, CookieStore, MarkerProbe, SessionProbe};

/// How `ensure_signed_in` reached the signed-in state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignInPath {
    AlreadySignedIn,
    RestoredFromCookies,
    Interactive,
}

/// Last observed session state.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub signed_in: bool,
    pub cookie_jar: Vec<Cookie>,
}

pub struct SessionManager {
    credentials: Credentials,
    selectors: SignInSelectors,
    timeouts: Timeouts,
    probe: Arc<dyn SessionProbe>,
    cookies: Arc<dyn CookieStore>,
    state: RwLock<SessionState>,
    sign_in_lock: Mutex<()>,
}

impl SessionManager {
    pub fn new(
        credentials: Credentials,
        selectors: SignInSelectors,
        timeouts: Timeouts,
        probe: Arc<dyn SessionProbe>,
        cookies: Arc<dyn CookieStore>,
    ) -> Self {
        Self {
            credentials,
            selectors,
            timeouts,
            probe,
            cookies,
            state: RwLock::new(SessionState::default()),
            sign_in_lock: Mutex::new(()),
        }
    }

    /// Probe the configured session-marker global for the configured account.
    pub fn from_config(config: &CrawlerConfig, cookies: Arc<dyn CookieStore>) -> Self {
        let probe = MarkerProbe::new(
            &config.sign_in.marker_variable,
            &config.credentials.session_marker,
        );
        Self::new(
            config.credentials.clone(),
            config.sign_in.clone(),
            config.timeouts,
            Arc::new(probe),
            cookies,
        )
    }

    pub async fn snapshot(&self) -> SessionState {
        self.state.read().await.clone()
    }

    pub async fn is_signed_in(&self, page: &dyn BrowserPage) -> CrawlResult<bool> {
        Ok(self.probe.is_signed_in(page).await?)
    }

    /// Make sure `page` is signed in, re-verifying rather than trusting state.
    pub async fn ensure_signed_in(&self, page: &dyn BrowserPage) -> CrawlResult<SignInPath> {
        if self.probe.is_signed_in(page).await? {
            self.state.write().await.signed_in = true;
            return Ok(SignInPath::AlreadySignedIn);
        }

        let _guard = self.sign_in_lock.lock().await;

        let restored = self.load_cookies().await;
        if !restored.is_empty() {
            page.add_cookies(&restored).await?;
        }
        page.reload().await?;

        if self.probe.is_signed_in(page).await? {
            info!("Session restored from saved cookies");
            let mut state = self.state.write().await;
            state.signed_in = true;
            state.cookie_jar = restored;
            return Ok(SignInPath::RestoredFromCookies);
        }

        tokio::time::sleep(self.timeouts.sign_in_pause).await;
        self.sign_in(page).await?;

        let jar = page.cookies().await?;
        self.cookies.save(&jar).await?;

        let signed_in = self.probe.is_signed_in(page).await?;
        {
            let mut state = self.state.write().await;
            state.signed_in = signed_in;
            state.cookie_jar = jar;
        }

        if !signed_in {
            warn!("Still signed out after interactive sign-in");
            return Err(CrawlError::AuthenticationLost);
        }

        info!(username = %self.credentials.username, "Signed in");
        Ok(SignInPath::Interactive)
    }

    /// Drop browser cookies and truncate the cookie file.
    pub async fn clear_session(&self, page: &dyn BrowserPage) -> CrawlResult<()> {
        let _guard = self.sign_in_lock.lock().await;
        page.clear_cookies().await?;
        self.cookies.clear().await?;
        *self.state.write().await = SessionState::default();
        info!("Session cleared");
        Ok(())
    }

    /// A missing or corrupt cookie file means "not signed in", never an error.
    async fn load_cookies(&self) -> Vec<Cookie> {
        match self.cookies.load().await {
            Ok(cookies) => cookies,
            Err(e) => {
                warn!(error = %e, "Failed to load saved cookies");
                Vec::new()
            }
        }
    }

    async fn sign_in(&self, page: &dyn BrowserPage) -> CrawlResult<()> {
        debug!("Signing in...");
        let s = &self.selectors;

        if page.exists(&s.stale_session_dialog).await? {
            if let Err(e) = page
                .click_with_text(
                    &s.stale_session_dismiss,
                    &s.stale_session_dismiss_text,
                    self.timeouts.dialog,
                )
                .await
            {
                debug!(error = %e, "Stale session dialog did not close");
            }
            tokio::time::sleep(self.timeouts.settle).await;
        }

        if page.exists(&s.promo_close_button).await? {
            debug!("Closing popup...");
            if let Err(e) = page.click(&s.promo_close_button, self.timeouts.dialog).await {
                debug!(error = %e, "Popup did not close");
            }
        }

        page.fill(&s.username_input, &self.credentials.username).await?;
        page.fill(&s.password_input, self.credentials.password.expose())
            .await?;
        page.click(&s.submit_button, self.timeouts.tab).await?;

        tokio::time::sleep(self.timeouts.settle).await;

        let warning = page
            .inner_text(&s.warning_title)
            .await?
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());

        if let Some(message) = warning {
            warn!(message = %message, "Sign-in warning");
            page.click_with_text(&s.warning_accept, &s.warning_accept_text, self.timeouts.tab)
                .await?;
            tokio::time::sleep(self.timeouts.settle).await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::testing::{MemoryCookieStore, MockPage, PageCall};

    const MARKER: &str = "member-42";

    fn manager(store: Arc<MemoryCookieStore>) -> SessionManager {
        SessionManager::new(
            Credentials::new("reader", "secret", MARKER),
            SignInSelectors::default(),
            Timeouts::immediate(),
            Arc::new(MarkerProbe::new("MemberGA", MARKER)),
            store,
        )
    }

    fn sign_in_form(page: MockPage) -> MockPage {
        let s = SignInSelectors::default();
        page.with_element(&s.username_input)
            .with_element(&s.password_input)
            .with_element(&s.submit_button)
    }

    #[tokio::test]
    async fn test_already_signed_in_touches_nothing() {
        let store = Arc::new(MemoryCookieStore::new());
        let page = MockPage::new("https://example.com/doc.aspx", "Doc").with_global("MemberGA", MARKER);

        let path = manager(store.clone()).ensure_signed_in(&page).await.unwrap();

        assert_eq!(path, SignInPath::AlreadySignedIn);
        assert_eq!(store.save_count(), 0);
        assert!(!page.calls().iter().any(|c| matches!(c, PageCall::Reload)));
    }

    #[tokio::test]
    async fn test_restores_from_saved_cookies() {
        let cookie = Cookie::new("sid", "abc", "example.com");
        let store = Arc::new(MemoryCookieStore::new().with_cookies(vec![cookie.clone()]));
        let page = MockPage::new("https://example.com/doc.aspx", "Doc").on_reload(|state| {
            if state.cookies.iter().any(|c| c.name == "sid") {
                state.globals.insert("MemberGA".into(), MARKER.into());
            }
        });

        let session = manager(store.clone());
        let path = session.ensure_signed_in(&page).await.unwrap();

        assert_eq!(path, SignInPath::RestoredFromCookies);
        assert_eq!(store.save_count(), 0);
        let snapshot = session.snapshot().await;
        assert!(snapshot.signed_in);
        assert_eq!(snapshot.cookie_jar, vec![cookie]);
    }

    #[tokio::test]
    async fn test_corrupt_cookie_file_falls_through_to_sign_in() {
        let store = Arc::new(MemoryCookieStore::new().failing_load());
        let s = SignInSelectors::default();
        let page = sign_in_form(MockPage::new("https://example.com/doc.aspx", "Doc"))
            .on_click(&s.submit_button, |state| {
                state.globals.insert("MemberGA".into(), MARKER.into());
                state.cookies.push(Cookie::new("sid", "fresh", "example.com"));
            });

        let path = manager(store.clone()).ensure_signed_in(&page).await.unwrap();

        assert_eq!(path, SignInPath::Interactive);
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.saved()[0].value, "fresh");
        assert_eq!(page.filled(&s.username_input).as_deref(), Some("reader"));
        assert_eq!(page.filled(&s.password_input).as_deref(), Some("secret"));
    }

    #[tokio::test]
    async fn test_concurrent_callers_sign_in_once() {
        let store = Arc::new(MemoryCookieStore::new());
        let s = SignInSelectors::default();
        let first = sign_in_form(MockPage::new("https://example.com/a.aspx", "A"))
            .with_latency(Duration::from_millis(10))
            .on_click(&s.submit_button, |state| {
                state.globals.insert("MemberGA".into(), MARKER.into());
                state.cookies.push(Cookie::new("sid", "fresh", "example.com"));
            });
        let second = sign_in_form(MockPage::new("https://example.com/b.aspx", "B"))
            .with_latency(Duration::from_millis(30))
            .on_reload(|state| {
                if state.cookies.iter().any(|c| c.value == "fresh") {
                    state.globals.insert("MemberGA".into(), MARKER.into());
                }
            });

        let session = manager(store.clone());
        let (a, b) = tokio::join!(
            session.ensure_signed_in(&first),
            session.ensure_signed_in(&second)
        );

        assert_eq!(a.unwrap(), SignInPath::Interactive);
        assert_eq!(b.unwrap(), SignInPath::RestoredFromCookies);
        assert_eq!(store.save_count(), 1);
        assert!(second.filled(&s.username_input).is_none());
        assert!(second.calls().contains(&PageCall::AddCookies(1)));
    }

    #[tokio::test]
    async fn test_dismisses_dialogs_and_acknowledges_warning() {
        let store = Arc::new(MemoryCookieStore::new());
        let s = SignInSelectors::default();
        let page = sign_in_form(MockPage::new("https://example.com/doc.aspx", "Doc"))
            .with_element(&s.stale_session_dialog)
            .with_element(&s.promo_close_button)
            .with_element(&s.warning_accept)
            .on_click(&s.submit_button, |state| {
                state.globals.insert("MemberGA".into(), MARKER.into());
                state
                    .texts
                    .insert(SignInSelectors::default().warning_title, "Tài khoản đang đăng nhập".into());
            });

        manager(store).ensure_signed_in(&page).await.unwrap();

        let clicked = page.clicked();
        assert!(!clicked.contains(&s.stale_session_dismiss));
        assert!(clicked.contains(&s.promo_close_button));
        assert!(clicked.contains(&s.warning_accept));
    }

    #[tokio::test]
    async fn test_still_signed_out_is_authentication_lost() {
        let store = Arc::new(MemoryCookieStore::new());
        let page = sign_in_form(MockPage::new("https://example.com/doc.aspx", "Doc"));

        let result = manager(store.clone()).ensure_signed_in(&page).await;

        assert!(matches!(result, Err(CrawlError::AuthenticationLost)));
        // The attempted session is still persisted.
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_clear_session() {
        let store = Arc::new(
            MemoryCookieStore::new().with_cookies(vec![Cookie::new("sid", "abc", "example.com")]),
        );
        let page = MockPage::new("https://example.com", "Home")
            .with_cookies(vec![Cookie::new("sid", "abc", "example.com")]);

        manager(store.clone()).clear_session(&page).await.unwrap();

        assert!(store.saved().is_empty());
        assert!(page.cookies().await.unwrap().is_empty());
    }
}
