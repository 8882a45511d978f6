//! Crawler configuration.
//!
//! Plain structs with `Default` values matching the current site template and
//! builder-style `with_*` setters. Loading from the environment is the
//! binary's job.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretBox};
use url::Url;

use crate::types::RelationKind;

/// A secret string that won't be logged or displayed.
pub struct SecretString(SecretBox<str>);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretBox::new(Box::from(value.into().as_str())))
    }

    /// Only call this when actually using the secret (e.g. filling a form field).
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl Clone for SecretString {
    fn clone(&self) -> Self {
        Self::new(self.expose().to_string())
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Site account used for interactive sign-in.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
    /// Value the page's session-marker global holds when signed in as this account
    pub session_marker: String,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        session_marker: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: SecretString::new(password),
            session_marker: session_marker.into(),
        }
    }
}

/// Sign-in form and dialog selectors.
#[derive(Debug, Clone)]
pub struct SignInSelectors {
    /// Page global compared against [`Credentials::session_marker`]
    pub marker_variable: String,
    pub username_input: String,
    pub password_input: String,
    pub submit_button: String,
    /// "Already signed in elsewhere" dialog and its dismiss button
    pub stale_session_dialog: String,
    pub stale_session_dismiss: String,
    pub stale_session_dismiss_text: String,
    pub promo_close_button: String,
    /// Post-login warning dialog title and its accept button
    pub warning_title: String,
    pub warning_accept: String,
    pub warning_accept_text: String,
}

impl Default for SignInSelectors {
    fn default() -> Self {
        Self {
            marker_variable: "MemberGA".to_string(),
            username_input: "input#usernameTextBox".to_string(),
            password_input: "input#passwordTextBox".to_string(),
            submit_button: "input#loginButton".to_string(),
            stale_session_dialog: "#logoutfrom".to_string(),
            stale_session_dismiss:
                r#"div[aria-labelledby="ui-dialog-title-logoutfrom"] button.ui-button"#.to_string(),
            stale_session_dismiss_text: "Thoát".to_string(),
            promo_close_button: "#TB_closeWindowButton".to_string(),
            warning_title: "span#ui-dialog-title-logintfrom_w".to_string(),
            warning_accept:
                r#"div[aria-labelledby="ui-dialog-title-logintfrom_w"] button.ui-button"#.to_string(),
            warning_accept_text: "Đồng ý".to_string(),
        }
    }
}

/// Screen region holding the challenge image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipRegion {
    pub x: f64,
    pub y: f64,
    pub height: f64,
    /// `None` spans the viewport width
    pub width: Option<f64>,
}

/// How the verification form is submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitMode {
    /// Click the submit button when present, otherwise press Enter in the field
    Auto,
    Click,
    Keyboard,
}

/// Challenge-page detection and the verification form.
#[derive(Debug, Clone)]
pub struct ChallengeConfig {
    /// Titles that mark a page as challenged (captcha page, signed-out landing page)
    pub titles: Vec<String>,
    /// URL fragment of the verification-check page
    pub verification_path: String,
    pub region: ClipRegion,
    pub input: String,
    pub submit_button: String,
    pub submit_mode: SubmitMode,
    /// Prompt for the vision-inference service
    pub instruction: String,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            titles: vec![
                "THƯ VIỆN PHÁP LUẬT - Captcha".to_string(),
                "THƯ VIỆN PHÁP LUẬT _ Tra cứu, Nắm bắt Pháp Luật Việt Nam".to_string(),
            ],
            verification_path: "checkvb.aspx".to_string(),
            region: ClipRegion {
                x: 0.0,
                y: 134.0,
                height: 70.0,
                width: None,
            },
            input: "#ctl00_Content_txtSecCode".to_string(),
            submit_button: "#ctl00_Content_CheckButton".to_string(),
            submit_mode: SubmitMode::Auto,
            instruction:
                "what are the digits in this image? Only response the digits and nothing else."
                    .to_string(),
        }
    }
}

/// Content tabs and the containers they reveal.
#[derive(Debug, Clone)]
pub struct ContentSelectors {
    pub schema_tab: String,
    pub schema_container: String,
    pub body_tab: String,
    pub body_container: String,
    /// The body markup inside `body_container`
    pub body: String,
    pub secondary_tab: String,
    /// Attribute the site sets to `False` on a disabled secondary tab
    pub secondary_enabled_attr: String,
}

impl Default for ContentSelectors {
    fn default() -> Self {
        Self {
            schema_tab: "#ctl00_Content_ctl00_spLuocDo".to_string(),
            schema_container: "#viewingDocument".to_string(),
            body_tab: "#ctl00_Content_ctl00_divNoiDung".to_string(),
            body_container: "#divContentDoc".to_string(),
            body: "#divContentDoc > .content1 > div > div".to_string(),
            secondary_tab: "#ctl00_Content_ctl00_spTiengAnh".to_string(),
            secondary_enabled_attr: "enable".to_string(),
        }
    }
}

/// Selectors the extractor runs over the schema-tab HTML.
#[derive(Debug, Clone)]
pub struct ExtractorSelectors {
    pub title: String,
    pub property_rows: String,
    pub notes: String,
    pub notes_prefix: String,
    /// One panel per relation kind
    pub relation_panels: BTreeMap<RelationKind, String>,
    /// One entry inside a relation panel
    pub relation_item: String,
    pub relation_link: String,
    pub relation_title: String,
    /// Body text shown while the site has not published the content yet
    pub placeholder_notice: String,
}

impl Default for ExtractorSelectors {
    fn default() -> Self {
        Self {
            title: "#viewingDocument > div:nth-child(1)".to_string(),
            property_rows: "#viewingDocument > .att".to_string(),
            notes: "#viewingDocument > div:last-child".to_string(),
            notes_prefix: "Ghi chú:".to_string(),
            relation_panels: RelationKind::ALL
                .iter()
                .map(|kind| (*kind, kind.default_selector().to_string()))
                .collect(),
            relation_item: "div.dgc".to_string(),
            relation_link: "div:nth-child(1) a".to_string(),
            relation_title:
                r#"div:nth-child(2) div[style="background-color: #FFFBF4;font-weight: bold;"]"#
                    .to_string(),
            placeholder_notice: "Văn bản này đang cập nhật Nội dung".to_string(),
        }
    }
}

/// List-page link discovery.
#[derive(Debug, Clone)]
pub struct ListSelectors {
    /// Regex over absolute URLs of document pages
    pub document_url_pattern: String,
    pub pager_links: String,
}

impl Default for ListSelectors {
    fn default() -> Self {
        Self {
            document_url_pattern: r"^https://thuvienphapluat\.vn/van-ban/[^/]+/[^/]+\.aspx$"
                .to_string(),
            pager_links: ".cmPager > a".to_string(),
        }
    }
}

/// Bounded waits used inside one request.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// Per content tab
    pub tab: Duration,
    /// Best-effort dialog dismissal
    pub dialog: Duration,
    /// Pause after a submit before re-reading the page
    pub settle: Duration,
    /// Pause before an interactive sign-in
    pub sign_in_pause: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            tab: Duration::from_secs(10),
            dialog: Duration::from_secs(3),
            settle: Duration::from_secs(1),
            sign_in_pause: Duration::from_millis(100),
        }
    }
}

impl Timeouts {
    /// No pauses; for tests driven by scripted pages.
    pub fn immediate() -> Self {
        Self {
            tab: Duration::from_millis(50),
            dialog: Duration::from_millis(50),
            settle: Duration::ZERO,
            sign_in_pause: Duration::ZERO,
        }
    }
}

/// Engine scheduling limits.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_concurrency: usize,
    pub max_requests_per_crawl: Option<usize>,
    pub max_request_retries: u32,
    /// Overall budget for one handler invocation
    pub request_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 1,
            max_requests_per_crawl: None,
            max_request_retries: 3,
            request_timeout: Duration::from_secs(120),
        }
    }
}

impl EngineConfig {
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    pub fn with_max_requests(mut self, max: Option<usize>) -> Self {
        self.max_requests_per_crawl = max;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_request_retries = retries;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Everything the crawl pipeline needs.
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    pub credentials: Credentials,
    pub sign_in: SignInSelectors,
    pub challenge: ChallengeConfig,
    pub content: ContentSelectors,
    pub extractor: ExtractorSelectors,
    pub list: ListSelectors,
    pub timeouts: Timeouts,
    pub engine: EngineConfig,
    pub seed_urls: Vec<Url>,
    pub cookies_file: PathBuf,
    pub output_dir: PathBuf,
}

impl CrawlerConfig {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            sign_in: SignInSelectors::default(),
            challenge: ChallengeConfig::default(),
            content: ContentSelectors::default(),
            extractor: ExtractorSelectors::default(),
            list: ListSelectors::default(),
            timeouts: Timeouts::default(),
            engine: EngineConfig::default(),
            seed_urls: default_seed_urls(),
            cookies_file: PathBuf::from("cookies.json"),
            output_dir: PathBuf::from("documents"),
        }
    }

    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_seed_urls(mut self, urls: Vec<Url>) -> Self {
        self.seed_urls = urls;
        self
    }

    pub fn with_cookies_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.cookies_file = path.into();
        self
    }

    pub fn with_output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_dir = path.into();
        self
    }
}

/// Search-result pages for constitutions and laws.
pub fn default_seed_urls() -> Vec<Url> {
    [
        "https://thuvienphapluat.vn/page/tim-van-ban.aspx?keyword=Hi%E1%BA%BFn%20ph%C3%A1p",
        "https://thuvienphapluat.vn/page/tim-van-ban.aspx?keyword=luat",
    ]
    .iter()
    .filter_map(|url| Url::parse(url).ok())
    .collect()
}
