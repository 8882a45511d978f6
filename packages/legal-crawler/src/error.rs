//! Typed errors for the crawler.
//!
//! Uses `thiserror` for library errors (not `anyhow`). Every variant is
//! classified as retryable or not, so the engine's single retry loop is the
//! only place that decides whether a request is attempted again.

use std::path::PathBuf;
use std::time::Duration;

use openai_client::OpenAIError;
use thiserror::Error;

/// Errors raised at the browser boundary.
#[derive(Debug, Error)]
pub enum BrowserError {
    /// A bounded wait for an element expired
    #[error("timed out after {timeout_ms}ms waiting for {selector}")]
    Timeout { selector: String, timeout_ms: u64 },

    /// The element is not on the page
    #[error("element not found: {0}")]
    NotFound(String),

    /// Page navigation or reload failed
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// Anything else reported by the automation protocol
    #[error("browser protocol error: {0}")]
    Protocol(String),
}

impl BrowserError {
    pub fn timeout(selector: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            selector: selector.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }
}

/// Errors that can occur while crawling a single request.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// Selector wait timed out or a tab click failed (after the local reload retry)
    #[error("transient navigation failure: {0}")]
    TransientNavigation(#[from] BrowserError),

    /// The challenge could not be cleared in this attempt
    #[error("challenge unsolved: {reason}")]
    ChallengeUnsolved { reason: String },

    /// The signed-in predicate is still false after a full sign-in
    #[error("authentication lost: still signed out after an interactive sign-in")]
    AuthenticationLost,

    /// The vision-inference service call failed
    #[error("challenge solver error: {0}")]
    Solver(String),

    /// The engine's per-request timeout fired
    #[error("request timed out after {0:?}")]
    RequestTimeout(Duration),

    /// The extracted record carries no identifier to key it by
    #[error("document has no identifier: {url}")]
    MissingIdentifier { url: String },

    /// A URL could not be parsed or resolved
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    /// Filesystem failure (record tree, cookie file)
    #[error("storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON (de)serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration (selector that does not parse, bad pattern)
    #[error("config error: {0}")]
    Config(String),
}

impl CrawlError {
    /// Whether the engine should schedule another attempt. Challenge and
    /// authentication failures count as retryable, bounded by the engine's
    /// retry limit.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientNavigation(_)
                | Self::ChallengeUnsolved { .. }
                | Self::AuthenticationLost
                | Self::Solver(_)
                | Self::RequestTimeout(_)
        )
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }
}

/// Transient service failures stay retryable as `Solver`. Anything else
/// (e.g. a rejected API key) becomes `Config` and fails the request.
impl From<OpenAIError> for CrawlError {
    fn from(e: OpenAIError) -> Self {
        if e.is_transient() {
            Self::Solver(e.to_string())
        } else {
            Self::Config(format!("challenge solver: {}", e))
        }
    }
}

/// Result type alias for crawl operations.
pub type CrawlResult<T> = std::result::Result<T, CrawlError>;

/// Result type alias for browser operations.
pub type BrowserResult<T> = std::result::Result<T, BrowserError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(CrawlError::from(BrowserError::timeout("#divThuocTinh", Duration::from_secs(10)))
            .is_retryable());
        assert!(CrawlError::ChallengeUnsolved {
            reason: "no digits".into()
        }
        .is_retryable());
        assert!(CrawlError::AuthenticationLost.is_retryable());

        assert!(!CrawlError::MissingIdentifier {
            url: "https://example.com".into()
        }
        .is_retryable());
        assert!(!CrawlError::Config("bad selector".into()).is_retryable());
    }

    #[test]
    fn test_solver_errors_split_by_transience() {
        let overloaded = CrawlError::from(OpenAIError::Api {
            status: 503,
            message: "overloaded".into(),
        });
        assert!(matches!(overloaded, CrawlError::Solver(_)));
        assert!(overloaded.is_retryable());
        assert!(CrawlError::from(OpenAIError::Timeout).is_retryable());

        let bad_key = CrawlError::from(OpenAIError::Api {
            status: 401,
            message: "invalid api key".into(),
        });
        assert!(matches!(bad_key, CrawlError::Config(_)));
        assert!(!bad_key.is_retryable());
        assert!(!CrawlError::from(OpenAIError::Parse("bad json".into())).is_retryable());
    }

    #[test]
    fn test_timeout_message() {
        let err = BrowserError::timeout("#viewingDocument", Duration::from_millis(1500));
        assert_eq!(
            err.to_string(),
            "timed out after 1500ms waiting for #viewingDocument"
        );
    }
}
