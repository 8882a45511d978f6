//! Persisted authentication cookies.
//!
//! The file is a JSON array of cookie objects. An empty file denotes a
//! cleared session.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CrawlError, CrawlResult};
use crate::traits::CookieStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    /// Unix seconds, `-1` for a session cookie
    #[serde(default = "session_expiry")]
    pub expires: f64,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

fn default_path() -> String {
    "/".to_string()
}

fn session_expiry() -> f64 {
    -1.0
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: domain.into(),
            path: default_path(),
            expires: session_expiry(),
            http_only: false,
            secure: false,
            same_site: None,
        }
    }
}

/// Cookie snapshot kept in a JSON file.
#[derive(Debug, Clone)]
pub struct FileCookieStore {
    path: PathBuf,
}

impl FileCookieStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CookieStore for FileCookieStore {
    async fn load(&self) -> CrawlResult<Vec<Cookie>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CrawlError::storage(&self.path, e)),
        };

        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }

        let cookies: Vec<Cookie> = serde_json::from_str(&raw)?;
        debug!(path = %self.path.display(), count = cookies.len(), "Cookies loaded");
        Ok(cookies)
    }

    async fn save(&self, cookies: &[Cookie]) -> CrawlResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CrawlError::storage(parent, e))?;
        }
        let json = serde_json::to_string_pretty(cookies)?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| CrawlError::storage(&self.path, e))?;
        debug!(path = %self.path.display(), count = cookies.len(), "Cookies saved");
        Ok(())
    }

    async fn clear(&self) -> CrawlResult<()> {
        tokio::fs::write(&self.path, "")
            .await
            .map_err(|e| CrawlError::storage(&self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_is_empty_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCookieStore::new(dir.path().join("cookies.json"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_load_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCookieStore::new(dir.path().join("session/cookies.json"));

        let cookies = vec![Cookie::new("ASP.NET_SessionId", "abc123", "thuvienphapluat.vn")];
        store.save(&cookies).await.unwrap();
        assert_eq!(store.load().await.unwrap(), cookies);

        store.clear().await.unwrap();
        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(raw, "");
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = FileCookieStore::new(&path);
        assert!(matches!(store.load().await, Err(CrawlError::Json(_))));
    }

    #[test]
    fn test_reads_browser_cookie_export() {
        let raw = r#"[{"name":"sid","value":"v","domain":".example.com","path":"/","expires":1735689600.5,"httpOnly":true,"secure":true,"sameSite":"Lax"}]"#;
        let cookies: Vec<Cookie> = serde_json::from_str(raw).unwrap();
        assert_eq!(cookies[0].same_site.as_deref(), Some("Lax"));
        assert!(cookies[0].http_only);
    }
}
