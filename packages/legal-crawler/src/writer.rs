//! Record writer: one pretty-printed JSON file per document.
//!
//! Layout: `<root>/<organization>/<legislation type>/<identifier>.json`. A
//! write goes to a temporary sibling first and is renamed into place, so a
//! crash leaves either the previous file or the new one.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::error::{CrawlError, CrawlResult};
use crate::traits::DocumentSink;
use crate::types::DocumentRecord;

const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone)]
pub struct DocumentWriter {
    root: PathBuf,
}

impl DocumentWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Destination of `record`. Requires an identifier.
    pub fn path_for(&self, record: &DocumentRecord) -> CrawlResult<PathBuf> {
        let identifier = record.identifier()?;
        Ok(self
            .root
            .join(directory_component(record.properties.organization.as_deref()))
            .join(directory_component(
                record.properties.legislation_type.as_deref(),
            ))
            .join(format!("{}.json", escape_component(identifier))))
    }

    /// Overwrite the record's file with the complete record.
    pub async fn write(&self, record: &DocumentRecord) -> CrawlResult<PathBuf> {
        let path = self.path_for(record)?;
        let dir = path.parent().unwrap_or(&self.root).to_path_buf();

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| CrawlError::storage(&dir, e))?;

        let json = serde_json::to_vec_pretty(record)?;

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = dir.join(format!(".{}.tmp-{}", file_name, Uuid::new_v4()));

        tokio::fs::write(&temp, &json)
            .await
            .map_err(|e| CrawlError::storage(&temp, e))?;
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(CrawlError::storage(&path, e));
        }

        info!(path = %path.display(), bytes = json.len(), "Document saved");
        Ok(path)
    }
}

#[async_trait]
impl DocumentSink for DocumentWriter {
    async fn save(&self, record: &DocumentRecord) -> CrawlResult<()> {
        self.write(record).await.map(|_| ())
    }
}

/// `/` (and `\`) become `_` so a value stays one path component.
pub fn escape_component(value: &str) -> String {
    value.trim().replace(['/', '\\'], "_")
}

fn directory_component(value: Option<&str>) -> String {
    let escaped = value.map(escape_component).unwrap_or_default();
    if escaped.is_empty() || escaped == "." || escaped == ".." {
        UNKNOWN.to_string()
    } else {
        escaped
    }
}
