use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;
use uuid::Uuid;

use crate::error::{CrawlError, CrawlResult};

// ============================================================================
// REQUESTS
// ============================================================================

/// Routing label attached to every queued URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    /// Entry point: seeds the search-result list pages
    Start,
    /// Search-result page: yields document links and further list pages
    List,
    /// Document page: full sign-in, challenge, extraction and save
    Detail,
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Label::Start => "start",
            Label::List => "list",
            Label::Detail => "detail",
        };
        f.write_str(name)
    }
}

/// One unit of work handed to a request handler.
#[derive(Debug, Clone)]
pub struct CrawlRequest {
    pub id: Uuid,
    pub url: Url,
    pub label: Label,
    /// Number of failed attempts so far
    pub retry_count: u32,
}

impl CrawlRequest {
    pub fn new(url: Url, label: Label) -> Self {
        Self {
            id: Uuid::new_v4(),
            url,
            label,
            retry_count: 0,
        }
    }

    /// The same request, one attempt later.
    pub fn retried(mut self) -> Self {
        self.retry_count += 1;
        self
    }
}

// ============================================================================
// RELATIONS
// ============================================================================

/// How one document references another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Guided,
    Consolidating,
    Amended,
    Rectified,
    Superseded,
    Referred,
    Influential,
    Guiding,
    Consolidated,
    Amending,
    Rectifying,
    Superseding,
    Relevant,
}

impl RelationKind {
    pub const ALL: [RelationKind; 13] = [
        RelationKind::Guided,
        RelationKind::Consolidating,
        RelationKind::Amended,
        RelationKind::Rectified,
        RelationKind::Superseded,
        RelationKind::Referred,
        RelationKind::Influential,
        RelationKind::Guiding,
        RelationKind::Consolidated,
        RelationKind::Amending,
        RelationKind::Rectifying,
        RelationKind::Superseding,
        RelationKind::Relevant,
    ];

    /// Panel selector in the current site template.
    pub fn default_selector(&self) -> &'static str {
        match self {
            RelationKind::Guided => "#guidedDocument",
            RelationKind::Consolidating => "#DuocHopNhatDocument",
            RelationKind::Amended => "#amendedDocument",
            RelationKind::Rectified => "#correctedDocument",
            RelationKind::Superseded => "#replacedDocument",
            RelationKind::Referred => "#referentialDocument",
            RelationKind::Influential => "#basisDocument",
            RelationKind::Guiding => "#guideDocument",
            RelationKind::Consolidated => "#HopNhatDocument",
            RelationKind::Amending => "#amendDocument",
            RelationKind::Rectifying => "#correctingDocument",
            RelationKind::Superseding => "#replaceDocument",
            RelationKind::Relevant => "#contentConnection",
        }
    }
}

/// Identifying and classification fields shared by full records and stubs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentProperties {
    /// e.g. `61/2020/QH14`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legislation_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gazette_number: Option<String>,
    /// ISO 8601 (`yyyy-mm-dd`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issued_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gazette_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// A document as seen from another document's relation panel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedDocument {
    pub title: String,
    #[serde(flatten)]
    pub properties: DocumentProperties,
}

/// The relation lists of one document, one field per kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relations {
    pub guided_documents: Vec<RelatedDocument>,
    pub consolidating_documents: Vec<RelatedDocument>,
    pub amended_documents: Vec<RelatedDocument>,
    pub rectified_documents: Vec<RelatedDocument>,
    pub superseded_documents: Vec<RelatedDocument>,
    pub referred_documents: Vec<RelatedDocument>,
    pub influential_documents: Vec<RelatedDocument>,
    pub guiding_documents: Vec<RelatedDocument>,
    pub consolidated_documents: Vec<RelatedDocument>,
    pub amending_documents: Vec<RelatedDocument>,
    pub rectifying_documents: Vec<RelatedDocument>,
    pub superseding_documents: Vec<RelatedDocument>,
    pub relevant_documents: Vec<RelatedDocument>,
}

impl Relations {
    pub fn get(&self, kind: RelationKind) -> &Vec<RelatedDocument> {
        match kind {
            RelationKind::Guided => &self.guided_documents,
            RelationKind::Consolidating => &self.consolidating_documents,
            RelationKind::Amended => &self.amended_documents,
            RelationKind::Rectified => &self.rectified_documents,
            RelationKind::Superseded => &self.superseded_documents,
            RelationKind::Referred => &self.referred_documents,
            RelationKind::Influential => &self.influential_documents,
            RelationKind::Guiding => &self.guiding_documents,
            RelationKind::Consolidated => &self.consolidated_documents,
            RelationKind::Amending => &self.amending_documents,
            RelationKind::Rectifying => &self.rectifying_documents,
            RelationKind::Superseding => &self.superseding_documents,
            RelationKind::Relevant => &self.relevant_documents,
        }
    }

    pub fn get_mut(&mut self, kind: RelationKind) -> &mut Vec<RelatedDocument> {
        match kind {
            RelationKind::Guided => &mut self.guided_documents,
            RelationKind::Consolidating => &mut self.consolidating_documents,
            RelationKind::Amended => &mut self.amended_documents,
            RelationKind::Rectified => &mut self.rectified_documents,
            RelationKind::Superseded => &mut self.superseded_documents,
            RelationKind::Referred => &mut self.referred_documents,
            RelationKind::Influential => &mut self.influential_documents,
            RelationKind::Guiding => &mut self.guiding_documents,
            RelationKind::Consolidated => &mut self.consolidated_documents,
            RelationKind::Amending => &mut self.amending_documents,
            RelationKind::Rectifying => &mut self.rectifying_documents,
            RelationKind::Superseding => &mut self.superseding_documents,
            RelationKind::Relevant => &mut self.relevant_documents,
        }
    }

    pub fn total(&self) -> usize {
        RelationKind::ALL.iter().map(|k| self.get(*k).len()).sum()
    }
}

// ============================================================================
// RECORDS
// ============================================================================

/// The persisted record for one document.
///
/// Written whole: a re-crawl replaces the file, relation lists are never
/// merged with a previous version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    pub url: String,
    pub title: String,
    #[serde(flatten)]
    pub properties: DocumentProperties,
    pub notes: String,
    #[serde(flatten)]
    pub relations: Relations,
    pub html_content: String,
    pub md_content: String,
    pub html_content_en: String,
    pub md_content_en: String,
    /// SHA-256 of `md_content`
    pub content_hash: String,
}

impl DocumentRecord {
    /// The persistence key. Must be present and non-blank.
    pub fn identifier(&self) -> CrawlResult<&str> {
        match self.properties.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => Ok(id),
            _ => Err(CrawlError::MissingIdentifier {
                url: self.url.clone(),
            }),
        }
    }

    /// Calculate content hash from markdown
    pub fn calculate_hash(markdown: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(markdown.as_bytes());
        hex::encode(hasher.finalize())
    }
}
