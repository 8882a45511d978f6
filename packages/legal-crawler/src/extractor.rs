//! Document extraction from captured page markup.
//!
//! Parsing is pure: relation panels yield stubs plus raw link targets, and
//! forwarding those targets to the queue is the router's job.

use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::config::ExtractorSelectors;
use crate::error::{CrawlError, CrawlResult};
use crate::fetch::ContentSnapshot;
use crate::fields::normalize_properties;
use crate::markdown::html_to_markdown;
use crate::types::{DocumentRecord, RelatedDocument, RelationKind, Relations};

/// A relation target discovered while parsing a panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationLink {
    pub kind: RelationKind,
    pub url: Url,
}

/// One parsed relation panel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationPanel {
    pub documents: Vec<RelatedDocument>,
    pub links: Vec<Url>,
}

/// Everything extracted from one document page.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub record: DocumentRecord,
    pub links: Vec<RelationLink>,
    /// The site has not published the body yet
    pub placeholder: bool,
}

struct RelationSelectors {
    kind: RelationKind,
    items: Selector,
}

pub struct DocumentExtractor {
    title: Selector,
    property_rows: Selector,
    any_div: Selector,
    notes: Selector,
    notes_prefix: String,
    relations: Vec<RelationSelectors>,
    relation_link: Selector,
    relation_title: Selector,
    placeholder_notice: String,
}

fn parse_selector(selector: &str) -> CrawlResult<Selector> {
    Selector::parse(selector)
        .map_err(|e| CrawlError::Config(format!("invalid selector {:?}: {}", selector, e)))
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

impl DocumentExtractor {
    pub fn new(selectors: &ExtractorSelectors) -> CrawlResult<Self> {
        let relations = selectors
            .relation_panels
            .iter()
            .map(|(kind, panel)| {
                Ok(RelationSelectors {
                    kind: *kind,
                    items: parse_selector(&format!("{} {}", panel, selectors.relation_item))?,
                })
            })
            .collect::<CrawlResult<Vec<_>>>()?;

        Ok(Self {
            title: parse_selector(&selectors.title)?,
            property_rows: parse_selector(&selectors.property_rows)?,
            any_div: parse_selector("div")?,
            notes: parse_selector(&selectors.notes)?,
            notes_prefix: selectors.notes_prefix.clone(),
            relations,
            relation_link: parse_selector(&selectors.relation_link)?,
            relation_title: parse_selector(&selectors.relation_title)?,
            placeholder_notice: selectors.placeholder_notice.clone(),
        })
    }

    pub fn extract(&self, snapshot: &ContentSnapshot) -> CrawlResult<Extraction> {
        let base = Url::parse(&snapshot.url).map_err(|_| CrawlError::InvalidUrl {
            url: snapshot.url.clone(),
        })?;
        let document = Html::parse_document(&snapshot.schema_html);

        let title = document
            .select(&self.title)
            .next()
            .map(text_of)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| snapshot.title.trim().to_string());

        let pairs = self.label_value_pairs(document.select(&self.property_rows));
        let properties =
            normalize_properties(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        let mut relations = Relations::default();
        let mut links = Vec::new();
        for relation in &self.relations {
            let panel = self.parse_relation_panel(&document, relation.kind, &base);
            links.extend(panel.links.into_iter().map(|url| RelationLink {
                kind: relation.kind,
                url,
            }));
            *relations.get_mut(relation.kind) = panel.documents;
        }

        let md_content = html_to_markdown(&snapshot.body_html);
        let md_content_en = html_to_markdown(&snapshot.body_html_en);
        let content_hash = DocumentRecord::calculate_hash(&md_content);

        let record = DocumentRecord {
            url: snapshot.url.clone(),
            title,
            properties,
            notes: self.notes(&document),
            relations,
            html_content: snapshot.body_html.clone(),
            md_content,
            html_content_en: snapshot.body_html_en.clone(),
            md_content_en,
            content_hash,
        };

        Ok(Extraction {
            placeholder: self.is_placeholder(&snapshot.body_html),
            record,
            links,
        })
    }

    /// Parse one relation panel into stubs and the absolute URLs they link to.
    pub fn parse_relation_panel(
        &self,
        document: &Html,
        kind: RelationKind,
        base: &Url,
    ) -> RelationPanel {
        let Some(relation) = self.relations.iter().find(|r| r.kind == kind) else {
            return RelationPanel::default();
        };

        let mut panel = RelationPanel::default();
        for item in document.select(&relation.items) {
            let href = item
                .select(&self.relation_link)
                .next()
                .and_then(|a| a.value().attr("href"));
            if let Some(url) = href.and_then(|href| resolve_link(base, href)) {
                panel.links.push(url);
            }

            let title = item
                .select(&self.relation_title)
                .next()
                .map(text_of)
                .unwrap_or_default();

            // Every nested div is a candidate row; unknown labels fall out
            // in normalization.
            let rows = item
                .descendants()
                .skip(1)
                .filter_map(ElementRef::wrap)
                .filter(|el| self.any_div.matches(el));
            let pairs = self.label_value_pairs(rows);

            panel.documents.push(RelatedDocument {
                title,
                properties: normalize_properties(
                    pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())),
                ),
            });
        }
        panel
    }

    /// Rows whose first child element holds a label and second a value.
    fn label_value_pairs<'a>(
        &self,
        rows: impl Iterator<Item = ElementRef<'a>>,
    ) -> Vec<(String, String)> {
        rows.filter_map(|row| {
            let mut cells = row.children().filter_map(ElementRef::wrap);
            let label = cells.next().map(text_of)?;
            let value = cells.next().map(text_of).unwrap_or_default();
            Some((label, value))
        })
        .collect()
    }

    fn notes(&self, document: &Html) -> String {
        let text = document
            .select(&self.notes)
            .next()
            .map(text_of)
            .unwrap_or_default();
        if text.contains(&self.notes_prefix) {
            text.replacen(&self.notes_prefix, "", 1).trim().to_string()
        } else {
            String::new()
        }
    }

    fn is_placeholder(&self, body_html: &str) -> bool {
        if body_html.trim().is_empty() {
            return false;
        }
        let fragment = Html::parse_fragment(body_html);
        let text: String = fragment.root_element().text().collect();
        text.contains(&self.placeholder_notice)
    }
}

fn resolve_link(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    base.join(href)
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE_URL: &str = "https://thuvienphapluat.vn/van-ban/Doanh-nghiep/Luat-Dau-tu-2020-321051.aspx";

    fn relation_item(href: &str, title: &str, id: &str, issued: &str) -> String {
        format!(
            r#"<div class="dgc">
                <div><a href="{href}">link</a></div>
                <div>
                    <div style="background-color: #FFFBF4;font-weight: bold;">{title}</div>
                    <div>
                        <div>
                            <div><div>Số hiệu:</div><div>{id}</div></div>
                            <div><div>Ngày ban hành:</div><div>{issued}</div></div>
                        </div>
                    </div>
                </div>
            </div>"#
        )
    }

    fn schema_page(amending: &str) -> String {
        format!(
            r#"<html><body>
            <div id="viewingDocument">
                <div>  Luật Đầu tư 2020  </div>
                <div class="att"><div>Số hiệu:</div><div>61/2020/QH14</div></div>
                <div class="att"><div>Loại văn bản:</div><div>Luật</div></div>
                <div class="att"><div>Nơi ban hành:</div><div>Quốc hội</div></div>
                <div class="att"><div>Người ký:</div><div>Nguyễn Thị Kim Ngân</div></div>
                <div class="att"><div>Ngày ban hành:</div><div>17/06/2020</div></div>
                <div class="att"><div>Tóm tắt:</div><div>ignored</div></div>
                <div>Ghi chú: Có hiệu lực từ 01/01/2021</div>
            </div>
            <div id="amendDocument">{amending}</div>
            <div id="guidedDocument"></div>
            </body></html>"#
        )
    }

    fn snapshot(schema_html: String, body: &str) -> ContentSnapshot {
        ContentSnapshot {
            url: PAGE_URL.to_string(),
            title: "Luật Đầu tư 2020".to_string(),
            schema_html,
            body_html: body.to_string(),
            body_html_en: String::new(),
        }
    }

    fn extractor() -> DocumentExtractor {
        DocumentExtractor::new(&ExtractorSelectors::default()).unwrap()
    }

    #[test]
    fn test_extracts_record() {
        let items = relation_item(
            "/van-ban/Doanh-nghiep/Luat-sua-doi-03-2022-QH15-505467.aspx",
            "Luật sửa đổi 2022",
            "03/2022/QH15",
            "11/01/2022",
        );
        let extraction = extractor()
            .extract(&snapshot(schema_page(&items), "<p>Điều 1. Phạm vi</p>"))
            .unwrap();
        let record = extraction.record;

        assert_eq!(record.title, "Luật Đầu tư 2020");
        assert_eq!(record.url, PAGE_URL);
        assert_eq!(record.properties.id.as_deref(), Some("61/2020/QH14"));
        assert_eq!(record.properties.organization.as_deref(), Some("Quốc hội"));
        assert_eq!(record.properties.issued_date.as_deref(), Some("2020-06-17"));
        assert_eq!(record.notes, "Có hiệu lực từ 01/01/2021");
        assert_eq!(record.html_content, "<p>Điều 1. Phạm vi</p>");
        assert!(record.md_content.contains("Điều 1. Phạm vi"));
        assert_eq!(record.content_hash, DocumentRecord::calculate_hash(&record.md_content));
        assert_eq!(record.html_content_en, "");
        assert_eq!(record.md_content_en, "");

        assert_eq!(record.relations.amending_documents.len(), 1);
        let stub = &record.relations.amending_documents[0];
        assert_eq!(stub.title, "Luật sửa đổi 2022");
        assert_eq!(stub.properties.id.as_deref(), Some("03/2022/QH15"));
        assert_eq!(stub.properties.issued_date.as_deref(), Some("2022-01-11"));
        assert_eq!(record.relations.total(), 1);

        assert_eq!(
            extraction.links,
            vec![RelationLink {
                kind: RelationKind::Amending,
                url: Url::parse(
                    "https://thuvienphapluat.vn/van-ban/Doanh-nghiep/Luat-sua-doi-03-2022-QH15-505467.aspx"
                )
                .unwrap(),
            }]
        );
        assert!(!extraction.placeholder);
    }

    #[test]
    fn test_stub_without_link_is_kept() {
        let items = format!(
            "{}{}",
            relation_item("", "Nghị định 31/2021", "31/2021/NĐ-CP", "26/03/2021"),
            relation_item("javascript:void(0)", "Thông tư", "", "")
        );
        let document = Html::parse_document(&schema_page(&items));
        let panel = extractor().parse_relation_panel(
            &document,
            RelationKind::Amending,
            &Url::parse(PAGE_URL).unwrap(),
        );

        assert_eq!(panel.documents.len(), 2);
        assert!(panel.links.is_empty());
        assert_eq!(panel.documents[0].properties.id.as_deref(), Some("31/2021/NĐ-CP"));
    }

    #[test]
    fn test_missing_notes_label_is_empty() {
        let html = schema_page("").replace("Ghi chú: Có hiệu lực từ 01/01/2021", "Không có");
        let extraction = extractor().extract(&snapshot(html, "")).unwrap();
        assert_eq!(extraction.record.notes, "");
        assert_eq!(extraction.record.md_content, "");
    }

    #[test]
    fn test_placeholder_body_detected() {
        let body = r#"<p>Văn bản này đang cập nhật Nội dung => Bạn vui lòng "Tải về" để xem</p>"#;
        let extraction = extractor().extract(&snapshot(schema_page(""), body)).unwrap();
        assert!(extraction.placeholder);
    }

    #[test]
    fn test_invalid_selector_is_config_error() {
        let selectors = ExtractorSelectors {
            title: "div[".to_string(),
            ..ExtractorSelectors::default()
        };
        assert!(matches!(
            DocumentExtractor::new(&selectors),
            Err(CrawlError::Config(_))
        ));
    }
}
