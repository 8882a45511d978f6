//! Link frontier adapter.
//!
//! Everything the crawl discovers goes through [`LinkFrontier::discover`] into
//! the queue, which owns the visited set. Relation targets always carry the
//! `Detail` label so a document reached only through another document's
//! relation panel is still fetched in full.

use std::collections::HashSet;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use crate::config::ListSelectors;
use crate::error::{CrawlError, CrawlResult};
use crate::extractor::RelationLink;
use crate::traits::CrawlQueue;
use crate::types::Label;

/// Dedup key: fragment dropped, trailing slash trimmed, query kept.
pub fn normalize_url(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    let path = normalized.path().trim_end_matches('/').to_string();
    normalized.set_path(if path.is_empty() { "/" } else { &path });
    normalized.to_string()
}

pub struct LinkFrontier<'a> {
    queue: &'a dyn CrawlQueue,
}

impl<'a> LinkFrontier<'a> {
    pub fn new(queue: &'a dyn CrawlQueue) -> Self {
        Self { queue }
    }

    /// Hand `urls` to the queue under `label`. Returns how many were new.
    pub async fn discover(&self, urls: impl IntoIterator<Item = Url>, label: Label) -> usize {
        let mut seen = HashSet::new();
        let batch: Vec<Url> = urls
            .into_iter()
            .filter(|url| seen.insert(normalize_url(url)))
            .collect();
        if batch.is_empty() {
            return 0;
        }

        let submitted = batch.len();
        let added = self.queue.enqueue(batch, label).await;
        debug!(%label, submitted, added, "Links discovered");
        added
    }

    pub async fn forward_relations(&self, links: &[RelationLink]) -> usize {
        self.discover(links.iter().map(|link| link.url.clone()), Label::Detail)
            .await
    }
}

/// Finds document and pager links on a search-result page.
pub struct ListPageParser {
    document_url: Regex,
    anchors: Selector,
    pager_links: Selector,
}

impl ListPageParser {
    pub fn new(selectors: &ListSelectors) -> CrawlResult<Self> {
        let document_url = Regex::new(&selectors.document_url_pattern)
            .map_err(|e| CrawlError::Config(format!("invalid document URL pattern: {}", e)))?;
        let anchors = Selector::parse("a[href]")
            .map_err(|e| CrawlError::Config(format!("invalid selector: {}", e)))?;
        let pager_links = Selector::parse(&selectors.pager_links).map_err(|e| {
            CrawlError::Config(format!(
                "invalid selector {:?}: {}",
                selectors.pager_links, e
            ))
        })?;
        Ok(Self {
            document_url,
            anchors,
            pager_links,
        })
    }

    /// Absolute anchor targets matching the document URL pattern.
    pub fn document_links(&self, html: &str, base: &Url) -> Vec<Url> {
        let document = Html::parse_document(html);
        document
            .select(&self.anchors)
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|href| base.join(href).ok())
            .filter(|url| self.document_url.is_match(url.as_str()))
            .collect()
    }

    /// Targets of the pager anchors.
    pub fn pager_links(&self, html: &str, base: &Url) -> Vec<Url> {
        let document = Html::parse_document(html);
        document
            .select(&self.pager_links)
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|href| base.join(href).ok())
            .filter(|url| matches!(url.scheme(), "http" | "https"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingQueue;
    use crate::types::RelationKind;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url(&url("https://thuvienphapluat.vn/van-ban/a/b.aspx#tab")),
            "https://thuvienphapluat.vn/van-ban/a/b.aspx"
        );
        assert_eq!(
            normalize_url(&url("https://thuvienphapluat.vn/page/?keyword=luat")),
            "https://thuvienphapluat.vn/page?keyword=luat"
        );
        assert_eq!(
            normalize_url(&url("https://thuvienphapluat.vn/")),
            "https://thuvienphapluat.vn/"
        );
    }

    #[tokio::test]
    async fn test_discover_dedupes_within_batch() {
        let queue = RecordingQueue::new();
        let frontier = LinkFrontier::new(&queue);

        frontier
            .discover(
                vec![
                    url("https://thuvienphapluat.vn/van-ban/a/b.aspx"),
                    url("https://thuvienphapluat.vn/van-ban/a/b.aspx#top"),
                    url("https://thuvienphapluat.vn/van-ban/a/c.aspx"),
                ],
                Label::Detail,
            )
            .await;

        assert_eq!(queue.urls(Label::Detail).len(), 2);
    }

    #[tokio::test]
    async fn test_relations_forwarded_as_detail() {
        let queue = RecordingQueue::new();
        let links = vec![RelationLink {
            kind: RelationKind::Superseding,
            url: url("https://thuvienphapluat.vn/van-ban/a/d.aspx"),
        }];

        LinkFrontier::new(&queue).forward_relations(&links).await;

        assert_eq!(
            queue.all(),
            vec![(url("https://thuvienphapluat.vn/van-ban/a/d.aspx"), Label::Detail)]
        );
    }

    #[tokio::test]
    async fn test_empty_batch_skips_queue() {
        let queue = RecordingQueue::new();
        let added = LinkFrontier::new(&queue).discover(Vec::new(), Label::List).await;
        assert_eq!(added, 0);
        assert!(queue.all().is_empty());
    }

    #[test]
    fn test_list_page_links() {
        let parser = ListPageParser::new(&ListSelectors::default()).unwrap();
        let base = url("https://thuvienphapluat.vn/page/tim-van-ban.aspx?keyword=luat");
        let html = r#"<html><body>
            <a href="/van-ban/Doanh-nghiep/Luat-Dau-tu-2020-321051.aspx">Luật Đầu tư</a>
            <a href="https://thuvienphapluat.vn/van-ban/Bo-may/Hien-phap-2013-215627.aspx">Hiến pháp</a>
            <a href="/van-ban/Doanh-nghiep/">category</a>
            <a href="/page/about.aspx">about</a>
            <div class="cmPager">
                <a href="tim-van-ban.aspx?keyword=luat&amp;page=2">2</a>
                <a href="tim-van-ban.aspx?keyword=luat&amp;page=3">3</a>
            </div>
        </body></html>"#;

        let documents = parser.document_links(html, &base);
        assert_eq!(documents.len(), 2);
        assert!(documents[0].as_str().ends_with("Luat-Dau-tu-2020-321051.aspx"));

        let pages = parser.pager_links(html, &base);
        assert_eq!(
            pages[0].as_str(),
            "https://thuvienphapluat.vn/page/tim-van-ban.aspx?keyword=luat&page=2"
        );
        assert_eq!(pages.len(), 2);
    }
}
