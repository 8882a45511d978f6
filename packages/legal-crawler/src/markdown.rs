use scraper::Html;

/// Convert an HTML fragment to Markdown.
///
/// Empty input gives empty output. If conversion fails the fragment's plain
/// text is returned instead.
pub fn html_to_markdown(html: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }
    htmd::convert(html).unwrap_or_else(|_| {
        let fragment = Html::parse_fragment(html);
        fragment.root_element().text().collect::<String>()
    })
}
