//! HTML parser for extracting links and the page title
//!
//! Links are resolved against the page URL and filtered to HTTP(S) targets.

use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Extracted information from an HTML page
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    /// The page title (from the `<title>` tag)
    pub title: Option<String>,

    /// All followable links on the page, absolute and deduplicated in order
    pub links: Vec<Url>,
}

/// Parses HTML content and extracts links and the title
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">` anywhere in the document
/// - `<link rel="canonical" href="...">`
///
/// **Exclude:**
/// - `<a href="..." download>`
/// - `javascript:`, `mailto:`, `tel:` and `data:` links
/// - Fragment-only links (same-page anchors)
/// - Anything that does not resolve to an HTTP(S) URL
///
/// # Example
///
/// ```
/// use sumi_survey::renderer::parse_html;
/// use url::Url;
///
/// let html = r#"<html><head><title>Test</title></head><body><a href="/page">Link</a></body></html>"#;
/// let base_url = Url::parse("https://example.com/").unwrap();
/// let parsed = parse_html(html, &base_url);
/// assert_eq!(parsed.title, Some("Test".to_string()));
/// assert_eq!(parsed.links[0].as_str(), "https://example.com/page");
/// ```
pub fn parse_html(html: &str, base_url: &Url) -> ParsedPage {
    let document = Html::parse_document(html);

    ParsedPage {
        title: extract_title(&document),
        links: extract_links(&document, base_url),
    }
}

fn extract_title(document: &Html) -> Option<String> {
    let title_selector = Selector::parse("title").ok()?;

    document
        .select(&title_selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn extract_links(document: &Html, base_url: &Url) -> Vec<Url> {
    let mut links: Vec<Url> = Vec::new();
    let mut seen: HashSet<Url> = HashSet::new();
    let mut push = |url: Url| {
        if seen.insert(url.clone()) {
            links.push(url);
        }
    };

    if let Ok(a_selector) = Selector::parse("a[href]") {
        for element in document.select(&a_selector) {
            if element.value().attr("download").is_some() {
                continue;
            }
            if let Some(url) = element
                .value()
                .attr("href")
                .and_then(|href| resolve_link(href, base_url))
            {
                push(url);
            }
        }
    }

    if let Ok(canonical_selector) = Selector::parse("link[rel='canonical'][href]") {
        for element in document.select(&canonical_selector) {
            if let Some(url) = element
                .value()
                .attr("href")
                .and_then(|href| resolve_link(href, base_url))
            {
                push(url);
            }
        }
    }

    links
}

/// Resolves an href against the page URL, dropping links that cannot be crawled
fn resolve_link(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lowered = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lowered.starts_with(scheme))
    {
        return None;
    }

    let mut absolute = base_url.join(href).ok()?;
    if absolute.scheme() != "http" && absolute.scheme() != "https" {
        return None;
    }
    absolute.set_fragment(None);
    Some(absolute)
}
