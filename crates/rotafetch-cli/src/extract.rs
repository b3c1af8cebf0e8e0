//! Basic page record extraction from raw HTML.
//!
//! Pulls the document title, meta description, canonical link, OpenGraph
//! properties and JSON-LD blocks using CSS selectors. No site-specific
//! heuristics.

use chrono::{DateTime, Utc};
use scraper::{Html, Selector};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Longest identifier used as a file name.
const MAX_IDENTIFIER_LEN: usize = 100;

/// Structured view of one fetched page.
#[derive(Debug, Clone, Serialize)]
pub struct PageRecord {
    pub url: String,
    pub identifier: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub canonical: Option<String>,
    pub open_graph: BTreeMap<String, String>,
    pub json_ld: Vec<Value>,
    pub html_size: usize,
    pub fetched_at: DateTime<Utc>,
}

/// Extract a [`PageRecord`] from `html` fetched from `url`.
pub fn basic_record(url: &str, html: &str) -> PageRecord {
    let document = Html::parse_document(html);

    let title = first_text(&document, "title");
    let description = first_attr(&document, r#"meta[name="description"]"#, "content");
    let canonical = first_attr(&document, r#"link[rel="canonical"]"#, "href");

    let mut open_graph = BTreeMap::new();
    if let Ok(sel) = Selector::parse(r#"meta[property^="og:"]"#) {
        for element in document.select(&sel) {
            let property = element.value().attr("property").unwrap_or("");
            let content = element.value().attr("content").unwrap_or("");
            if let Some(key) = property.strip_prefix("og:") {
                open_graph.insert(key.to_string(), content.trim().to_string());
            }
        }
    }

    let mut json_ld = Vec::new();
    if let Ok(sel) = Selector::parse(r#"script[type="application/ld+json"]"#) {
        for element in document.select(&sel) {
            let text = element.inner_html();
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(text) {
                Ok(value) => json_ld.push(value),
                Err(e) => tracing::debug!("skipping malformed JSON-LD block: {e}"),
            }
        }
    }

    PageRecord {
        url: url.to_string(),
        identifier: identifier_from_url(url),
        title,
        description,
        canonical,
        open_graph,
        json_ld,
        html_size: html.len(),
        fetched_at: Utc::now(),
    }
}

/// Last non-empty path segment of `url`, reduced to file-name-safe characters.
pub fn identifier_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .last()?;
    sanitize_identifier(segment)
}

/// Keep `[A-Za-z0-9._-]`, replacing everything else with `_`.
pub fn sanitize_identifier(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_IDENTIFIER_LEN)
        .collect();
    let cleaned = cleaned.trim_matches('.').to_string();
    (!cleaned.is_empty() && cleaned.chars().any(|c| c.is_ascii_alphanumeric())).then_some(cleaned)
}

fn first_text(document: &Html, css: &str) -> Option<String> {
    let sel = Selector::parse(css).ok()?;
    let text = document
        .select(&sel)
        .next()?
        .text()
        .collect::<Vec<_>>()
        .join(" ");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!text.is_empty()).then_some(text)
}

fn first_attr(document: &Html, css: &str, attr: &str) -> Option<String> {
    let sel = Selector::parse(css).ok()?;
    document
        .select(&sel)
        .filter_map(|el| el.value().attr(attr))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!doctype html>
<html><head>
  <title>
    Jane Doe - Staff Engineer
  </title>
  <meta name="description" content="Jane builds distributed systems.">
  <link rel="canonical" href="https://www.example.com/in/jane-doe">
  <meta property="og:title" content="Jane Doe">
  <meta property="og:type" content="profile">
  <script type="application/ld+json">{"@type": "Person", "name": "Jane Doe"}</script>
  <script type="application/ld+json">{ not json }</script>
</head><body><h1>Jane Doe</h1></body></html>"#;

    #[test]
    fn test_basic_record_fields() {
        let rec = basic_record("https://www.example.com/in/jane-doe/", PAGE);
        assert_eq!(rec.title.as_deref(), Some("Jane Doe - Staff Engineer"));
        assert_eq!(rec.description.as_deref(), Some("Jane builds distributed systems."));
        assert_eq!(rec.canonical.as_deref(), Some("https://www.example.com/in/jane-doe"));
        assert_eq!(rec.open_graph.get("title").map(String::as_str), Some("Jane Doe"));
        assert_eq!(rec.open_graph.get("type").map(String::as_str), Some("profile"));
        assert_eq!(rec.json_ld.len(), 1);
        assert_eq!(rec.json_ld[0]["name"], "Jane Doe");
        assert_eq!(rec.identifier.as_deref(), Some("jane-doe"));
        assert_eq!(rec.html_size, PAGE.len());
    }

    #[test]
    fn test_empty_document() {
        let rec = basic_record("https://www.example.com/", "");
        assert!(rec.title.is_none());
        assert!(rec.open_graph.is_empty());
        assert!(rec.identifier.is_none());
    }

    #[test]
    fn test_sanitize_identifier() {
        assert_eq!(sanitize_identifier("jane doe?x=1").as_deref(), Some("jane_doe_x_1"));
        assert_eq!(sanitize_identifier("../"), None);
        assert_eq!(sanitize_identifier("").as_deref(), None);
    }
}
