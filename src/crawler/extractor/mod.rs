
use anyhow::{Result, anyhow};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use tracing::debug;
use url::Url;

use super::UrlScope;

/// Elements that never carry page content
const NON_CONTENT_TAGS: &str = "script, style, noscript, nav, header, footer";

/// Primary content containers, in priority order
const MAIN_CONTENT_SELECTORS: &[&str] = &[
    "main",
    "article",
    "div.content",
    "div#content",
    "div.entry-content",
];

/// Text, metadata and outbound links extracted from one HTML page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedPage {
    /// Contents of the `<title>` element, empty if absent
    pub title: String,
    /// Meta description, falling back to the Open Graph description
    pub description: String,
    /// Non-blank, trimmed lines of visible text joined by newlines
    pub text: String,
    /// Absolute in-scope URLs linked from the page, in document order
    pub links: Vec<Url>,
}

/// Extract normalized text, metadata and in-scope links from an HTML page
#[inline]
pub fn extract_page(html: &str, page_url: &Url, scope: &UrlScope) -> Result<ExtractedPage> {
    let mut document = Html::parse_document(html);

    let title = extract_title(&document)?;
    let description = extract_description(&document)?;
    let links = extract_links(&document, page_url, scope)?;

    remove_non_content(&mut document)?;
    let text = extract_text(&document)?;

    debug!(
        "Extracted {}: title='{}', {} chars, {} links",
        page_url,
        title,
        text.len(),
        links.len()
    );

    Ok(ExtractedPage {
        title,
        description,
        text,
        links,
    })
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("Failed to create CSS selector '{}': {:?}", css, e))
}

fn extract_title(document: &Html) -> Result<String> {
    let title_selector = selector("title")?;
    Ok(document
        .select(&title_selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .unwrap_or_default())
}

fn extract_description(document: &Html) -> Result<String> {
    let meta_description = meta_content(document, "meta[name=\"description\"]")?;
    if let Some(description) = meta_description {
        return Ok(description);
    }

    Ok(meta_content(document, "meta[property=\"og:description\"]")?.unwrap_or_default())
}

fn meta_content(document: &Html, css: &str) -> Result<Option<String>> {
    let meta_selector = selector(css)?;
    Ok(document
        .select(&meta_selector)
        .filter_map(|element| element.value().attr("content"))
        .map(str::trim)
        .find(|content| !content.is_empty())
        .map(str::to_string))
}

/// Resolve every `a[href]` against the page URL and keep the in-scope ones
fn extract_links(document: &Html, page_url: &Url, scope: &UrlScope) -> Result<Vec<Url>> {
    let link_selector = selector("a[href]")?;
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for element in document.select(&link_selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };

        match page_url.join(href.trim()) {
            Ok(mut absolute_url) => {
                absolute_url.set_fragment(None);
                if scope.is_valid(&absolute_url) && seen.insert(absolute_url.to_string()) {
                    links.push(absolute_url);
                }
            }
            Err(e) => {
                debug!(
                    "Failed to resolve URL '{}' relative to '{}': {}",
                    href, page_url, e
                );
            }
        }
    }

    Ok(links)
}

fn remove_non_content(document: &mut Html) -> Result<()> {
    let unwanted_selector = selector(NON_CONTENT_TAGS)?;

    // Collect ids first, the tree can't be mutated while selecting
    let unwanted_node_ids: Vec<_> = document
        .select(&unwanted_selector)
        .map(|element| element.id())
        .collect();

    for node_id in unwanted_node_ids {
        if let Some(mut node) = document.tree.get_mut(node_id) {
            node.detach();
        }
    }

    Ok(())
}

fn extract_text(document: &Html) -> Result<String> {
    for css in MAIN_CONTENT_SELECTORS {
        let main_selector = selector(css)?;
        if let Some(element) = document.select(&main_selector).next() {
            debug!("Found main content using selector: {}", css);
            return Ok(collect_lines(element));
        }
    }

    Ok(collect_lines(document.root_element()))
}

/// Flatten an element's text nodes into trimmed, non-blank lines
fn collect_lines(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::lines)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
