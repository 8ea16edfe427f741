//! Page metadata and link extraction shared by the fetch strategies.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

static TITLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("title selector"));
static H1_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").expect("h1 selector"));
static DESCRIPTION_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"meta[name="description"], meta[property="og:description"]"#)
        .expect("description selector")
});
static LINK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("link selector"));

/// `[text](target)` links in Markdown, excluding images.
static MD_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:^|[^!])\[[^\]]*\]\(\s*<?([^)\s>]+)>?(?:\s+"[^"]*")?\s*\)"#)
        .expect("markdown link regex")
});

/// Metadata pulled from a rendered or fetched document.
#[derive(Debug, Clone, Default)]
pub struct PageMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub links: Vec<Url>,
}

/// Extract title, description and links from an HTML document.
pub fn extract_metadata(html: &str, base_url: &Url) -> PageMetadata {
    let doc = Html::parse_document(html);
    PageMetadata {
        title: extract_title(&doc),
        description: extract_description(&doc),
        links: extract_links(&doc, base_url),
    }
}

/// `<title>`, falling back to the first `<h1>`.
fn extract_title(doc: &Html) -> Option<String> {
    doc.select(&TITLE_SEL)
        .chain(doc.select(&H1_SEL))
        .map(|el| collapse(&el.text().collect::<String>()))
        .find(|t| !t.is_empty())
}

fn extract_description(doc: &Html) -> Option<String> {
    doc.select(&DESCRIPTION_SEL)
        .filter_map(|el| el.value().attr("content"))
        .map(collapse)
        .find(|d| !d.is_empty())
}

/// Extract all links from a document, resolved against the base URL.
pub fn extract_links(doc: &Html, base_url: &Url) -> Vec<Url> {
    doc.select(&LINK_SEL)
        .filter_map(|el| el.value().attr("href"))
        .filter_map(|href| resolve_link(base_url, href))
        .collect()
}

/// Links found in Markdown content, resolved against the base URL.
pub fn markdown_links(markdown: &str, base_url: &Url) -> Vec<Url> {
    MD_LINK_RE
        .captures_iter(markdown)
        .filter_map(|caps| resolve_link(base_url, &caps[1]))
        .collect()
}

fn resolve_link(base_url: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    // Skip anchors, javascript:, mailto:, tel:
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
    {
        return None;
    }

    let mut resolved = base_url.join(href).ok()?;
    resolved.set_fragment(None);
    matches!(resolved.scheme(), "http" | "https").then_some(resolved)
}

/// Cheap check that a body is markup rather than JSON, binary, or plain text.
pub fn looks_like_html(body: &str) -> bool {
    let head: String = body
        .trim_start_matches('\u{feff}')
        .trim_start()
        .chars()
        .take(1024)
        .collect::<String>()
        .to_ascii_lowercase();
    head.starts_with("<!doctype html")
        || head.starts_with("<html")
        || head.contains("<body")
        || head.contains("<head")
        || (head.starts_with('<') && head.contains("</"))
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://acme.example/services/").unwrap()
    }

    #[test]
    fn extracts_title_and_description() {
        let html = r#"<html><head>
            <title>  Acme   Plumbing </title>
            <meta name="description" content="Emergency plumbing, 24/7.">
        </head><body><h1>Welcome</h1></body></html>"#;
        let meta = extract_metadata(html, &base());
        assert_eq!(meta.title.as_deref(), Some("Acme Plumbing"));
        assert_eq!(meta.description.as_deref(), Some("Emergency plumbing, 24/7."));
    }

    #[test]
    fn title_falls_back_to_h1() {
        let html = "<html><head><title> </title></head><body><h1>Our Services</h1></body></html>";
        let meta = extract_metadata(html, &base());
        assert_eq!(meta.title.as_deref(), Some("Our Services"));
        assert!(meta.description.is_none());
    }

    #[test]
    fn test_extract_links() {
        let html = r##"<html><body>
            <a href="/about">About</a>
            <a href="https://external.com">External</a>
            <a href="#section">Anchor</a>
            <a href="drains">Relative</a>
            <a href="mailto:hi@acme.example">Mail</a>
            <a href="/contact#form">Contact</a>
        </body></html>"##;

        let doc = Html::parse_document(html);
        let links: Vec<String> = extract_links(&doc, &base())
            .into_iter()
            .map(|u| u.to_string())
            .collect();

        assert_eq!(
            links,
            [
                "https://acme.example/about",
                "https://external.com/",
                "https://acme.example/services/drains",
                "https://acme.example/contact",
            ]
        );
    }

    #[test]
    fn markdown_links_skip_images() {
        let md = "See [pricing](/pricing) and [team](https://acme.example/team \"Team\").\n\
                  ![logo](/logo.png)";
        let links: Vec<String> = markdown_links(md, &base())
            .into_iter()
            .map(|u| u.to_string())
            .collect();
        assert_eq!(links, ["https://acme.example/pricing", "https://acme.example/team"]);
    }

    #[test]
    fn html_detection() {
        assert!(looks_like_html("<!DOCTYPE html><html><body>x</body></html>"));
        assert!(looks_like_html("\n  <div><p>fragment</p></div>"));
        assert!(!looks_like_html("{\"json\": true}"));
        assert!(!looks_like_html("plain text body"));
    }
}
