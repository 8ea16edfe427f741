//! Raw page content to cleaned text blocks.
//!
//! HTML goes through main-container selection, chrome removal (navigation,
//! headers, footers, sidebars, cookie banners), `htmd` conversion and the
//! cleanup passes. Markdown from the premium backend skips straight to the
//! cleanup passes.

use std::sync::LazyLock;

use scraper::{Html, Selector};
use sitecorpus_shared::{ContentFormat, PageResult, Result, SiteCorpusError};
use regex::Regex;

use crate::cleanup;

/// Content containers in priority order.
static MAIN_SELECTORS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    [
        "main",
        "[role=\"main\"]",
        ".main-content",
        ".content",
        ".post-content",
        ".entry-content",
        "article",
        ".container",
        "body",
    ]
    .iter()
    .map(|s| Selector::parse(s).expect("valid selector"))
    .collect()
});

/// Structural chrome removed from the chosen container.
static CHROME_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(
        "nav, header, footer, aside, form, script, style, noscript, iframe, svg, \
         [role=\"navigation\"], [role=\"banner\"], [role=\"contentinfo\"], \
         .nav, .navbar, .menu, .footer, .sidebar, .breadcrumb, .breadcrumbs, \
         .cookie, .cookie-banner, #cookie-banner, .cookie-consent",
    )
    .expect("valid selector")
});

/// One paragraph-level unit of cleaned text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Block {
    Heading { level: usize, text: String },
    Text(String),
}

impl Block {
    /// The block as it appears in a page's cleaned text.
    pub fn render(&self) -> String {
        match self {
            Self::Heading { level, text } => format!("{} {text}", "#".repeat(*level)),
            Self::Text(text) => text.clone(),
        }
    }
}

/// Join blocks into a page's cleaned text (blank line between blocks).
pub fn render_blocks(blocks: &[Block]) -> String {
    blocks
        .iter()
        .map(Block::render)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Clean a fetched page into blocks.
pub fn clean_page(page: &PageResult) -> Result<Vec<Block>> {
    let markdown = match page.content_format {
        ContentFormat::Html => html_to_markdown(&page.raw_content)?,
        ContentFormat::Markdown => page.raw_content.clone(),
    };
    Ok(split_blocks(&cleanup::run_pipeline(&markdown)))
}

fn html_to_markdown(html: &str) -> Result<String> {
    let content_html = main_content_html(html);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style", "nav", "iframe", "noscript", "svg", "img"])
        .build();

    converter
        .convert(&content_html)
        .map_err(|e| SiteCorpusError::Conversion(format!("htmd conversion failed: {e}")))
}

/// Inner HTML of the first non-empty content container, minus chrome.
fn main_content_html(html: &str) -> String {
    let doc = Html::parse_document(html);

    let Some(container) = MAIN_SELECTORS.iter().find_map(|selector| {
        doc.select(selector)
            .find(|el| el.text().any(|t| !t.trim().is_empty()))
    }) else {
        return String::new();
    };

    // Both strings come from the same tree, so outer HTML matches verbatim.
    let mut content = container.inner_html();
    for chrome in container.select(&CHROME_SELECTOR) {
        content = content.replacen(&chrome.html(), "", 1);
    }
    content
}

/// Split cleaned Markdown into heading and text blocks.
fn split_blocks(text: &str) -> Vec<Block> {
    static HEADING_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^(#{1,6}) (.+)$").expect("valid regex"));
    static LIST_MARKER_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^(?:[-*+]|\d+[.)]|>)\s+").expect("valid regex"));
    static TABLE_RULE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^\|?[\s:|-]+\|?$").expect("valid regex"));

    let mut blocks = Vec::new();
    let mut pending: Vec<String> = Vec::new();

    let flush = |pending: &mut Vec<String>, blocks: &mut Vec<Block>| {
        let joined = collapse(&pending.join(" "));
        if !joined.is_empty() {
            blocks.push(Block::Text(joined));
        }
        pending.clear();
    };

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            flush(&mut pending, &mut blocks);
            continue;
        }
        if let Some(caps) = HEADING_RE.captures(line) {
            flush(&mut pending, &mut blocks);
            let text = collapse(&caps[2]);
            if !text.is_empty() {
                blocks.push(Block::Heading {
                    level: caps[1].len(),
                    text,
                });
            }
            continue;
        }
        if line.contains('|') && TABLE_RULE_RE.is_match(line) {
            continue;
        }

        let line = LIST_MARKER_RE.replace(line, "");
        pending.push(line.replace('|', " "));
    }
    flush(&mut pending, &mut blocks);

    blocks
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitecorpus_shared::StrategyKind;
    use url::Url;

    fn html_page(html: &str) -> PageResult {
        PageResult::succeeded(
            Url::parse("https://acme.example/").unwrap(),
            StrategyKind::StaticHttp,
            html,
        )
    }

    #[test]
    fn strips_chrome_and_keeps_main_content() {
        let html = r#"<html><body>
            <header><a href="/">Acme</a></header>
            <nav><ul><li><a href="/about">About</a></li></ul></nav>
            <main>
              <h1>Acme Plumbing</h1>
              <p>We fix <strong>leaky</strong> pipes across <a href="/areas">Springfield</a>.</p>
              <aside>Related posts</aside>
            </main>
            <footer><p>Copyright 2024</p></footer>
        </body></html>"#;

        let blocks = clean_page(&html_page(html)).unwrap();
        assert_eq!(
            blocks,
            vec![
                Block::Heading {
                    level: 1,
                    text: "Acme Plumbing".into()
                },
                Block::Text("We fix leaky pipes across Springfield.".into()),
            ]
        );
    }

    #[test]
    fn falls_back_to_body_and_removes_cookie_banner() {
        let html = r#"<html><body>
            <div class="cookie-banner">We use cookies</div>
            <p>Open Monday to Friday.</p>
        </body></html>"#;

        let text = render_blocks(&clean_page(&html_page(html)).unwrap());
        assert_eq!(text, "Open Monday to Friday.");
    }

    #[test]
    fn skips_empty_main_container() {
        let html = r#"<html><body><main> </main><article><p>Real text here.</p></article></body></html>"#;
        let text = render_blocks(&clean_page(&html_page(html)).unwrap());
        assert_eq!(text, "Real text here.");
    }

    #[test]
    fn markdown_content_skips_conversion() {
        let page = html_page("# Services\n\n- Drain cleaning\n- **Boiler** repair\n\nCall [us](/contact).")
            .with_format(ContentFormat::Markdown);
        let blocks = clean_page(&page).unwrap();
        assert_eq!(
            render_blocks(&blocks),
            "# Services\n\nDrain cleaning Boiler repair\n\nCall us."
        );
    }

    #[test]
    fn empty_document_has_no_blocks() {
        assert!(clean_page(&html_page("<html><body></body></html>")).unwrap().is_empty());
    }
}
