//! Markdown-to-plain-text cleanup passes.
//!
//! Each pass is a function `&str -> String` applied in sequence. The result
//! keeps `#` heading lines and blank-line paragraph breaks but no other
//! Markdown syntax or leftover markup.

use std::sync::LazyLock;

use regex::Regex;

/// Run the full cleanup pipeline on Markdown text.
pub(crate) fn run_pipeline(md: &str) -> String {
    let mut result = md.replace("\r\n", "\n");

    result = normalize_headings(&result);
    result = strip_images(&result);
    result = strip_link_syntax(&result);
    result = strip_leftover_html(&result);
    result = strip_emphasis(&result);
    result = unescape_markdown(&result);
    result = normalize_whitespace(&result);
    result = clean_blank_lines(&result);

    result.trim().to_string()
}

// ---------------------------------------------------------------------------
// Pass 1: Normalize heading levels
// ---------------------------------------------------------------------------

/// Ensure there's at most one H1; later H1s become H2.
fn normalize_headings(md: &str) -> String {
    static H_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.+?)\s*#*\s*$").expect("valid regex"));

    let mut h1_count = 0;
    let mut lines: Vec<String> = Vec::new();

    for line in md.lines() {
        let Some(caps) = H_RE.captures(line.trim_start()) else {
            lines.push(line.to_string());
            continue;
        };
        let hashes = &caps[1];
        let text = &caps[2];

        if hashes == "#" {
            h1_count += 1;
            if h1_count > 1 {
                lines.push(format!("## {text}"));
                continue;
            }
        }
        lines.push(format!("{hashes} {text}"));
    }

    lines.join("\n")
}

// ---------------------------------------------------------------------------
// Pass 2: Drop images
// ---------------------------------------------------------------------------

fn strip_images(md: &str) -> String {
    static IMAGE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").expect("valid regex"));

    IMAGE_RE.replace_all(md, "").to_string()
}

// ---------------------------------------------------------------------------
// Pass 3: Keep link text, drop targets
// ---------------------------------------------------------------------------

fn strip_link_syntax(md: &str) -> String {
    static LINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("valid regex"));

    LINK_RE.replace_all(md, "$1").to_string()
}

// ---------------------------------------------------------------------------
// Pass 4: Strip leftover HTML tags
// ---------------------------------------------------------------------------

/// Remove any tag that survived conversion, keeping its text. Code fence
/// markers go too; code content stays as text.
fn strip_leftover_html(md: &str) -> String {
    static HTML_TAG_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"</?[a-zA-Z][^>]*>|<!--.*?-->").expect("valid regex"));

    md.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .map(|line| HTML_TAG_RE.replace_all(line, ""))
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Pass 5: Strip emphasis and inline code markers
// ---------------------------------------------------------------------------

fn strip_emphasis(md: &str) -> String {
    static STRONG_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\*\*|__|`").expect("valid regex"));
    static EM_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(^|[\s(])[*_]([^*_\s][^*_]*?)[*_]").expect("valid regex"));

    let stripped = STRONG_RE.replace_all(md, "");
    EM_RE.replace_all(&stripped, "$1$2").to_string()
}

// ---------------------------------------------------------------------------
// Pass 6: Undo Markdown escapes
// ---------------------------------------------------------------------------

fn unescape_markdown(md: &str) -> String {
    static ESCAPE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\\([\\`*_{}\[\]()#+\-.!|>~])").expect("valid regex"));

    ESCAPE_RE.replace_all(md, "$1").to_string()
}

// ---------------------------------------------------------------------------
// Pass 7: Normalize whitespace
// ---------------------------------------------------------------------------

/// Trim line ends and turn non-breaking spaces and tabs into plain spaces.
fn normalize_whitespace(md: &str) -> String {
    md.lines()
        .map(|line| line.replace(['\u{a0}', '\t'], " ").trim_end().to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Pass 8: Collapse blank lines
// ---------------------------------------------------------------------------

/// Collapse runs of blank lines into exactly one.
fn clean_blank_lines(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    MULTI_BLANK_RE.replace_all(md, "\n\n").to_string()
}
