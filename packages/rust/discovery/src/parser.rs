//! robots.txt parser.
//!
//! Supports the subset of the Robots Exclusion Protocol that matters for a
//! polite site crawl:
//! - `User-agent:` groups (consecutive agent lines share one rule set)
//! - `Allow:` / `Disallow:` with `*` wildcards and a trailing `$` anchor
//! - longest-match precedence, `Allow` wins ties
//!
//! Anything else (`Sitemap:`, `Crawl-delay:`, comments) is ignored.

use regex::Regex;
use std::sync::LazyLock;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Every group in a robots.txt file.
#[derive(Debug, Clone, Default)]
pub struct RobotsFile {
    groups: Vec<RobotsGroup>,
}

#[derive(Debug, Clone, Default)]
struct RobotsGroup {
    /// Lowercased product tokens; `*` for the catch-all group.
    agents: Vec<String>,
    rules: Vec<RobotsRule>,
}

/// A single `Allow`/`Disallow` line.
#[derive(Debug, Clone)]
pub struct RobotsRule {
    /// `true` for `Allow`.
    pub allow: bool,
    /// The raw path pattern.
    pub pattern: String,
    matcher: Regex,
}

impl RobotsRule {
    fn new(allow: bool, pattern: &str) -> Option<Self> {
        Some(Self {
            allow,
            pattern: pattern.to_string(),
            matcher: pattern_to_regex(pattern)?,
        })
    }

    fn matches(&self, path: &str) -> bool {
        self.matcher.is_match(path)
    }
}

/// The rules that apply to one user agent.
#[derive(Debug, Clone, Default)]
pub struct RobotsRules {
    rules: Vec<RobotsRule>,
}

impl RobotsRules {
    /// Rules that allow everything (missing or unreadable robots.txt).
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Whether `path` (path plus optional `?query`) may be fetched.
    pub fn is_allowed(&self, path: &str) -> bool {
        let best = self
            .rules
            .iter()
            .filter(|r| r.matches(path))
            .max_by(|a, b| {
                a.pattern
                    .len()
                    .cmp(&b.pattern.len())
                    .then(a.allow.cmp(&b.allow))
            });

        best.is_none_or(|r| r.allow)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl RobotsFile {
    /// Select the rules for `user_agent`.
    ///
    /// The group whose token is the longest substring of the agent wins;
    /// groups sharing that token are merged. Falls back to `*`.
    pub fn rules_for(&self, user_agent: &str) -> RobotsRules {
        let agent = user_agent.to_ascii_lowercase();

        let best_len = self
            .groups
            .iter()
            .flat_map(|g| g.agents.iter())
            .filter(|token| token.as_str() != "*" && agent.contains(token.as_str()))
            .map(|token| token.len())
            .max();

        let selected: Vec<&RobotsGroup> = match best_len {
            Some(len) => self
                .groups
                .iter()
                .filter(|g| {
                    g.agents
                        .iter()
                        .any(|t| t != "*" && t.len() == len && agent.contains(t.as_str()))
                })
                .collect(),
            None => self
                .groups
                .iter()
                .filter(|g| g.agents.iter().any(|t| t == "*"))
                .collect(),
        };

        RobotsRules {
            rules: selected
                .into_iter()
                .flat_map(|g| g.rules.iter().cloned())
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Regex patterns (compiled once)
// ---------------------------------------------------------------------------

/// Matches `Field: value`, capturing both.
static DIRECTIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z-]+)\s*:\s*(.*?)\s*$").expect("directive regex")
});

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Parse a robots.txt body. Never fails; unknown lines are skipped.
pub fn parse_robots_txt(content: &str) -> RobotsFile {
    let mut groups: Vec<RobotsGroup> = Vec::new();
    let mut current: Option<RobotsGroup> = None;

    for raw in content.lines() {
        let line = raw.split('#').next().unwrap_or_default();
        let Some(caps) = DIRECTIVE_RE.captures(line) else {
            continue;
        };
        let field = caps[1].to_ascii_lowercase();
        let value = caps[2].to_string();

        match field.as_str() {
            "user-agent" => {
                // A user-agent line after rules starts a new group
                if current.as_ref().is_some_and(|g| !g.rules.is_empty()) {
                    groups.extend(current.take());
                }
                current
                    .get_or_insert_with(RobotsGroup::default)
                    .agents
                    .push(value.to_ascii_lowercase());
            }
            "allow" | "disallow" => {
                let Some(group) = current.as_mut() else {
                    continue;
                };
                // `Disallow:` with no value allows everything
                if value.is_empty() {
                    continue;
                }
                if let Some(rule) = RobotsRule::new(field == "allow", &value) {
                    group.rules.push(rule);
                }
            }
            _ => {}
        }
    }

    groups.extend(current);
    RobotsFile { groups }
}

/// Translate a robots path pattern into an anchored regex.
fn pattern_to_regex(pattern: &str) -> Option<Regex> {
    let (body, anchored) = match pattern.strip_suffix('$') {
        Some(body) => (body, true),
        None => (pattern, false),
    };
    let escaped = regex::escape(body).replace(r"\*", ".*");
    let end = if anchored { "$" } else { "" };
    Regex::new(&format!("^{escaped}{end}")).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# Example robots.txt
User-agent: *
Disallow: /private/
Disallow: /cart
Allow: /private/press-kit

User-agent: BadBot
User-agent: EvilScraper
Disallow: /

Sitemap: https://example.com/sitemap.xml
";

    #[test]
    fn wildcard_group_applies_to_browsers() {
        let rules = parse_robots_txt(SAMPLE).rules_for("Mozilla/5.0 (X11; Linux x86_64)");
        assert!(rules.is_allowed("/"));
        assert!(rules.is_allowed("/about"));
        assert!(!rules.is_allowed("/private/team"));
        assert!(!rules.is_allowed("/cart?item=3"));
        assert!(rules.is_allowed("/private/press-kit"));
    }

    #[test]
    fn specific_group_wins_over_wildcard() {
        let rules = parse_robots_txt(SAMPLE).rules_for("EvilScraper/2.1");
        assert!(!rules.is_allowed("/"));
        assert!(!rules.is_allowed("/about"));
    }

    #[test]
    fn wildcards_and_end_anchor() {
        let content = "User-agent: *\nDisallow: /*.pdf$\nDisallow: /search*q=\n";
        let rules = parse_robots_txt(content).rules_for("anything");
        assert!(!rules.is_allowed("/files/brochure.pdf"));
        assert!(rules.is_allowed("/files/brochure.pdf.html"));
        assert!(!rules.is_allowed("/search?q=plumbing"));
    }

    #[test]
    fn allow_wins_equal_length_tie() {
        let content = "User-agent: *\nDisallow: /page\nAllow: /page\n";
        let rules = parse_robots_txt(content).rules_for("anything");
        assert!(rules.is_allowed("/page"));
    }

    #[test]
    fn empty_disallow_allows_everything() {
        let rules = parse_robots_txt("User-agent: *\nDisallow:\n").rules_for("anything");
        assert!(rules.is_empty());
        assert!(rules.is_allowed("/anything"));
    }

    #[test]
    fn rules_before_any_agent_are_ignored() {
        let rules = parse_robots_txt("Disallow: /\n").rules_for("anything");
        assert!(rules.is_allowed("/"));
    }
}
