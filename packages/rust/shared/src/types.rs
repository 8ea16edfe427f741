//! Core domain types for SiteCorpus crawl runs and their derived content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::error::{Result, SiteCorpusError};

// ---------------------------------------------------------------------------
// TargetId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for crawl target (business) identifiers (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(pub Uuid);

impl TargetId {
    /// Generate a new time-sortable target identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for TargetId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TargetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TargetId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// The fetch backend that produced (or failed to produce) a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// Hosted extraction service with a declared output schema.
    PremiumApi,
    /// Script-executing headless browser.
    HeadlessBrowser,
    /// Plain GET without script execution.
    StaticHttp,
}

impl StrategyKind {
    /// Default fallback order used by `auto`.
    pub const FALLBACK_ORDER: [StrategyKind; 3] = [
        StrategyKind::PremiumApi,
        StrategyKind::HeadlessBrowser,
        StrategyKind::StaticHttp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PremiumApi => "premium-api",
            Self::HeadlessBrowser => "headless-browser",
            Self::StaticHttp => "static-http",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strategy preference requested for a crawl.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyPreference {
    /// Try every available strategy in the default fallback order.
    #[default]
    Auto,
    Premium,
    Browser,
    Static,
}

impl StrategyPreference {
    /// The ordered strategy list this preference asks for.
    pub fn strategies(&self) -> Vec<StrategyKind> {
        match self {
            Self::Auto => StrategyKind::FALLBACK_ORDER.to_vec(),
            Self::Premium => vec![StrategyKind::PremiumApi],
            Self::Browser => vec![StrategyKind::HeadlessBrowser],
            Self::Static => vec![StrategyKind::StaticHttp],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Premium => "premium",
            Self::Browser => "browser",
            Self::Static => "static",
        }
    }
}

impl std::fmt::Display for StrategyPreference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StrategyPreference {
    type Err = SiteCorpusError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "premium" => Ok(Self::Premium),
            "browser" => Ok(Self::Browser),
            "static" => Ok(Self::Static),
            other => Err(SiteCorpusError::validation(format!(
                "unknown strategy {other:?} (expected auto, premium, browser or static)"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// CrawlTarget
// ---------------------------------------------------------------------------

/// What to crawl. Immutable for the duration of one crawl run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlTarget {
    /// Owning business identifier.
    pub target_id: TargetId,
    /// Root URL; also the first URL dispatched.
    pub root_url: Url,
    /// Upper bound on URLs dispatched by the frontier.
    pub max_pages: usize,
    /// Requested strategy preference.
    pub strategy: StrategyPreference,
}

impl CrawlTarget {
    /// Build a target, rejecting a non-positive page budget or a non-HTTP root.
    pub fn new(
        target_id: TargetId,
        root_url: Url,
        max_pages: i64,
        strategy: StrategyPreference,
    ) -> Result<Self> {
        if max_pages < 1 {
            return Err(SiteCorpusError::invariant(format!(
                "max pages must be at least 1, got {max_pages}"
            )));
        }
        if !matches!(root_url.scheme(), "http" | "https") || root_url.host_str().is_none() {
            return Err(SiteCorpusError::url_validation(
                root_url.as_str(),
                "root URL must be http(s) with a host",
            ));
        }
        let max_pages = usize::try_from(max_pages)
            .map_err(|_| SiteCorpusError::invariant(format!("max pages {max_pages} too large")))?;

        Ok(Self {
            target_id,
            root_url,
            max_pages,
            strategy,
        })
    }
}

// ---------------------------------------------------------------------------
// PageResult
// ---------------------------------------------------------------------------

/// Why one strategy could not produce a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum FailureReason {
    /// Network failure, timeout, non-2xx, or unparseable content from a plain fetch.
    Fetch(String),
    /// Headless rendering timeout or browser crash.
    Render(String),
    /// The premium backend refused or rate-limited the request.
    QuotaExceeded(String),
    /// The premium backend failed in any other way.
    Remote(String),
    /// The assigned proxy was unusable (refused, unreachable, malformed).
    Proxy(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fetch(m) => write!(f, "fetch error: {m}"),
            Self::Render(m) => write!(f, "render error: {m}"),
            Self::QuotaExceeded(m) => write!(f, "quota exceeded: {m}"),
            Self::Remote(m) => write!(f, "remote error: {m}"),
            Self::Proxy(m) => write!(f, "proxy error: {m}"),
        }
    }
}

/// An earlier strategy attempt that failed before the final outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyFailure {
    pub strategy: StrategyKind,
    pub reason: FailureReason,
}

/// Shape of [`PageResult::raw_content`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentFormat {
    #[default]
    Html,
    Markdown,
}

/// Outcome of fetching one URL. Produced exactly once per attempted URL per crawl.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResult {
    pub url: Url,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Full document markup, or Markdown when the backend returns it.
    #[serde(default)]
    pub raw_content: String,
    #[serde(default)]
    pub content_format: ContentFormat,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    pub fetched_at: DateTime<Utc>,
    /// The strategy that succeeded, or the last one tried.
    pub strategy: StrategyKind,
    /// Absolute links found in the content, in document order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Url>,
    /// Strategies that failed for this URL before the final outcome.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<StrategyFailure>,
}

impl PageResult {
    /// A successful fetch with the given content.
    pub fn succeeded(url: Url, strategy: StrategyKind, raw_content: impl Into<String>) -> Self {
        Self {
            url,
            title: None,
            description: None,
            raw_content: raw_content.into(),
            content_format: ContentFormat::Html,
            success: true,
            failure: None,
            fetched_at: Utc::now(),
            strategy,
            links: Vec::new(),
            attempts: Vec::new(),
        }
    }

    /// A failed fetch.
    pub fn failed(url: Url, strategy: StrategyKind, reason: FailureReason) -> Self {
        Self {
            url,
            title: None,
            description: None,
            raw_content: String::new(),
            content_format: ContentFormat::Html,
            success: false,
            failure: Some(reason),
            fetched_at: Utc::now(),
            strategy,
            links: Vec::new(),
            attempts: Vec::new(),
        }
    }

    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = title.filter(|t| !t.trim().is_empty());
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description.filter(|d| !d.trim().is_empty());
        self
    }

    pub fn with_links(mut self, links: Vec<Url>) -> Self {
        self.links = links;
        self
    }

    pub fn with_format(mut self, format: ContentFormat) -> Self {
        self.content_format = format;
        self
    }
}

// ---------------------------------------------------------------------------
// Processing
// ---------------------------------------------------------------------------

/// Cleaned, scored content derived from a successful [`PageResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedPage {
    pub url: Url,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Cleaned text; blocks separated by blank lines, headings as `#` lines.
    pub text: String,
    pub quality_score: f64,
    /// Hex SHA-256 of the normalized text.
    pub fingerprint: String,
    /// Earlier page in the same run this one duplicates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate_of: Option<Url>,
    pub fetched_at: DateTime<Utc>,
}

/// Why a page was kept out of chunking. Recorded, not a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rejection {
    LowQuality { score: f64, threshold: f64 },
    Duplicate { original: Url },
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LowQuality { score, threshold } => {
                write!(f, "low quality ({score:.2} < {threshold:.2})")
            }
            Self::Duplicate { original } => write!(f, "duplicate of {original}"),
        }
    }
}

/// A URL the frontier refused to dispatch. Recorded, not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    RobotsExcluded,
    ExcludedPattern,
}

// ---------------------------------------------------------------------------
// Chunk
// ---------------------------------------------------------------------------

/// A bounded unit of text carved from a [`ProcessedPage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable id derived from the source URL and index.
    pub chunk_id: String,
    pub source_url: Url,
    /// Zero-based position within the source.
    pub index: usize,
    /// Number of chunks produced for the source.
    pub total: usize,
    pub text: String,
    pub token_estimate: usize,
    /// Section heading, for section-bounded chunks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
}

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

/// Lifecycle of one crawl run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: RunState) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).expect("valid url")
    }

    #[test]
    fn target_id_roundtrip() {
        let id = TargetId::new();
        let parsed: TargetId = id.to_string().parse().expect("parse TargetId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn crawl_target_rejects_non_positive_budget() {
        let err = CrawlTarget::new(
            TargetId::new(),
            url("https://example.com"),
            -1,
            StrategyPreference::Auto,
        )
        .unwrap_err();
        assert!(matches!(err, SiteCorpusError::Invariant { .. }));

        assert!(
            CrawlTarget::new(TargetId::new(), url("https://example.com"), 0, StrategyPreference::Auto)
                .is_err()
        );
    }

    #[test]
    fn crawl_target_rejects_non_http_root() {
        let err = CrawlTarget::new(
            TargetId::new(),
            url("ftp://example.com/"),
            5,
            StrategyPreference::Static,
        )
        .unwrap_err();
        assert!(matches!(err, SiteCorpusError::UrlValidation { .. }));
    }

    #[test]
    fn strategy_preference_parsing_and_order() {
        let auto: StrategyPreference = "AUTO".parse().expect("parse");
        assert_eq!(auto.strategies(), StrategyKind::FALLBACK_ORDER.to_vec());

        let browser: StrategyPreference = "browser".parse().expect("parse");
        assert_eq!(browser.strategies(), vec![StrategyKind::HeadlessBrowser]);

        assert!("playwright".parse::<StrategyPreference>().is_err());
    }

    #[test]
    fn page_result_serialization_skips_empty_fields() {
        let page = PageResult::failed(
            url("https://example.com/about"),
            StrategyKind::StaticHttp,
            FailureReason::Fetch("HTTP 404".into()),
        );
        let json = serde_json::to_string(&page).expect("serialize");
        assert!(json.contains("\"strategy\":\"static-http\""));
        assert!(json.contains("\"kind\":\"fetch\""));
        assert!(!json.contains("links"));

        let parsed: PageResult = serde_json::from_str(&json).expect("deserialize");
        assert!(!parsed.success);
        assert_eq!(parsed.failure, Some(FailureReason::Fetch("HTTP 404".into())));
    }

    #[test]
    fn blank_titles_are_dropped() {
        let page = PageResult::succeeded(url("https://example.com"), StrategyKind::StaticHttp, "")
            .with_title(Some("   ".into()))
            .with_description(Some("Plumbing services".into()));
        assert!(page.title.is_none());
        assert_eq!(page.description.as_deref(), Some("Plumbing services"));
    }

    #[test]
    fn run_state_transitions() {
        assert!(RunState::Idle.can_transition_to(RunState::Running));
        assert!(RunState::Running.can_transition_to(RunState::Cancelled));
        assert!(!RunState::Completed.can_transition_to(RunState::Running));
        assert!(!RunState::Idle.can_transition_to(RunState::Completed));
        assert!(RunState::Failed.is_terminal());
    }
}
