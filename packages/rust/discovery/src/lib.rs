//! Pre-crawl discovery: URL validation, reachability probes and robots.txt.
//!
//! Nothing here fetches page content. These checks run before a crawl (or a
//! target URL update) so the crawler only ever sees well-formed, reachable,
//! permitted URLs.

mod parser;

use regex::Regex;
use reqwest::{Client, StatusCode};
use sitecorpus_shared::{Result, SiteCorpusError, SkipReason};
use tracing::{debug, info, instrument, warn};
use url::Url;

pub use parser::{RobotsFile, RobotsRule, RobotsRules, parse_robots_txt};

/// Maximum number of redirects to follow for probes and robots.txt.
const MAX_REDIRECTS: usize = 5;

/// Default timeout in seconds for discovery requests.
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Maximum robots.txt size we are willing to parse (500 KiB).
const MAX_ROBOTS_SIZE: u64 = 500 * 1024;

/// User-Agent string for discovery requests.
const USER_AGENT: &str = concat!("SiteCorpus/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Discovery options
// ---------------------------------------------------------------------------

/// Configuration for discovery requests.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Timeout for HTTP requests in seconds.
    pub timeout_secs: u64,
    /// Agent used for requests and for robots.txt group selection.
    pub user_agent: String,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_agent: USER_AGENT.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// URL validation
// ---------------------------------------------------------------------------

/// Check a candidate URL's shape: http(s) scheme and a non-empty host.
///
/// Performs no I/O.
pub fn validate_url(candidate: &str) -> Result<Url> {
    let trimmed = candidate.trim();
    let url = Url::parse(trimmed)
        .map_err(|e| SiteCorpusError::url_validation(trimmed, e.to_string()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(SiteCorpusError::url_validation(
            trimmed,
            format!("unsupported scheme {:?}", url.scheme()),
        ));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(SiteCorpusError::url_validation(trimmed, "missing host"));
    }

    Ok(url)
}

/// Outcome of a successful reachability probe.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    /// URL after redirects.
    pub final_url: Url,
    pub status: u16,
}

/// Issue a lightweight reachability probe.
///
/// Sends `HEAD`, retrying with `GET` when the server does not implement
/// `HEAD`. Any 4xx/5xx or transport failure is an
/// [`SiteCorpusError::UnreachableUrl`].
#[instrument(skip_all, fields(url = %url))]
pub async fn probe_url(url: &Url, opts: &DiscoveryOptions) -> Result<ProbeReport> {
    let client = build_client(opts)?;
    let unreachable = |reason: String| SiteCorpusError::UnreachableUrl {
        url: url.to_string(),
        reason,
    };

    let mut response = client
        .head(url.as_str())
        .send()
        .await
        .map_err(|e| unreachable(e.to_string()))?;

    if matches!(
        response.status(),
        StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED
    ) {
        debug!("HEAD not supported, retrying with GET");
        response = client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| unreachable(e.to_string()))?;
    }

    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        return Err(unreachable(format!("HTTP {status}")));
    }

    info!(status = status.as_u16(), "probe succeeded");
    Ok(ProbeReport {
        final_url: response.url().clone(),
        status: status.as_u16(),
    })
}

/// Validate the shape of `candidate`, then probe it. The shape check runs
/// first, so a malformed URL never causes network traffic.
pub async fn validate_and_probe(candidate: &str, opts: &DiscoveryOptions) -> Result<Url> {
    let url = validate_url(candidate)?;
    probe_url(&url, opts).await?;
    Ok(url)
}

// ---------------------------------------------------------------------------
// robots.txt
// ---------------------------------------------------------------------------

/// Fetch `<origin>/robots.txt` and select the rules for `opts.user_agent`.
///
/// A missing, oversized, or unreachable robots.txt allows everything.
#[instrument(skip_all, fields(root = %root))]
pub async fn load_robots(root: &Url, opts: &DiscoveryOptions) -> Result<RobotsRules> {
    let robots_url = format!("{}/robots.txt", origin_url(root)?);
    let client = build_client(opts)?;

    let response = match client.get(&robots_url).send().await {
        Ok(r) => r,
        Err(e) => {
            warn!(%robots_url, error = %e, "robots.txt unreachable, allowing all");
            return Ok(RobotsRules::allow_all());
        }
    };

    if !response.status().is_success() {
        debug!(%robots_url, status = %response.status(), "no robots.txt, allowing all");
        return Ok(RobotsRules::allow_all());
    }
    if response.content_length().is_some_and(|len| len > MAX_ROBOTS_SIZE) {
        warn!(%robots_url, "robots.txt too large, allowing all");
        return Ok(RobotsRules::allow_all());
    }

    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => {
            warn!(%robots_url, error = %e, "failed to read robots.txt, allowing all");
            return Ok(RobotsRules::allow_all());
        }
    };

    let rules = parse_robots_txt(&body).rules_for(&opts.user_agent);
    info!(%robots_url, rules = !rules.is_empty(), "robots.txt loaded");
    Ok(rules)
}

// ---------------------------------------------------------------------------
// ExclusionSet
// ---------------------------------------------------------------------------

/// Robots rules plus configured exclude globs, loaded once per crawl.
#[derive(Debug, Clone, Default)]
pub struct ExclusionSet {
    robots: RobotsRules,
    patterns: Vec<Regex>,
}

impl ExclusionSet {
    /// Build from robots rules and glob patterns matched against the URL path.
    pub fn new(robots: RobotsRules, exclude_patterns: &[String]) -> Self {
        Self {
            robots,
            patterns: exclude_patterns
                .iter()
                .filter_map(|p| glob_to_regex(p))
                .collect(),
        }
    }

    /// Nothing excluded.
    pub fn none() -> Self {
        Self::default()
    }

    /// Why `url` must not be dispatched, if it must not.
    pub fn check(&self, url: &Url) -> Option<SkipReason> {
        let path = url.path();
        if self.patterns.iter().any(|p| p.is_match(path)) {
            return Some(SkipReason::ExcludedPattern);
        }

        let target = match url.query() {
            Some(q) => format!("{path}?{q}"),
            None => path.to_string(),
        };
        if !self.robots.is_allowed(&target) {
            return Some(SkipReason::RobotsExcluded);
        }
        None
    }
}

/// Convert a glob-like pattern to a regex.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let escaped = regex::escape(pattern)
        .replace(r"\*\*", ".*")
        .replace(r"\*", "[^/]*")
        .replace(r"\?", ".");
    Regex::new(&format!("^{escaped}$")).ok()
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Extract the origin (scheme + host + port) from a URL.
fn origin_url(url: &Url) -> Result<String> {
    let scheme = url.scheme();
    let host = url
        .host_str()
        .ok_or_else(|| SiteCorpusError::validation(format!("URL has no host: {url}")))?;

    match url.port() {
        Some(port) => Ok(format!("{scheme}://{host}:{port}")),
        None => Ok(format!("{scheme}://{host}")),
    }
}

/// Build a reqwest client with appropriate settings.
fn build_client(opts: &DiscoveryOptions) -> Result<Client> {
    Client::builder()
        .user_agent(opts.user_agent.as_str())
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .timeout(std::time::Duration::from_secs(opts.timeout_secs))
        .build()
        .map_err(|e| SiteCorpusError::Network(format!("failed to build HTTP client: {e}")))
}
