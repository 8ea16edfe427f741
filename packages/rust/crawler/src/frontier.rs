//! URL frontier: what to fetch next, what was seen, and when to stop.
//!
//! The frontier is the single source of ordering truth for a crawl. Workers
//! complete out of order, but links are committed in dispatch order through
//! a small reorder buffer, so the sequence of enqueued URLs (and therefore
//! the set dispatched under a page budget) depends only on page content.

use std::collections::{BTreeMap, HashSet, VecDeque};

use sitecorpus_discovery::ExclusionSet;
use sitecorpus_shared::{CrawlConfig, Result, SiteCorpusError, SkipReason};
use tracing::debug;
use url::Url;

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Discovery heuristics applied to every candidate URL.
#[derive(Debug, Clone, Default)]
pub struct FrontierPolicy {
    /// Paths seeded alongside the root, always from the host root.
    pub well_known_paths: Vec<String>,
    /// Hosts accepted besides the root's own (and its `www.` twin).
    pub allowed_hosts: Vec<String>,
    /// Lowercase extensions (with dot) never enqueued.
    pub skip_extensions: Vec<String>,
    /// Path segments never enqueued.
    pub skip_path_segments: Vec<String>,
}

impl From<&CrawlConfig> for FrontierPolicy {
    fn from(config: &CrawlConfig) -> Self {
        Self {
            well_known_paths: config.well_known_paths.clone(),
            allowed_hosts: config.allowed_hosts.clone(),
            skip_extensions: config
                .skip_extensions
                .iter()
                .map(|e| e.to_ascii_lowercase())
                .collect(),
            skip_path_segments: config
                .skip_path_segments
                .iter()
                .map(|s| s.to_ascii_lowercase())
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Frontier
// ---------------------------------------------------------------------------

/// A URL handed to a worker. `seq` is its dispatch position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub seq: usize,
    pub url: Url,
}

/// What a worker should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontierStep {
    Dispatch(Dispatch),
    /// Queue is empty but in-flight URLs may still discover more.
    Wait,
    Done,
}

/// Result of one dispatched URL as the frontier sees it.
#[derive(Debug, Clone)]
pub enum UrlOutcome {
    /// Fetched; these links were found on the page.
    Fetched { links: Vec<Url> },
    /// Every strategy failed.
    Failed,
}

/// Tracks queued, visited and skipped URLs for one crawl.
#[derive(Debug)]
pub struct Frontier {
    max_pages: usize,
    policy: FrontierPolicy,
    exclusions: ExclusionSet,
    hosts: HashSet<String>,
    seeded: bool,
    queue: VecDeque<Url>,
    /// Normalized keys of everything queued, visited or skipped.
    seen: HashSet<String>,
    dispatched: usize,
    in_flight: HashSet<usize>,
    /// Outcomes waiting for earlier dispatches to be recorded.
    pending: BTreeMap<usize, Vec<Url>>,
    next_commit: usize,
    skipped: Vec<(Url, SkipReason)>,
    succeeded: usize,
    failed: usize,
}

impl Frontier {
    /// Create an empty frontier. A zero page budget is an invariant violation.
    pub fn new(max_pages: usize, policy: FrontierPolicy, exclusions: ExclusionSet) -> Result<Self> {
        if max_pages == 0 {
            return Err(SiteCorpusError::invariant("max pages must be at least 1, got 0"));
        }
        Ok(Self {
            max_pages,
            policy,
            exclusions,
            hosts: HashSet::new(),
            seeded: false,
            queue: VecDeque::new(),
            seen: HashSet::new(),
            dispatched: 0,
            in_flight: HashSet::new(),
            pending: BTreeMap::new(),
            next_commit: 0,
            skipped: Vec::new(),
            succeeded: 0,
            failed: 0,
        })
    }

    /// Enqueue the root plus the well-known paths resolved against its origin.
    ///
    /// `about` seeds `/about` on the root's host even when the root itself
    /// sits deeper (`https://acme.example/shop` still seeds
    /// `https://acme.example/about`).
    pub fn seed(&mut self, root: &Url) -> Result<()> {
        if self.seeded {
            return Err(SiteCorpusError::invariant("frontier seeded twice"));
        }
        let host = root
            .host_str()
            .ok_or_else(|| SiteCorpusError::invariant(format!("root URL has no host: {root}")))?
            .to_ascii_lowercase();

        let bare = host.strip_prefix("www.").unwrap_or(&host).to_string();
        self.hosts.insert(format!("www.{bare}"));
        self.hosts.insert(bare);
        self.hosts.extend(
            self.policy
                .allowed_hosts
                .iter()
                .map(|h| h.trim().to_ascii_lowercase()),
        );
        self.seeded = true;

        let mut seeds = vec![root.clone()];
        seeds.extend(self.policy.well_known_paths.iter().filter_map(|p| {
            let path = format!("/{}", p.trim().trim_start_matches('/'));
            root.join(&path).ok()
        }));
        let added = self.discover(seeds);
        debug!(%root, added, "frontier seeded");
        Ok(())
    }

    /// Next URL to fetch, or whether to wait or stop.
    pub fn next(&mut self) -> FrontierStep {
        if self.dispatched >= self.max_pages {
            return FrontierStep::Done;
        }
        match self.queue.pop_front() {
            Some(url) => {
                let seq = self.dispatched;
                self.dispatched += 1;
                self.in_flight.insert(seq);
                FrontierStep::Dispatch(Dispatch { seq, url })
            }
            None if !self.in_flight.is_empty() => FrontierStep::Wait,
            None => FrontierStep::Done,
        }
    }

    /// Record the outcome of a dispatched URL.
    ///
    /// Links are committed only once every earlier dispatch is recorded.
    pub fn record(&mut self, seq: usize, outcome: UrlOutcome) -> Result<()> {
        if !self.in_flight.remove(&seq) {
            return Err(SiteCorpusError::invariant(format!(
                "outcome recorded for unknown dispatch #{seq}"
            )));
        }

        let links = match outcome {
            UrlOutcome::Fetched { links } => {
                self.succeeded += 1;
                links
            }
            UrlOutcome::Failed => {
                self.failed += 1;
                Vec::new()
            }
        };
        self.pending.insert(seq, links);

        while let Some(links) = self.pending.remove(&self.next_commit) {
            self.discover(links);
            self.next_commit += 1;
        }
        Ok(())
    }

    /// Enqueue same-site candidates not yet seen, in first-seen order.
    /// Returns how many were enqueued.
    pub fn discover(&mut self, urls: impl IntoIterator<Item = Url>) -> usize {
        let mut added = 0;
        for mut url in urls {
            url.set_fragment(None);
            if !self.is_candidate(&url) {
                continue;
            }
            if !self.seen.insert(normalize_url(&url)) {
                continue;
            }
            if let Some(reason) = self.exclusions.check(&url) {
                debug!(%url, ?reason, "skipping excluded URL");
                self.skipped.push((url, reason));
                continue;
            }
            self.queue.push_back(url);
            added += 1;
        }
        added
    }

    /// Whether nothing more will ever be dispatched.
    pub fn is_exhausted(&self) -> bool {
        self.in_flight.is_empty() && (self.dispatched >= self.max_pages || self.queue.is_empty())
    }

    pub fn dispatched(&self) -> usize {
        self.dispatched
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn succeeded(&self) -> usize {
        self.succeeded
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn skipped(&self) -> &[(Url, SkipReason)] {
        &self.skipped
    }

    fn is_candidate(&self, url: &Url) -> bool {
        if !matches!(url.scheme(), "http" | "https") {
            return false;
        }
        let Some(host) = url.host_str() else {
            return false;
        };
        if !self.hosts.contains(&host.to_ascii_lowercase()) {
            return false;
        }

        let path = url.path().to_ascii_lowercase();
        if self
            .policy
            .skip_extensions
            .iter()
            .any(|ext| path.ends_with(ext.as_str()))
        {
            return false;
        }
        !path
            .split('/')
            .any(|segment| self.policy.skip_path_segments.iter().any(|s| s == segment))
    }
}

/// Normalize a URL for deduplication (strip fragment and trailing slash).
fn normalize_url(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    let mut s = normalized.to_string();
    // Remove trailing slash for consistency (except root path)
    if s.ends_with('/') && normalized.path() != "/" {
        s.pop();
    }
    s
}
