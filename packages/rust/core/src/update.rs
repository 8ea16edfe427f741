//! Re-crawl and target URL update flows.
//!
//! A re-crawl replaces a target's stored pages with a fresh run and reports
//! how the site changed: old vs new page counts plus added, removed, changed
//! and unchanged URLs by a hash of each page's cleaned text.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use url::Url;

use sitecorpus_content::{clean_page, render_blocks};
use sitecorpus_crawler::CrawlOrchestrator;
use sitecorpus_discovery::DiscoveryOptions;
use sitecorpus_shared::{
    AppConfig, CrawlTarget, PageResult, Result, SiteCorpusError, TargetRegistryEntry,
};

use crate::pipeline::{CrawlReport, ProgressReporter, crawl_target};

// ---------------------------------------------------------------------------
// Diff helpers
// ---------------------------------------------------------------------------

/// Pages categorized by how they changed between two runs.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PageDiff {
    /// Fetched now, absent from the previous run.
    pub added: Vec<Url>,
    /// In the previous run, not fetched now.
    pub removed: Vec<Url>,
    /// Fetched in both runs with different content.
    pub changed: Vec<Url>,
    pub unchanged: Vec<Url>,
}

/// Hex SHA-256 of a page's cleaned text.
///
/// Markup-only churn (script nonces, build hashes, CSRF tokens) leaves the
/// hash alone. Pages that cannot be cleaned hash their raw content.
pub fn content_hash(page: &PageResult) -> String {
    let text = match clean_page(page) {
        Ok(blocks) => render_blocks(&blocks),
        Err(_) => page.raw_content.clone(),
    };
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

/// Diff two runs by URL. Only successful fetches take part.
pub fn diff_pages(previous: &[PageResult], current: &[PageResult]) -> PageDiff {
    let previous_by_url: HashMap<&Url, String> = previous
        .iter()
        .filter(|p| p.success)
        .map(|p| (&p.url, content_hash(p)))
        .collect();

    let current_urls: HashSet<&Url> = current
        .iter()
        .filter(|p| p.success)
        .map(|p| &p.url)
        .collect();

    let mut diff = PageDiff::default();

    for page in current.iter().filter(|p| p.success) {
        match previous_by_url.get(&page.url) {
            Some(old) if *old == content_hash(page) => diff.unchanged.push(page.url.clone()),
            Some(_) => diff.changed.push(page.url.clone()),
            None => diff.added.push(page.url.clone()),
        }
    }

    for page in previous.iter().filter(|p| p.success) {
        if !current_urls.contains(&page.url) {
            diff.removed.push(page.url.clone());
        }
    }

    diff
}

// ---------------------------------------------------------------------------
// Re-crawl
// ---------------------------------------------------------------------------

/// Result of [`recrawl_target`].
#[derive(Debug)]
pub struct RecrawlReport {
    pub report: CrawlReport,
    /// Successful pages in the discarded run.
    pub previous_count: usize,
    /// Successful pages in the new run.
    pub current_count: usize,
    pub diff: PageDiff,
}

/// Crawl a target again and compare against its previous run.
///
/// The caller owns storage: it supplies the previous run's pages and
/// replaces them with `report.outcome.pages` afterwards.
#[instrument(skip_all, fields(target = %target.target_id, previous = previous.len()))]
pub async fn recrawl_target(
    orchestrator: &CrawlOrchestrator,
    config: &AppConfig,
    target: &CrawlTarget,
    previous: &[PageResult],
    cancel: CancellationToken,
    progress: Arc<dyn ProgressReporter>,
) -> Result<RecrawlReport> {
    let report = crawl_target(orchestrator, config, target, cancel, progress).await?;

    let diff = diff_pages(previous, &report.outcome.pages);
    let previous_count = previous.iter().filter(|p| p.success).count();
    let current_count = report.outcome.summary.succeeded;

    info!(
        previous_count,
        current_count,
        added = diff.added.len(),
        removed = diff.removed.len(),
        changed = diff.changed.len(),
        unchanged = diff.unchanged.len(),
        "re-crawl diff computed"
    );

    Ok(RecrawlReport {
        report,
        previous_count,
        current_count,
        diff,
    })
}

// ---------------------------------------------------------------------------
// URL update
// ---------------------------------------------------------------------------

/// Result of [`update_target_url`].
#[derive(Debug, Clone)]
pub struct UrlUpdate {
    pub entry: TargetRegistryEntry,
    pub old_url: String,
    pub new_url: Url,
}

/// Point a registered target at a new root URL.
///
/// The candidate is validated and probed first; the registry entry is only
/// touched once both pass. Stored pages are left alone (re-crawl to refresh).
#[instrument(skip_all, fields(target = key, candidate = candidate))]
pub async fn update_target_url(
    config: &mut AppConfig,
    key: &str,
    candidate: &str,
    opts: &DiscoveryOptions,
) -> Result<UrlUpdate> {
    if config.find_target(key).is_none() {
        return Err(SiteCorpusError::validation(format!(
            "no target registered as '{key}'"
        )));
    }

    let new_url = sitecorpus_discovery::validate_and_probe(candidate, opts).await?;

    let entry = config
        .find_target_mut(key)
        .ok_or_else(|| SiteCorpusError::validation(format!("no target registered as '{key}'")))?;
    let old_url = std::mem::replace(&mut entry.url, new_url.to_string());

    info!(id = %entry.id, old = %old_url, new = %new_url, "target URL updated");

    Ok(UrlUpdate {
        entry: entry.clone(),
        old_url,
        new_url,
    })
}
