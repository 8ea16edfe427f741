//! Crawl orchestration: per-URL strategy fallback over a shared frontier.
//!
//! The root URL is fetched alone first; if every strategy fails on it the
//! run fails immediately. Otherwise a fixed pool of workers drains the
//! frontier, each URL walking the strategy chain until one backend succeeds.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use sitecorpus_discovery::{DiscoveryOptions, ExclusionSet, RobotsRules, load_robots};
use sitecorpus_shared::{
    CrawlConfig, CrawlTarget, FailureReason, PageResult, Result, RunState, SiteCorpusError,
    SkipReason, StrategyFailure, StrategyKind, TargetId,
};
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::frontier::{Dispatch, Frontier, FrontierPolicy, FrontierStep, UrlOutcome};
use crate::identity::AntiDetectionManager;
use crate::strategies::StrategyChain;

/// Timeout for the robots.txt request.
const ROBOTS_TIMEOUT_SECS: u64 = 10;

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

/// Receives per-page events while a crawl runs (progress bars, logs).
pub trait CrawlObserver: Send + Sync {
    /// Called once per dispatched URL with its final outcome.
    fn on_page(&self, _page: &PageResult) {}

    /// Called when the frontier refuses a URL.
    fn on_skip(&self, _url: &Url, _reason: SkipReason) {}
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl CrawlObserver for NoopObserver {}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Which strategy produced one page, as reported in the summary.
#[derive(Debug, Clone, Serialize)]
pub struct PageMethod {
    pub url: Url,
    pub strategy: StrategyKind,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
}

/// Pages attributed to one strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategyUsage {
    pub strategy: StrategyKind,
    pub pages: usize,
}

/// Serializable report of one crawl run.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlSummary {
    pub target_id: TargetId,
    pub root_url: Url,
    pub state: RunState,
    /// Per-URL outcome in dispatch order.
    pub pages: Vec<PageMethod>,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// True when the run was cancelled before the frontier was exhausted.
    pub partial: bool,
    /// Successful pages per strategy, in fallback order.
    pub strategies_used: Vec<StrategyUsage>,
    pub duration_ms: u64,
}

/// Everything a finished (completed or cancelled) crawl produced.
#[derive(Debug, Clone)]
pub struct CrawlOutcome {
    pub state: RunState,
    /// One result per dispatched URL, in dispatch order.
    pub pages: Vec<PageResult>,
    pub skipped: Vec<(Url, SkipReason)>,
    pub summary: CrawlSummary,
}

impl CrawlOutcome {
    fn new(
        target: &CrawlTarget,
        state: RunState,
        pages: Vec<PageResult>,
        skipped: Vec<(Url, SkipReason)>,
        duration: Duration,
    ) -> Self {
        let succeeded = pages.iter().filter(|p| p.success).count();
        let strategies_used = StrategyKind::FALLBACK_ORDER
            .iter()
            .map(|&strategy| StrategyUsage {
                strategy,
                pages: pages
                    .iter()
                    .filter(|p| p.success && p.strategy == strategy)
                    .count(),
            })
            .filter(|u| u.pages > 0)
            .collect();

        let summary = CrawlSummary {
            target_id: target.target_id,
            root_url: target.root_url.clone(),
            state,
            pages: pages
                .iter()
                .map(|p| PageMethod {
                    url: p.url.clone(),
                    strategy: p.strategy,
                    success: p.success,
                    failure: p.failure.clone(),
                })
                .collect(),
            succeeded,
            failed: pages.len() - succeeded,
            skipped: skipped.len(),
            partial: state == RunState::Cancelled,
            strategies_used,
            duration_ms: duration.as_millis() as u64,
        };

        Self {
            state,
            pages,
            skipped,
            summary,
        }
    }
}

// ---------------------------------------------------------------------------
// Run registry
// ---------------------------------------------------------------------------

type RunRegistry = Arc<Mutex<HashMap<TargetId, RunState>>>;

fn lock(runs: &RunRegistry) -> MutexGuard<'_, HashMap<TargetId, RunState>> {
    runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Marks a target `Running` for as long as it lives.
///
/// Dropping without [`finish`](Self::finish) (panic, aborted future) leaves
/// the target `Failed` so it can be crawled again.
struct RunGuard {
    runs: RunRegistry,
    target: TargetId,
    finished: bool,
}

impl RunGuard {
    fn acquire(runs: &RunRegistry, target: TargetId) -> Result<Self> {
        let mut map = lock(runs);
        if map.get(&target) == Some(&RunState::Running) {
            return Err(SiteCorpusError::AlreadyRunning {
                target: target.to_string(),
            });
        }
        map.insert(target, RunState::Running);
        Ok(Self {
            runs: Arc::clone(runs),
            target,
            finished: false,
        })
    }

    fn finish(mut self, state: RunState) {
        debug_assert!(RunState::Running.can_transition_to(state));
        lock(&self.runs).insert(self.target, state);
        self.finished = true;
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.finished {
            lock(&self.runs).insert(self.target, RunState::Failed);
        }
    }
}

// ---------------------------------------------------------------------------
// CrawlOrchestrator
// ---------------------------------------------------------------------------

/// State shared by the fetch workers of one run.
struct Shared {
    frontier: AsyncMutex<Frontier>,
    /// Signalled whenever an outcome is recorded or the frontier is done.
    progress: Notify,
}

/// Runs crawls; one instance per process, cloned freely.
#[derive(Clone)]
pub struct CrawlOrchestrator {
    identities: AntiDetectionManager,
    config: CrawlConfig,
    runs: RunRegistry,
}

impl CrawlOrchestrator {
    pub fn new(config: CrawlConfig, identities: AntiDetectionManager) -> Self {
        Self {
            identities,
            config,
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Current run state for a target; `Idle` if it was never crawled.
    pub fn state(&self, target: TargetId) -> RunState {
        lock(&self.runs).get(&target).copied().unwrap_or_default()
    }

    /// Crawl one target to completion, cancellation, or failure.
    ///
    /// Fatal errors (unreachable root, frontier invariant) leave the target
    /// `Failed` and produce no outcome. A second call for a target that is
    /// still `Running` is rejected with [`SiteCorpusError::AlreadyRunning`].
    #[instrument(skip_all, fields(target = %target.target_id, root = %target.root_url))]
    pub async fn crawl(
        &self,
        target: &CrawlTarget,
        chain: StrategyChain,
        cancel: CancellationToken,
        observer: Arc<dyn CrawlObserver>,
    ) -> Result<CrawlOutcome> {
        let guard = RunGuard::acquire(&self.runs, target.target_id)?;
        let started = Instant::now();

        info!(
            max_pages = target.max_pages,
            strategies = ?chain.kinds(),
            concurrency = self.config.concurrency,
            "starting crawl"
        );

        let result = self.run(target, &chain, &cancel, observer).await;
        chain.shutdown().await;

        match result {
            Ok((state, pages, skipped)) => {
                guard.finish(state);
                let outcome = CrawlOutcome::new(target, state, pages, skipped, started.elapsed());
                info!(
                    state = %outcome.state,
                    succeeded = outcome.summary.succeeded,
                    failed = outcome.summary.failed,
                    skipped = outcome.summary.skipped,
                    duration_ms = outcome.summary.duration_ms,
                    "crawl finished"
                );
                Ok(outcome)
            }
            Err(e) => {
                warn!(error = %e, "crawl failed");
                guard.finish(RunState::Failed);
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        target: &CrawlTarget,
        chain: &StrategyChain,
        cancel: &CancellationToken,
        observer: Arc<dyn CrawlObserver>,
    ) -> Result<(RunState, Vec<PageResult>, Vec<(Url, SkipReason)>)> {
        let root = &target.root_url;
        let exclusions = ExclusionSet::new(self.robots_for(root).await, &self.config.exclude_patterns);

        if let Some(reason) = exclusions.check(root) {
            return Err(SiteCorpusError::RootUnreachable {
                url: root.to_string(),
                attempts: format!("root excluded before fetch ({reason:?})"),
            });
        }

        let mut frontier = Frontier::new(
            target.max_pages,
            FrontierPolicy::from(&self.config),
            exclusions,
        )?;
        frontier.seed(root)?;
        report_skips(&frontier, &*observer, 0);

        if cancel.is_cancelled() {
            let skipped = frontier.skipped().to_vec();
            return Ok((RunState::Cancelled, Vec::new(), skipped));
        }

        // Root goes first and alone
        let Dispatch { seq, url } = match frontier.next() {
            FrontierStep::Dispatch(d) => d,
            step => {
                return Err(SiteCorpusError::invariant(format!(
                    "seeded frontier yielded {step:?} instead of the root"
                )));
            }
        };
        let root_page = self.fetch_with_fallback(chain, &url).await;
        observer.on_page(&root_page);

        if !root_page.success {
            return Err(SiteCorpusError::RootUnreachable {
                url: url.to_string(),
                attempts: describe_attempts(&root_page),
            });
        }
        let reported = frontier.skipped().len();
        frontier.record(
            seq,
            UrlOutcome::Fetched {
                links: root_page.links.clone(),
            },
        )?;
        report_skips(&frontier, &*observer, reported);

        let shared = Arc::new(Shared {
            frontier: AsyncMutex::new(frontier),
            progress: Notify::new(),
        });

        // Child token: a failing worker stops its siblings without
        // cancelling the caller's token.
        let stop = cancel.child_token();
        let mut workers = JoinSet::new();
        for worker_id in 0..self.config.concurrency.max(1) {
            let this = self.clone();
            let shared = Arc::clone(&shared);
            let chain = chain.clone();
            let stop = stop.clone();
            let observer = Arc::clone(&observer);
            workers.spawn(async move {
                this.worker(worker_id, shared, chain, stop, observer).await
            });
        }

        let mut pages = vec![(seq, root_page)];
        let mut failure = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(done)) => pages.extend(done),
                Ok(Err(e)) => {
                    stop.cancel();
                    failure.get_or_insert(e);
                }
                Err(e) => {
                    stop.cancel();
                    failure.get_or_insert(SiteCorpusError::invariant(format!(
                        "crawl worker panicked: {e}"
                    )));
                }
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }

        pages.sort_by_key(|(seq, _)| *seq);
        let pages: Vec<PageResult> = pages.into_iter().map(|(_, page)| page).collect();

        let frontier = shared.frontier.lock().await;
        let state = if cancel.is_cancelled() && !frontier.is_exhausted() {
            RunState::Cancelled
        } else {
            RunState::Completed
        };
        Ok((state, pages, frontier.skipped().to_vec()))
    }

    /// Pull from the frontier until it is done or the run is cancelled.
    async fn worker(
        self,
        worker_id: usize,
        shared: Arc<Shared>,
        chain: StrategyChain,
        cancel: CancellationToken,
        observer: Arc<dyn CrawlObserver>,
    ) -> Result<Vec<(usize, PageResult)>> {
        let mut pages = Vec::new();

        loop {
            if cancel.is_cancelled() {
                break;
            }

            // Register for wakeups before looking, so a record between the
            // check and the wait is not missed.
            let progressed = shared.progress.notified();
            tokio::pin!(progressed);
            progressed.as_mut().enable();

            let step = shared.frontier.lock().await.next();
            match step {
                FrontierStep::Dispatch(Dispatch { seq, url }) => {
                    debug!(worker_id, seq, %url, "dispatching");
                    // In-flight fetches finish (or time out) even if cancelled meanwhile
                    let page = self.fetch_with_fallback(&chain, &url).await;

                    let outcome = if page.success {
                        UrlOutcome::Fetched {
                            links: page.links.clone(),
                        }
                    } else {
                        UrlOutcome::Failed
                    };
                    {
                        let mut frontier = shared.frontier.lock().await;
                        let reported = frontier.skipped().len();
                        frontier.record(seq, outcome)?;
                        report_skips(&frontier, &*observer, reported);
                    }
                    shared.progress.notify_waiters();
                    observer.on_page(&page);
                    pages.push((seq, page));
                }
                FrontierStep::Wait => {
                    tokio::select! {
                        _ = &mut progressed => {}
                        _ = cancel.cancelled() => break,
                    }
                }
                FrontierStep::Done => {
                    shared.progress.notify_waiters();
                    break;
                }
            }
        }

        Ok(pages)
    }

    /// Try each strategy in order until one succeeds.
    ///
    /// Every attempt takes a fresh identity and waits out its pacing delay.
    /// The returned result carries the earlier failed attempts.
    pub async fn fetch_with_fallback(&self, chain: &StrategyChain, url: &Url) -> PageResult {
        let mut attempts: Vec<StrategyFailure> = Vec::new();
        let mut last: Option<PageResult> = None;

        for strategy in chain.iter() {
            let kind = strategy.kind();
            let identity = self.identities.next_identity();
            let delay = identity.delay.sample();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let mut page = strategy.fetch(url, &identity).await;
            page.strategy = kind;
            if matches!(page.failure, Some(FailureReason::Proxy(_))) {
                identity.mark_failed();
            }

            if page.success {
                if !attempts.is_empty() {
                    debug!(%url, strategy = %kind, fallbacks = attempts.len(), "succeeded after fallback");
                }
                page.attempts = attempts;
                return page;
            }

            if let Some(reason) = &page.failure {
                debug!(%url, strategy = %kind, %reason, "strategy failed");
                attempts.push(StrategyFailure {
                    strategy: kind,
                    reason: reason.clone(),
                });
            }
            last = Some(page);
        }

        match last {
            Some(mut page) => {
                // The final failure is the page's own; keep only earlier ones.
                attempts.pop();
                page.attempts = attempts;
                warn!(%url, failure = ?page.failure, "all strategies failed");
                page
            }
            None => PageResult::failed(
                url.clone(),
                StrategyKind::StaticHttp,
                FailureReason::Fetch("no strategies configured".into()),
            ),
        }
    }

    async fn robots_for(&self, root: &Url) -> RobotsRules {
        if !self.config.respect_robots_txt {
            return RobotsRules::allow_all();
        }
        let opts = DiscoveryOptions {
            timeout_secs: ROBOTS_TIMEOUT_SECS,
            user_agent: self.identities.primary_user_agent(),
        };
        match load_robots(root, &opts).await {
            Ok(rules) => rules,
            Err(e) => {
                warn!(error = %e, "robots.txt unavailable, crawling without it");
                RobotsRules::allow_all()
            }
        }
    }
}

/// Forward skips recorded at or after index `from` to the observer.
fn report_skips(frontier: &Frontier, observer: &dyn CrawlObserver, from: usize) {
    for (url, reason) in frontier.skipped().iter().skip(from) {
        observer.on_skip(url, *reason);
    }
}

fn describe_attempts(page: &PageResult) -> String {
    page.attempts
        .iter()
        .map(|a| format!("{}: {}", a.strategy, a.reason))
        .chain(
            page.failure
                .iter()
                .map(|reason| format!("{}: {reason}", page.strategy)),
        )
        .collect::<Vec<_>>()
        .join("; ")
}
