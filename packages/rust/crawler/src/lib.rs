//! Crawl orchestration for SiteCorpus.
//!
//! This crate provides:
//! - [`identity`]: proxy/user-agent rotation ([`AntiDetectionManager`])
//! - [`strategies`]: the [`FetchStrategy`] backends and the fallback [`StrategyChain`]
//! - [`frontier`]: BFS URL frontier with robots/pattern exclusions and a page budget
//! - [`engine`]: the [`CrawlOrchestrator`] driving all of the above

pub mod engine;
pub mod extract;
pub mod frontier;
pub mod identity;
pub mod strategies;

pub use engine::{
    CrawlObserver, CrawlOrchestrator, CrawlOutcome, CrawlSummary, NoopObserver, PageMethod,
    StrategyUsage,
};
pub use extract::{PageMetadata, extract_metadata};
pub use frontier::{Dispatch, Frontier, FrontierPolicy, FrontierStep, UrlOutcome};
pub use identity::{AntiDetectionManager, DelayWindow, Identity, IdentityLease};
pub use strategies::{
    FetchStrategy, HeadlessBrowserStrategy, PremiumApiStrategy, StaticHttpStrategy, StrategyChain,
};
