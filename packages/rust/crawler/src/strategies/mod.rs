//! Fetch strategies: one trait, three backends, and the ordered chain the
//! orchestrator walks for every URL.

mod browser;
mod premium;
mod static_http;

use std::sync::Arc;

use async_trait::async_trait;
use sitecorpus_shared::{
    AppConfig, PageResult, Result, SiteCorpusError, StrategyKind, StrategyPreference,
    premium_api_key, require_premium_api_key,
};
use tracing::info;
use url::Url;

use crate::identity::Identity;

pub use browser::HeadlessBrowserStrategy;
pub use premium::PremiumApiStrategy;
pub use static_http::StaticHttpStrategy;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Turns one URL into a [`PageResult`].
///
/// Implementations never return an error: every failure becomes a
/// `PageResult` with `success == false` and a failure reason. Retrying and
/// falling back are the orchestrator's job.
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    /// Which backend this is.
    fn kind(&self) -> StrategyKind;

    /// Fetch `url` using the proxy and agent in `identity`.
    async fn fetch(&self, url: &Url, identity: &Identity) -> PageResult;

    /// Release long-lived resources (browser processes). Called once per crawl.
    async fn shutdown(&self) {}
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

/// Holds strategies in fallback order.
#[derive(Clone)]
pub struct StrategyChain {
    strategies: Vec<Arc<dyn FetchStrategy>>,
}

impl StrategyChain {
    /// Build a chain from explicit strategies, first tried first.
    pub fn new(strategies: Vec<Arc<dyn FetchStrategy>>) -> Result<Self> {
        if strategies.is_empty() {
            return Err(SiteCorpusError::config("no fetch strategies available"));
        }
        Ok(Self { strategies })
    }

    /// Build the chain a preference asks for.
    ///
    /// Under `auto`, the premium backend is left out when no API key is set;
    /// asking for `premium` explicitly without a key is an error.
    pub fn for_preference(config: &AppConfig, preference: StrategyPreference) -> Result<Self> {
        let mut strategies: Vec<Arc<dyn FetchStrategy>> = Vec::new();

        for kind in preference.strategies() {
            match kind {
                StrategyKind::PremiumApi => match premium_api_key(config) {
                    Some(key) => {
                        strategies.push(Arc::new(PremiumApiStrategy::new(&config.premium, key)?));
                    }
                    None if preference == StrategyPreference::Premium => {
                        require_premium_api_key(config)?;
                    }
                    None => {
                        info!(
                            env = %config.premium.api_key_env,
                            "no premium API key, premium strategy disabled"
                        );
                    }
                },
                StrategyKind::HeadlessBrowser => {
                    strategies.push(Arc::new(HeadlessBrowserStrategy::new(config.browser.clone())));
                }
                StrategyKind::StaticHttp => {
                    strategies.push(Arc::new(StaticHttpStrategy::new(&config.static_http)));
                }
            }
        }

        Self::new(strategies)
    }

    /// Strategies in fallback order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn FetchStrategy>> {
        self.strategies.iter()
    }

    pub fn kinds(&self) -> Vec<StrategyKind> {
        self.strategies.iter().map(|s| s.kind()).collect()
    }

    pub async fn shutdown(&self) {
        for strategy in &self.strategies {
            strategy.shutdown().await;
        }
    }
}

impl std::fmt::Debug for StrategyChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyChain")
            .field("strategies", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_without_key_skips_premium() {
        let mut config = AppConfig::default();
        config.premium.api_key_env = "SC_TEST_NO_PREMIUM_KEY_98765".into();

        let chain = StrategyChain::for_preference(&config, StrategyPreference::Auto).unwrap();
        assert_eq!(
            chain.kinds(),
            vec![StrategyKind::HeadlessBrowser, StrategyKind::StaticHttp]
        );
    }

    #[test]
    fn explicit_premium_without_key_is_an_error() {
        let mut config = AppConfig::default();
        config.premium.api_key_env = "SC_TEST_NO_PREMIUM_KEY_98765".into();

        let err = StrategyChain::for_preference(&config, StrategyPreference::Premium).unwrap_err();
        assert!(err.to_string().contains("SC_TEST_NO_PREMIUM_KEY_98765"));
    }

    #[test]
    fn explicit_single_strategy() {
        let config = AppConfig::default();
        let chain = StrategyChain::for_preference(&config, StrategyPreference::Static).unwrap();
        assert_eq!(chain.kinds(), vec![StrategyKind::StaticHttp]);
    }

    #[test]
    fn empty_chain_is_rejected() {
        assert!(StrategyChain::new(Vec::new()).is_err());
    }
}
