//! Shared types, error model, and configuration for SiteCorpus.
//!
//! This crate is the foundation depended on by all other SiteCorpus crates.
//! It provides:
//! - [`SiteCorpusError`]: the unified error type
//! - Domain types ([`CrawlTarget`], [`PageResult`], [`ProcessedPage`], [`Chunk`], [`RunState`])
//! - Configuration ([`AppConfig`], [`CrawlConfig`], config loading and the target registry)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AntiDetectionConfig, AppConfig, AssistantConfig, BrowserConfig, ChunkingConfig, CrawlConfig,
    CrawlPoliciesConfig, DefaultsConfig, PremiumConfig, ProcessingConfig, StaticHttpConfig,
    TargetRegistryEntry, config_dir, config_file_path, expand_home, init_config, load_config,
    load_config_from, premium_api_key, require_premium_api_key, save_config, save_config_to,
};
pub use error::{Result, SiteCorpusError};
pub use types::{
    Chunk, ContentFormat, CrawlTarget, FailureReason, PageResult, ProcessedPage, Rejection,
    RunState, SkipReason, StrategyFailure, StrategyKind, StrategyPreference, TargetId,
};
