//! Core pipeline orchestration for SiteCorpus.
//!
//! This crate ties together crawling, content processing, chunking and
//! export into end-to-end workflows (`crawl_target`, `recrawl_target`,
//! `export_corpus`) plus the target URL update flow.

pub mod pipeline;
pub mod update;

pub use pipeline::{
    CrawlReport, ExportRequest, ProgressReporter, SilentProgress, crawl_target, export_corpus,
    export_documents, process_pages,
};
pub use update::{
    PageDiff, RecrawlReport, UrlUpdate, content_hash, diff_pages, recrawl_target,
    update_target_url,
};
