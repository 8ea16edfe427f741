//! Content processing and chunking for crawled pages.
//!
//! [`ContentProcessor`] turns a run's [`PageResult`]s into [`ProcessedPage`]s:
//! markup is cleaned to text blocks, blocks repeated across the run are
//! dropped as boilerplate, the remainder is scored and deduplicated.
//! [`TextChunker`] then splits accepted pages into bounded [`Chunk`]s.
//!
//! [`Chunk`]: sitecorpus_shared::Chunk

mod boilerplate;
mod chunker;
mod cleanup;
mod fingerprint;
mod markup;
mod quality;

use tracing::{debug, info, instrument, warn};

use sitecorpus_shared::{PageResult, ProcessedPage, ProcessingConfig, Rejection};

pub use boilerplate::BoilerplateIndex;
pub use chunker::{ChunkPolicy, ChunkSequence, TextChunker, estimate_tokens};
pub use fingerprint::Fingerprint;
pub use markup::{Block, clean_page, render_blocks};
pub use quality::quality_score;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// What happened to one successful page.
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    Accepted(ProcessedPage),
    /// Kept for reporting; never chunked.
    Rejected {
        page: ProcessedPage,
        reason: Rejection,
    },
}

impl ProcessOutcome {
    pub fn page(&self) -> &ProcessedPage {
        match self {
            Self::Accepted(page) | Self::Rejected { page, .. } => page,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

/// Outcomes for one run, in input order. Failed fetches have no entry.
#[derive(Debug, Clone, Default)]
pub struct ProcessingReport {
    pub outcomes: Vec<ProcessOutcome>,
}

impl ProcessingReport {
    pub fn accepted(&self) -> impl Iterator<Item = &ProcessedPage> {
        self.outcomes.iter().filter_map(|o| match o {
            ProcessOutcome::Accepted(page) => Some(page),
            ProcessOutcome::Rejected { .. } => None,
        })
    }

    pub fn rejected(&self) -> impl Iterator<Item = (&ProcessedPage, &Rejection)> {
        self.outcomes.iter().filter_map(|o| match o {
            ProcessOutcome::Rejected { page, reason } => Some((page, reason)),
            ProcessOutcome::Accepted(_) => None,
        })
    }

    pub fn into_accepted(self) -> Vec<ProcessedPage> {
        self.outcomes
            .into_iter()
            .filter_map(|o| match o {
                ProcessOutcome::Accepted(page) => Some(page),
                ProcessOutcome::Rejected { .. } => None,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

/// Cleans, scores and deduplicates the pages of one crawl run.
///
/// Holds only configuration; every call to [`process_run`](Self::process_run)
/// is independent.
#[derive(Debug, Clone, Default)]
pub struct ContentProcessor {
    config: ProcessingConfig,
}

impl ContentProcessor {
    pub fn new(config: ProcessingConfig) -> Self {
        Self { config }
    }

    /// Process every successful page of a run, in order.
    ///
    /// Boilerplate detection needs the whole run, so pages are cleaned first
    /// and filtered second. A page is compared for duplication against the
    /// pages accepted before it.
    #[instrument(skip_all, fields(pages = pages.len()))]
    pub fn process_run(&self, pages: &[PageResult]) -> ProcessingReport {
        let cleaned: Vec<(&PageResult, Vec<Block>)> = pages
            .iter()
            .filter(|p| p.success)
            .map(|page| {
                let blocks = clean_page(page).unwrap_or_else(|e| {
                    warn!(url = %page.url, error = %e, "content cleaning failed");
                    Vec::new()
                });
                (page, blocks)
            })
            .collect();

        let index = BoilerplateIndex::build(
            cleaned.iter().map(|(_, blocks)| blocks.as_slice()),
            self.config.boilerplate_min_pages,
            self.config.boilerplate_page_ratio,
        );

        let mut originals: Vec<(Fingerprint, url::Url)> = Vec::new();
        let mut report = ProcessingReport::default();

        for (page, blocks) in cleaned {
            let before = blocks.len();
            let blocks = index.strip(blocks);
            let text = render_blocks(&blocks);
            let score = quality_score(&text, self.config.target_words);
            let fingerprint = Fingerprint::of(&text);

            let mut processed = ProcessedPage {
                url: page.url.clone(),
                title: page.title.clone(),
                description: page.description.clone(),
                text,
                quality_score: score,
                fingerprint: fingerprint.digest.clone(),
                duplicate_of: None,
                fetched_at: page.fetched_at,
            };
            debug!(
                url = %processed.url,
                blocks = blocks.len(),
                boilerplate = before - blocks.len(),
                score,
                "page cleaned"
            );

            if score < self.config.min_quality {
                report.outcomes.push(ProcessOutcome::Rejected {
                    page: processed,
                    reason: Rejection::LowQuality {
                        score,
                        threshold: self.config.min_quality,
                    },
                });
                continue;
            }

            let original = originals
                .iter()
                .find(|(prior, _)| fingerprint.matches(prior, self.config.near_duplicate_threshold))
                .map(|(_, url)| url.clone());

            match original {
                Some(original) => {
                    processed.duplicate_of = Some(original.clone());
                    report.outcomes.push(ProcessOutcome::Rejected {
                        page: processed,
                        reason: Rejection::Duplicate { original },
                    });
                }
                None => {
                    originals.push((fingerprint, processed.url.clone()));
                    report.outcomes.push(ProcessOutcome::Accepted(processed));
                }
            }
        }

        info!(
            accepted = report.accepted().count(),
            rejected = report.rejected().count(),
            boilerplate_threshold = index.threshold(),
            "processing complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitecorpus_shared::{FailureReason, StrategyKind};
    use url::Url;

    const FOOTER: &str = "<footer>Acme Ltd</footer><div class=\"legal\"><p>Registered in Springfield. All rights reserved worldwide.</p></div>";

    fn page(path: &str, body: &str) -> PageResult {
        PageResult::succeeded(
            Url::parse(&format!("https://acme.example{path}")).unwrap(),
            StrategyKind::StaticHttp,
            format!("<html><body>{body}{FOOTER}</body></html>"),
        )
    }

    fn prose(topic: &str, n: usize) -> String {
        (0..n)
            .map(|i| format!("{topic}{i}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn processor() -> ContentProcessor {
        ContentProcessor::new(ProcessingConfig {
            min_quality: 0.2,
            target_words: 50,
            boilerplate_min_pages: 2,
            boilerplate_page_ratio: 0.5,
            near_duplicate_threshold: 0.9,
        })
    }

    #[test]
    fn failed_fetches_yield_nothing() {
        let failed = PageResult::failed(
            Url::parse("https://acme.example/down").unwrap(),
            StrategyKind::StaticHttp,
            FailureReason::Fetch("HTTP 500".into()),
        );
        let report = processor().process_run(&[failed]);
        assert!(report.outcomes.is_empty());
    }

    #[test]
    fn repeated_footer_is_removed_from_every_page() {
        let pages = [
            page("/", &format!("<p>{}</p>", prose("home", 60))),
            page("/about", &format!("<p>{}</p>", prose("about", 60))),
        ];
        let report = processor().process_run(&pages);

        assert_eq!(report.accepted().count(), 2);
        for processed in report.accepted() {
            assert!(!processed.text.contains("All rights reserved"), "{}", processed.text);
        }
    }

    #[test]
    fn thin_pages_are_rejected_as_low_quality() {
        let pages = [
            page("/", &format!("<p>{}</p>", prose("home", 60))),
            page("/thanks", "<p>Thanks!</p>"),
        ];
        let report = processor().process_run(&pages);

        let rejected: Vec<_> = report.rejected().collect();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].0.url.path(), "/thanks");
        assert!(matches!(rejected[0].1, Rejection::LowQuality { .. }));
    }

    #[test]
    fn later_duplicate_points_at_the_original() {
        let body = format!("<p>{}</p>", prose("service", 80));
        let pages = [
            page("/services", &body),
            page("/other", &format!("<p>{}</p>", prose("other", 60))),
            page("/services/", &body),
        ];
        let report = processor().process_run(&pages);

        let (dup, reason) = report.rejected().next().unwrap();
        assert_eq!(dup.url.as_str(), "https://acme.example/services/");
        assert_eq!(
            reason,
            &Rejection::Duplicate {
                original: Url::parse("https://acme.example/services").unwrap()
            }
        );
        assert_eq!(dup.duplicate_of.as_ref().unwrap().path(), "/services");
        assert_eq!(report.accepted().count(), 2);
    }

    #[test]
    fn processed_page_keeps_metadata_and_fingerprint() {
        let pages = [page("/", &format!("<h1>Acme</h1><p>{}</p>", prose("intro", 60)))
            .with_title(Some("Acme Plumbing".into()))];
        let report = processor().process_run(&pages);
        let processed = report.into_accepted().remove(0);

        assert_eq!(processed.title.as_deref(), Some("Acme Plumbing"));
        assert!(processed.text.starts_with("# Acme\n\nintro0 intro1"));
        assert_eq!(processed.fingerprint.len(), 64);
        assert!(processed.quality_score > 0.9);
    }
}
