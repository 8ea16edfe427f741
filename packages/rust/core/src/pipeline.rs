//! End-to-end pipelines: target → crawl → process, and processed pages →
//! chunk → export.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use url::Url;

use sitecorpus_artifacts::{
    ExportDocument, ExportFormat, ExportService, ExportSummary, ExportTarget, write_export,
};
use sitecorpus_content::{ChunkPolicy, ContentProcessor, ProcessingReport, TextChunker};
use sitecorpus_crawler::{CrawlObserver, CrawlOrchestrator, CrawlOutcome, StrategyChain};
use sitecorpus_shared::{
    AppConfig, CrawlTarget, PageResult, ProcessedPage, ProcessingConfig, Result, SiteCorpusError,
    SkipReason,
};

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called once per dispatched URL with its final outcome.
    fn page_fetched(&self, url: &Url, success: bool, current: usize, budget: usize);
    /// Called when the frontier refuses a URL.
    fn page_skipped(&self, _url: &Url, _reason: SkipReason) {}
    /// Called when the crawl pipeline completes.
    fn done(&self, report: &CrawlReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn page_fetched(&self, _url: &Url, _success: bool, _current: usize, _budget: usize) {}
    fn done(&self, _report: &CrawlReport) {}
}

/// Adapts a `ProgressReporter` to the orchestrator's `CrawlObserver`.
struct ProgressObserver {
    inner: Arc<dyn ProgressReporter>,
    fetched: AtomicUsize,
    budget: usize,
}

impl CrawlObserver for ProgressObserver {
    fn on_page(&self, page: &PageResult) {
        let current = self.fetched.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner
            .page_fetched(&page.url, page.success, current, self.budget);
    }

    fn on_skip(&self, url: &Url, reason: SkipReason) {
        self.inner.page_skipped(url, reason);
    }
}

// ---------------------------------------------------------------------------
// Crawl pipeline
// ---------------------------------------------------------------------------

/// Result of [`crawl_target`].
#[derive(Debug)]
pub struct CrawlReport {
    pub outcome: CrawlOutcome,
    pub processing: ProcessingReport,
    pub elapsed: Duration,
}

/// Crawl a target and process what was fetched.
///
/// 1. Build the strategy chain for the target's preference
/// 2. Crawl (cooperatively cancellable)
/// 3. Clean, filter and deduplicate the fetched pages
///
/// A cancelled crawl still gets processed; its outcome is marked partial.
#[instrument(skip_all, fields(target = %target.target_id, root = %target.root_url))]
pub async fn crawl_target(
    orchestrator: &CrawlOrchestrator,
    config: &AppConfig,
    target: &CrawlTarget,
    cancel: CancellationToken,
    progress: Arc<dyn ProgressReporter>,
) -> Result<CrawlReport> {
    let start = Instant::now();

    progress.phase("Preparing fetch strategies");
    let chain = StrategyChain::for_preference(config, target.strategy)?;

    progress.phase("Crawling website");
    let observer = Arc::new(ProgressObserver {
        inner: Arc::clone(&progress),
        fetched: AtomicUsize::new(0),
        budget: target.max_pages,
    });
    let outcome = orchestrator.crawl(target, chain, cancel, observer).await?;

    progress.phase("Processing content");
    let processing = process_pages(&config.processing, &outcome.pages);

    let report = CrawlReport {
        outcome,
        processing,
        elapsed: start.elapsed(),
    };
    progress.done(&report);

    info!(
        state = %report.outcome.state,
        succeeded = report.outcome.summary.succeeded,
        failed = report.outcome.summary.failed,
        skipped = report.outcome.summary.skipped,
        accepted = report.processing.accepted().count(),
        elapsed_ms = report.elapsed.as_millis(),
        "crawl pipeline complete"
    );

    Ok(report)
}

/// Run the content processor over one run's pages.
pub fn process_pages(config: &ProcessingConfig, pages: &[PageResult]) -> ProcessingReport {
    ContentProcessor::new(config.clone()).process_run(pages)
}

// ---------------------------------------------------------------------------
// Export pipeline
// ---------------------------------------------------------------------------

/// Inputs for [`export_corpus`].
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub target: ExportTarget,
    pub format: ExportFormat,
    pub policy: ChunkPolicy,
    /// File to write; standard output when `None`.
    pub output: Option<PathBuf>,
}

/// Pair each accepted page with its chunks, lazily. Without a chunker the
/// documents carry no chunks.
pub fn export_documents(
    pages: impl IntoIterator<Item = ProcessedPage>,
    chunker: Option<TextChunker>,
) -> impl Iterator<Item = ExportDocument> {
    pages.into_iter().map(move |page| {
        let chunks = match chunker {
            Some(chunker) => chunker.chunk(&page).collect(),
            None => Vec::new(),
        };
        ExportDocument { page, chunks }
    })
}

/// Chunk accepted pages and stream them in the requested format.
#[instrument(skip_all, fields(target = %request.target.id, format = %request.format))]
pub fn export_corpus(
    request: &ExportRequest,
    pages: impl IntoIterator<Item = ProcessedPage>,
) -> Result<ExportSummary> {
    let service = ExportService::new(request.target.clone());
    let chunker = request
        .format
        .uses_chunks()
        .then(|| TextChunker::new(request.policy));
    let documents = export_documents(pages, chunker);
    let stream = service.export(documents, request.format);

    let summary = match &request.output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| SiteCorpusError::io(parent, e))?;
            }
            let file = File::create(path).map_err(|e| SiteCorpusError::io(path, e))?;
            let mut writer = BufWriter::new(file);
            write_export(stream, &mut writer).map_err(|e| SiteCorpusError::io(path, e))?
        }
        None => {
            let stdout = std::io::stdout();
            let mut writer = stdout.lock();
            let summary =
                write_export(stream, &mut writer).map_err(|e| SiteCorpusError::io("<stdout>", e))?;
            writer.flush().map_err(|e| SiteCorpusError::io("<stdout>", e))?;
            summary
        }
    };

    info!(
        records = summary.records,
        skipped = summary.skipped.len(),
        "export written"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use sitecorpus_crawler::AntiDetectionManager;
    use sitecorpus_shared::{
        AssistantConfig, CrawlConfig, StrategyPreference, TargetId,
    };
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn prose(topic: &str, n: usize) -> String {
        (0..n)
            .map(|i| format!("{topic}{i}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn html(title: &str, body: &str) -> String {
        format!(
            "<html><head><title>{title}</title></head><body>\
             <nav><a href=\"/\">Home</a> <a href=\"/about\">About</a></nav>\
             <main><h1>{title}</h1><p>{body}</p></main></body></html>"
        )
    }

    #[derive(Default)]
    struct RecordingProgress {
        phases: Mutex<Vec<String>>,
        fetched: Mutex<Vec<(String, usize)>>,
    }

    impl ProgressReporter for RecordingProgress {
        fn phase(&self, name: &str) {
            self.phases.lock().unwrap().push(name.to_string());
        }
        fn page_fetched(&self, url: &Url, _success: bool, current: usize, _budget: usize) {
            self.fetched.lock().unwrap().push((url.path().to_string(), current));
        }
        fn done(&self, _report: &CrawlReport) {
            self.phases.lock().unwrap().push("done".into());
        }
    }

    fn static_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.crawl_policies.well_known_paths.clear();
        config.crawl_policies.respect_robots_txt = false;
        config.anti_detection.min_delay_ms = 0;
        config.anti_detection.max_delay_ms = 0;
        config.defaults.concurrency = 2;
        config.processing.target_words = 40;
        config
    }

    #[tokio::test]
    async fn crawl_target_fetches_and_processes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(html("Acme Plumbing", &prose("home", 60)))
                    .insert_header("content-type", "text/html"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/about"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(html("About Acme", &prose("about", 60)))
                    .insert_header("content-type", "text/html"),
            )
            .mount(&server)
            .await;

        let config = static_config();
        let orchestrator = CrawlOrchestrator::new(
            CrawlConfig::from(&config),
            AntiDetectionManager::from_config(&config.anti_detection),
        );
        let target = CrawlTarget::new(
            TargetId::new(),
            Url::parse(&server.uri()).unwrap(),
            5,
            StrategyPreference::Static,
        )
        .unwrap();

        let progress = Arc::new(RecordingProgress::default());
        let report = crawl_target(
            &orchestrator,
            &config,
            &target,
            CancellationToken::new(),
            progress.clone(),
        )
        .await
        .unwrap();

        assert_eq!(report.outcome.summary.succeeded, 2);
        let accepted: Vec<_> = report.processing.accepted().collect();
        assert_eq!(accepted.len(), 2);
        assert_eq!(accepted[0].title.as_deref(), Some("Acme Plumbing"));
        assert!(!accepted[1].text.contains("Home About"));

        let fetched = progress.fetched.lock().unwrap();
        assert_eq!(fetched[0], ("/".to_string(), 1));
        assert_eq!(fetched.len(), 2);
        assert_eq!(
            progress.phases.lock().unwrap().last().map(String::as_str),
            Some("done")
        );
    }

    #[tokio::test]
    async fn explicit_premium_without_key_fails_before_crawling() {
        let mut config = static_config();
        config.premium.api_key_env = "SITECORPUS_TEST_KEY_THAT_IS_NEVER_SET".into();
        let orchestrator = CrawlOrchestrator::new(
            CrawlConfig::from(&config),
            AntiDetectionManager::direct(),
        );
        let target = CrawlTarget::new(
            TargetId::new(),
            Url::parse("https://acme.example/").unwrap(),
            5,
            StrategyPreference::Premium,
        )
        .unwrap();

        let err = crawl_target(
            &orchestrator,
            &config,
            &target,
            CancellationToken::new(),
            Arc::new(SilentProgress),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SiteCorpusError::Config { .. }));
        assert_eq!(
            orchestrator.state(target.target_id),
            sitecorpus_shared::RunState::Idle
        );
    }

    fn processed(path: &str, title: &str, text: &str) -> ProcessedPage {
        ProcessedPage {
            url: Url::parse(&format!("https://acme.example{path}")).unwrap(),
            title: Some(title.into()),
            description: None,
            text: text.into(),
            quality_score: 0.9,
            fingerprint: "0".repeat(64),
            duplicate_of: None,
            fetched_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn export_corpus_writes_retrieval_chunks_to_file() {
        let dir = std::env::temp_dir().join(format!("sitecorpus-export-{}", TargetId::new()));
        let output = dir.join("nested").join("chunks.jsonl");
        let request = ExportRequest {
            target: ExportTarget {
                id: TargetId::new(),
                name: "Acme".into(),
                root_url: Url::parse("https://acme.example/").unwrap(),
                assistant: AssistantConfig::default(),
            },
            format: ExportFormat::RetrievalChunks,
            policy: ChunkPolicy::SectionBounded,
            output: Some(output.clone()),
        };
        let pages = vec![processed(
            "/services",
            "Services",
            "# Services\n\nWe fix pipes.\n\n## Boilers\n\nWe fit boilers.",
        )];

        let summary = export_corpus(&request, pages).unwrap();
        assert_eq!(summary.records, 2);
        assert!(summary.skipped.is_empty());

        let written = std::fs::read_to_string(&output).unwrap();
        let lines: Vec<serde_json::Value> = written
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["heading"], "Boilers");
        assert_eq!(lines[1]["index"], 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn export_documents_pairs_pages_with_chunks() {
        let chunker = TextChunker::new(ChunkPolicy::token_bounded(512, 0).unwrap());
        let docs: Vec<_> =
            export_documents(vec![processed("/", "Home", "Short page.")], Some(chunker)).collect();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].chunks.len(), 1);
        assert_eq!(docs[0].chunks[0].text, "Short page.");
    }
}
