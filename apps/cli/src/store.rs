//! Local page persistence: one directory per target under the output dir.
//!
//! ```text
//! <output_dir>/<target_id>/
//! ├── pages.jsonl     (one PageResult per line, dispatch order)
//! ├── summary.json    (last CrawlSummary)
//! └── crawl.lock      (present while a crawl of this target runs)
//! ```

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use sitecorpus_crawler::CrawlSummary;
use sitecorpus_shared::{PageResult, Result, SiteCorpusError, TargetId, expand_home};
use tracing::{debug, warn};

const PAGES_FILE: &str = "pages.jsonl";
const SUMMARY_FILE: &str = "summary.json";
const LOCK_FILE: &str = "crawl.lock";

static TMP_COUNTER: AtomicUsize = AtomicUsize::new(0);

pub(crate) struct PageStore {
    root: PathBuf,
}

impl PageStore {
    pub(crate) fn new(output_dir: &str) -> Self {
        Self {
            root: expand_home(output_dir),
        }
    }

    pub(crate) fn target_dir(&self, id: TargetId) -> PathBuf {
        self.root.join(id.to_string())
    }

    /// Claim the target for one crawl across processes.
    ///
    /// Fails with [`SiteCorpusError::AlreadyRunning`] while another
    /// `sitecorpus` process holds the lock. The lock is removed when the
    /// returned guard drops.
    pub(crate) fn lock(&self, id: TargetId) -> Result<CrawlLock> {
        let dir = self.target_dir(id);
        std::fs::create_dir_all(&dir).map_err(|e| SiteCorpusError::io(&dir, e))?;

        let path = dir.join(LOCK_FILE);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(SiteCorpusError::AlreadyRunning {
                    target: format!("{id} (remove {} if no crawl is running)", path.display()),
                });
            }
            Err(e) => return Err(SiteCorpusError::io(&path, e)),
        };
        writeln!(file, "{}", std::process::id()).map_err(|e| SiteCorpusError::io(&path, e))?;

        debug!(path = %path.display(), "crawl lock taken");
        Ok(CrawlLock { path })
    }

    /// Stored pages for a target; empty if it was never crawled.
    pub(crate) fn load_pages(&self, id: TargetId) -> Result<Vec<PageResult>> {
        let path = self.target_dir(id).join(PAGES_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&path).map_err(|e| SiteCorpusError::io(&path, e))?;
        let mut pages = Vec::new();
        for (n, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| SiteCorpusError::io(&path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            let page: PageResult = serde_json::from_str(&line).map_err(|e| {
                SiteCorpusError::validation(format!("{}:{}: {e}", path.display(), n + 1))
            })?;
            pages.push(page);
        }

        debug!(path = %path.display(), pages = pages.len(), "pages loaded");
        Ok(pages)
    }

    /// Replace a target's stored pages and summary.
    ///
    /// Pages go to a temporary file first, so an interrupted write leaves the
    /// previous run intact.
    pub(crate) fn replace(
        &self,
        id: TargetId,
        pages: &[PageResult],
        summary: &CrawlSummary,
    ) -> Result<PathBuf> {
        let dir = self.target_dir(id);
        std::fs::create_dir_all(&dir).map_err(|e| SiteCorpusError::io(&dir, e))?;

        let path = dir.join(PAGES_FILE);
        let tmp = dir.join(format!(
            "{PAGES_FILE}.{}-{}.tmp",
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        write_lines(&tmp, pages)?;
        std::fs::rename(&tmp, &path).map_err(|e| SiteCorpusError::io(&path, e))?;

        let summary_path = dir.join(SUMMARY_FILE);
        let json = serde_json::to_string_pretty(summary)
            .map_err(|e| SiteCorpusError::validation(format!("summary serialization: {e}")))?;
        std::fs::write(&summary_path, json).map_err(|e| SiteCorpusError::io(&summary_path, e))?;

        debug!(path = %path.display(), pages = pages.len(), "pages saved");
        Ok(path)
    }
}

/// Exclusive claim on a target's directory; see [`PageStore::lock`].
#[derive(Debug)]
pub(crate) struct CrawlLock {
    path: PathBuf,
}

impl Drop for CrawlLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "could not remove crawl lock");
        }
    }
}

fn write_lines(path: &Path, pages: &[PageResult]) -> Result<()> {
    let file = File::create(path).map_err(|e| SiteCorpusError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    for page in pages {
        serde_json::to_writer(&mut writer, page)
            .map_err(|e| SiteCorpusError::validation(format!("page serialization: {e}")))?;
        writer
            .write_all(b"\n")
            .map_err(|e| SiteCorpusError::io(path, e))?;
    }
    writer.flush().map_err(|e| SiteCorpusError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitecorpus_shared::{FailureReason, RunState, StrategyKind};
    use url::Url;

    fn summary(id: TargetId) -> CrawlSummary {
        CrawlSummary {
            target_id: id,
            root_url: Url::parse("https://acme.example/").unwrap(),
            state: RunState::Completed,
            pages: Vec::new(),
            succeeded: 1,
            failed: 1,
            skipped: 0,
            partial: false,
            strategies_used: Vec::new(),
            duration_ms: 10,
        }
    }

    #[test]
    fn pages_survive_a_round_trip_through_disk() {
        let root = std::env::temp_dir().join(format!("sitecorpus-store-{}", TargetId::new()));
        let store = PageStore::new(root.to_str().unwrap());
        let id = TargetId::new();

        assert!(store.load_pages(id).unwrap().is_empty());

        let pages = vec![
            PageResult::succeeded(
                Url::parse("https://acme.example/").unwrap(),
                StrategyKind::StaticHttp,
                "<p>Hello</p>",
            )
            .with_title(Some("Acme".into())),
            PageResult::failed(
                Url::parse("https://acme.example/down").unwrap(),
                StrategyKind::StaticHttp,
                FailureReason::Fetch("HTTP 503".into()),
            ),
        ];
        store.replace(id, &pages, &summary(id)).unwrap();

        let loaded = store.load_pages(id).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].title.as_deref(), Some("Acme"));
        assert!(!loaded[1].success);
        assert!(store.target_dir(id).join(SUMMARY_FILE).exists());

        store.replace(id, &pages[..1], &summary(id)).unwrap();
        assert_eq!(store.load_pages(id).unwrap().len(), 1);

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn second_lock_on_a_target_is_rejected_until_released() {
        let root = std::env::temp_dir().join(format!("sitecorpus-store-{}", TargetId::new()));
        let store = PageStore::new(root.to_str().unwrap());
        let id = TargetId::new();
        let other = TargetId::new();

        let held = store.lock(id).unwrap();
        let err = store.lock(id).unwrap_err();
        assert!(matches!(err, SiteCorpusError::AlreadyRunning { .. }));
        // Other targets are independent
        drop(store.lock(other).unwrap());

        drop(held);
        assert!(!store.target_dir(id).join(LOCK_FILE).exists());
        drop(store.lock(id).unwrap());

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn replace_leaves_no_temporary_files() {
        let root = std::env::temp_dir().join(format!("sitecorpus-store-{}", TargetId::new()));
        let store = PageStore::new(root.to_str().unwrap());
        let id = TargetId::new();

        store.replace(id, &[], &summary(id)).unwrap();
        store.replace(id, &[], &summary(id)).unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(store.target_dir(id))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn corrupt_line_is_reported_with_position() {
        let root = std::env::temp_dir().join(format!("sitecorpus-store-{}", TargetId::new()));
        let store = PageStore::new(root.to_str().unwrap());
        let id = TargetId::new();
        std::fs::create_dir_all(store.target_dir(id)).unwrap();
        std::fs::write(store.target_dir(id).join(PAGES_FILE), "{not json}\n").unwrap();

        let err = store.load_pages(id).unwrap_err();
        assert!(err.to_string().contains("pages.jsonl:1"));

        std::fs::remove_dir_all(&root).ok();
    }
}
