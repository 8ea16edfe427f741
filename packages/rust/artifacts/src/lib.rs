//! Export of processed pages and chunks into external corpus formats.
//!
//! [`ExportService::export`] returns an [`ExportStream`]: a lazy iterator of
//! serialized records that pulls one [`ExportDocument`] at a time, so a corpus
//! never has to be held in memory as a whole. Records that fail their format's
//! required-field check are skipped with a [`FormatError`] and reported in a
//! trailing summary record.

mod format;
mod records;

use std::collections::VecDeque;
use std::io::Write;

use serde::Serialize;
use sitecorpus_shared::{AssistantConfig, Chunk, ProcessedPage, TargetId};
use tracing::{debug, info, warn};
use url::Url;

pub use format::{ExportFormat, FormatError, UnknownFormat};

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Identity of the business whose corpus is exported.
#[derive(Debug, Clone)]
pub struct ExportTarget {
    pub id: TargetId,
    pub name: String,
    pub root_url: Url,
    /// Used by chat pairs and the configuration bundle.
    pub assistant: AssistantConfig,
}

/// One accepted page and the chunks carved from it.
#[derive(Debug, Clone)]
pub struct ExportDocument {
    pub page: ProcessedPage,
    pub chunks: Vec<Chunk>,
}

/// Counts for one finished export.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportSummary {
    /// Data records emitted (headers and the summary itself excluded).
    pub records: usize,
    pub skipped: Vec<FormatError>,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Renders documents for one target. Stateless between calls.
#[derive(Debug, Clone)]
pub struct ExportService {
    target: ExportTarget,
}

impl ExportService {
    pub fn new(target: ExportTarget) -> Self {
        Self { target }
    }

    /// Stream `documents` as `format` records.
    ///
    /// Nothing is rendered until the stream is polled. Empty input yields an
    /// empty stream: no header and no summary.
    pub fn export<I>(&self, documents: I, format: ExportFormat) -> ExportStream<'_, I::IntoIter>
    where
        I: IntoIterator<Item = ExportDocument>,
    {
        info!(target_id = %self.target.id, %format, "export started");
        ExportStream {
            target: &self.target,
            format,
            documents: documents.into_iter(),
            pending: VecDeque::new(),
            header_done: false,
            finished: false,
            summary: ExportSummary::default(),
        }
    }
}

/// Lazy sequence of serialized records, one `String` per record (no trailing
/// newline).
pub struct ExportStream<'a, I> {
    target: &'a ExportTarget,
    format: ExportFormat,
    documents: I,
    pending: VecDeque<String>,
    header_done: bool,
    finished: bool,
    summary: ExportSummary,
}

impl<I> ExportStream<'_, I>
where
    I: Iterator<Item = ExportDocument>,
{
    pub fn format(&self) -> ExportFormat {
        self.format
    }

    /// Counts so far; final once the stream is exhausted.
    pub fn summary(&self) -> &ExportSummary {
        &self.summary
    }

    fn skip(&mut self, err: FormatError) {
        warn!(format = %err.format, url = %err.url, field = err.field, "export record skipped");
        self.summary.skipped.push(err);
    }

    fn render(&mut self, document: &ExportDocument) {
        let mut emitted = Vec::new();
        for record in records::records(self.format, self.target, document) {
            match record {
                Ok(line) => emitted.push(line),
                Err(err) => self.skip(err),
            }
        }
        if emitted.is_empty() {
            return;
        }

        if !self.header_done {
            self.header_done = true;
            match records::header(self.format, self.target) {
                Some(Ok(header)) => self.pending.push_back(header),
                Some(Err(err)) => self.skip(err),
                None => {}
            }
        }
        self.summary.records += emitted.len();
        self.pending.extend(emitted);
    }
}

impl<I> Iterator for ExportStream<'_, I>
where
    I: Iterator<Item = ExportDocument>,
{
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Some(record);
            }
            if self.finished {
                return None;
            }
            match self.documents.next() {
                Some(document) => {
                    debug!(
                        url = %document.page.url,
                        chunks = document.chunks.len(),
                        "exporting document"
                    );
                    self.render(&document);
                }
                None => {
                    self.finished = true;
                    info!(
                        format = %self.format,
                        records = self.summary.records,
                        skipped = self.summary.skipped.len(),
                        "export complete"
                    );
                    if !self.summary.skipped.is_empty() {
                        self.pending
                            .push_back(records::footer(self.format, &self.summary));
                    }
                }
            }
        }
    }
}

/// Drain `stream` into `writer`, one record per line.
pub fn write_export<I, W>(
    mut stream: ExportStream<'_, I>,
    writer: &mut W,
) -> std::io::Result<ExportSummary>
where
    I: Iterator<Item = ExportDocument>,
    W: Write,
{
    for record in stream.by_ref() {
        writer.write_all(record.as_bytes())?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(stream.summary)
}
