//! Per-format record rendering.
//!
//! Every builder validates the fields its format requires before rendering;
//! a missing field yields a [`FormatError`] for that record only.

use serde_json::json;
use sitecorpus_shared::{Chunk, ProcessedPage};

use crate::format::{ExportFormat, FormatError};
use crate::{ExportDocument, ExportSummary, ExportTarget};

/// Characters of page text shown in the CSV preview column.
const PREVIEW_CHARS: usize = 200;

const CSV_HEADER: [&str; 5] = ["URL", "Title", "Description", "Content Preview", "Crawled At"];

type Record = Result<String, FormatError>;

// ---------------------------------------------------------------------------
// Header / footer
// ---------------------------------------------------------------------------

/// Record emitted once, ahead of the first data record.
pub(crate) fn header(format: ExportFormat, target: &ExportTarget) -> Option<Record> {
    match format {
        ExportFormat::Csv => Some(Ok(csv_row(CSV_HEADER))),
        ExportFormat::Text => Some(Ok(format!(
            "Scraped Data for {}\nWebsite: {}\n{}\n",
            target.name,
            target.root_url,
            "=".repeat(50)
        ))),
        ExportFormat::ConfigBundle => Some(assistant_header(target)),
        _ => None,
    }
}

/// Trailing summary, in a shape that fits the format.
pub(crate) fn footer(format: ExportFormat, summary: &ExportSummary) -> String {
    if format.is_json_lines() {
        return json!({
            "type": "export_summary",
            "format": format,
            "records": summary.records,
            "skipped": summary.skipped,
        })
        .to_string();
    }

    let mut lines = vec![format!(
        "# export summary: {} records written, {} skipped",
        summary.records,
        summary.skipped.len()
    )];
    lines.extend(summary.skipped.iter().map(|err| format!("# skipped: {err}")));
    lines.join("\n")
}

fn assistant_header(target: &ExportTarget) -> Record {
    let format = ExportFormat::ConfigBundle;
    let website = target.root_url.as_str();
    let name = required(format, "name", Some(target.name.as_str()), website)?;
    let personality = required(
        format,
        "personality",
        Some(target.assistant.personality.as_str()),
        website,
    )?;

    Ok(json!({
        "type": "assistant",
        "target_id": target.id,
        "name": name,
        "website": website,
        "personality": personality,
        "welcome_message": target.assistant.welcome_message,
    })
    .to_string())
}

// ---------------------------------------------------------------------------
// Data records
// ---------------------------------------------------------------------------

/// All records one document contributes, in order.
pub(crate) fn records(
    format: ExportFormat,
    target: &ExportTarget,
    document: &ExportDocument,
) -> Vec<Record> {
    let page = &document.page;
    match format {
        ExportFormat::Jsonl => vec![jsonl(page)],
        ExportFormat::KnowledgeBase => vec![knowledge_entry(page)],
        ExportFormat::ConfigBundle => vec![bundle_entry(page)],
        ExportFormat::Csv => vec![csv_record(page)],
        ExportFormat::Text => vec![text_block(page)],
        ExportFormat::ChatPairs => document
            .chunks
            .iter()
            .map(|chunk| chat_pair(target, page, chunk))
            .collect(),
        ExportFormat::RetrievalChunks => document
            .chunks
            .iter()
            .map(|chunk| retrieval_chunk(page, chunk))
            .collect(),
    }
}

fn jsonl(page: &ProcessedPage) -> Record {
    let url = page.url.as_str();
    let content = required(ExportFormat::Jsonl, "content", Some(page.text.as_str()), url)?;

    Ok(json!({
        "url": url,
        "title": page.title,
        "description": page.description,
        "content": content,
        "quality_score": page.quality_score,
        "fingerprint": page.fingerprint,
        "fetched_at": page.fetched_at,
    })
    .to_string())
}

fn knowledge_entry(page: &ProcessedPage) -> Record {
    let format = ExportFormat::KnowledgeBase;
    let url = page.url.as_str();
    let title = required(format, "title", page.title.as_deref(), url)?;
    let content = required(format, "content", Some(page.text.as_str()), url)?;

    Ok(json!({
        "id": short_id(&page.fingerprint),
        "title": title,
        "summary": page.description,
        "content": content,
        "source_url": url,
    })
    .to_string())
}

fn bundle_entry(page: &ProcessedPage) -> Record {
    let format = ExportFormat::ConfigBundle;
    let url = page.url.as_str();
    let title = required(format, "title", page.title.as_deref(), url)?;
    let content = required(format, "content", Some(page.text.as_str()), url)?;

    Ok(json!({
        "type": "knowledge",
        "title": title,
        "url": url,
        "summary": page.description,
        "content": content,
    })
    .to_string())
}

fn chat_pair(target: &ExportTarget, page: &ProcessedPage, chunk: &Chunk) -> Record {
    let format = ExportFormat::ChatPairs;
    let url = chunk.source_url.as_str();
    let topic = required(
        format,
        "title",
        chunk.heading.as_deref().or(page.title.as_deref()),
        url,
    )?;
    let answer = required(format, "text", Some(chunk.text.as_str()), url)?;

    let system = format!(
        "You are the {} assistant for {} ({}).",
        target.assistant.personality, target.name, target.root_url
    );
    let question = format!("What can you tell me about {topic}?");

    Ok(json!({
        "messages": [
            { "role": "system", "content": system },
            { "role": "user", "content": question },
            { "role": "assistant", "content": answer },
        ],
        "source_url": url,
        "chunk_id": chunk.chunk_id,
    })
    .to_string())
}

fn retrieval_chunk(page: &ProcessedPage, chunk: &Chunk) -> Record {
    let format = ExportFormat::RetrievalChunks;
    let url = chunk.source_url.as_str();
    let chunk_id = required(format, "chunk_id", Some(chunk.chunk_id.as_str()), url)?;
    let text = required(format, "text", Some(chunk.text.as_str()), url)?;

    Ok(json!({
        "chunk_id": chunk_id,
        "source_url": url,
        "index": chunk.index,
        "total": chunk.total,
        "text": text,
        "token_estimate": chunk.token_estimate,
        "heading": chunk.heading,
        "title": page.title,
    })
    .to_string())
}

fn csv_record(page: &ProcessedPage) -> Record {
    let url = required(ExportFormat::Csv, "url", Some(page.url.as_str()), page.url.as_str())?;
    let fetched_at = page.fetched_at.format("%Y-%m-%d %H:%M:%S").to_string();

    Ok(csv_row([
        url,
        page.title.as_deref().unwrap_or_default(),
        page.description.as_deref().unwrap_or_default(),
        preview(&page.text).as_str(),
        fetched_at.as_str(),
    ]))
}

fn text_block(page: &ProcessedPage) -> Record {
    let url = page.url.as_str();
    let content = required(ExportFormat::Text, "content", Some(page.text.as_str()), url)?;

    Ok(format!(
        "URL: {url}\nTitle: {}\nDescription: {}\nContent:\n{content}\n{}\n",
        page.title.as_deref().unwrap_or_default(),
        page.description.as_deref().unwrap_or_default(),
        "-".repeat(30)
    ))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A field counts as present only when it holds non-whitespace text.
fn required<'a>(
    format: ExportFormat,
    field: &'static str,
    value: Option<&'a str>,
    url: &str,
) -> Result<&'a str, FormatError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| FormatError::missing(format, field, url))
}

fn short_id(fingerprint: &str) -> &str {
    fingerprint.get(..16).unwrap_or(fingerprint)
}

fn preview(text: &str) -> String {
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn csv_row<'a>(fields: impl IntoIterator<Item = &'a str>) -> String {
    fields
        .into_iter()
        .map(csv_field)
        .collect::<Vec<_>>()
        .join(",")
}

/// Quote a field when it contains a delimiter, quote or line break.
fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
