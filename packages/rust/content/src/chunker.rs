//! Splitting processed pages into bounded chunks.
//!
//! Chunking is two-pass: boundaries for the whole page are computed first,
//! then chunks are materialized lazily with `index`/`total` already fixed.
//! Boundaries partition the text exactly, so without overlap the chunks of a
//! page concatenate back to its cleaned text.

use sha2::{Digest, Sha256};
use sitecorpus_shared::{Chunk, ChunkingConfig, ProcessedPage, Result, SiteCorpusError};
use url::Url;

/// Rough token count: one token per four characters, rounded up. Leading
/// and trailing whitespace is not counted.
pub fn estimate_tokens(text: &str) -> usize {
    text.trim().chars().count().div_ceil(4)
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkPolicy {
    /// Pack whole sentences up to `max_tokens`. With `overlap_tokens > 0`
    /// each chunk after the first is prefixed with that much trailing
    /// context from the previous one, still within `max_tokens`.
    TokenBounded {
        max_tokens: usize,
        overlap_tokens: usize,
    },
    /// One chunk per heading-delimited section.
    SectionBounded,
}

impl ChunkPolicy {
    pub fn token_bounded(max_tokens: usize, overlap_tokens: usize) -> Result<Self> {
        if max_tokens == 0 {
            return Err(SiteCorpusError::config("chunk max_tokens must be at least 1"));
        }
        if overlap_tokens >= max_tokens {
            return Err(SiteCorpusError::config(format!(
                "chunk overlap ({overlap_tokens}) must be smaller than max_tokens ({max_tokens})"
            )));
        }
        Ok(Self::TokenBounded {
            max_tokens,
            overlap_tokens,
        })
    }

    /// Build from the `[chunking]` config section.
    pub fn from_config(config: &ChunkingConfig) -> Result<Self> {
        Self::named(&config.policy, config)
    }

    /// Build from a policy name (`token` or `section`), sizes from config.
    pub fn named(name: &str, config: &ChunkingConfig) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "token" | "token-bounded" => {
                Self::token_bounded(config.max_tokens, config.overlap_tokens)
            }
            "section" | "section-bounded" => Ok(Self::SectionBounded),
            other => Err(SiteCorpusError::config(format!(
                "unknown chunking policy '{other}' (expected token or section)"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Chunker
// ---------------------------------------------------------------------------

/// Byte range of one chunk; `context_start < start` when overlap applies.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Span {
    context_start: usize,
    start: usize,
    end: usize,
    heading: Option<String>,
}

/// Stateless splitter; the same page and policy always yield the same chunks.
#[derive(Debug, Clone, Copy)]
pub struct TextChunker {
    policy: ChunkPolicy,
}

impl TextChunker {
    pub fn new(policy: ChunkPolicy) -> Self {
        Self { policy }
    }

    /// Chunk one page. Empty text yields an empty sequence.
    pub fn chunk<'a>(&self, page: &'a ProcessedPage) -> ChunkSequence<'a> {
        let text = page.text.as_str();
        let spans = if text.trim().is_empty() {
            Vec::new()
        } else {
            match self.policy {
                ChunkPolicy::TokenBounded {
                    max_tokens,
                    overlap_tokens,
                } => token_spans(text, max_tokens, overlap_tokens),
                ChunkPolicy::SectionBounded => section_spans(text),
            }
        };

        ChunkSequence {
            page,
            id_prefix: id_prefix(&page.url),
            spans,
            next: 0,
        }
    }
}

/// Lazy, finite sequence of a page's chunks. Clone it to iterate again.
#[derive(Debug, Clone)]
pub struct ChunkSequence<'a> {
    page: &'a ProcessedPage,
    id_prefix: String,
    spans: Vec<Span>,
    next: usize,
}

impl Iterator for ChunkSequence<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let span = self.spans.get(self.next)?;
        let index = self.next;
        self.next += 1;
        debug_assert!(span.context_start <= span.start && span.start < span.end);

        let text = self.page.text[span.context_start..span.end].to_string();
        Some(Chunk {
            chunk_id: format!("{}-{index:04}", self.id_prefix),
            source_url: self.page.url.clone(),
            index,
            total: self.spans.len(),
            token_estimate: estimate_tokens(&text),
            text,
            heading: span.heading.clone(),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.spans.len() - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ChunkSequence<'_> {}

fn id_prefix(url: &Url) -> String {
    let digest = format!("{:x}", Sha256::digest(url.as_str().as_bytes()));
    digest[..12].to_string()
}

// ---------------------------------------------------------------------------
// Token-bounded boundaries
// ---------------------------------------------------------------------------

fn token_spans(text: &str, max_tokens: usize, overlap_tokens: usize) -> Vec<Span> {
    let budget_chars = (max_tokens - overlap_tokens) * 4;

    let mut ranges: Vec<(usize, usize)> = Vec::new();
    let mut current: Option<(usize, usize, usize)> = None; // start, end, chars

    for (start, end) in sentence_units(text) {
        let chars = text[start..end].chars().count();

        if chars > budget_chars {
            if let Some((s, e, _)) = current.take() {
                ranges.push((s, e));
            }
            ranges.extend(hard_split(text, start, end, budget_chars));
            continue;
        }

        current = match current {
            Some((s, _, n)) if n + chars <= budget_chars => Some((s, end, n + chars)),
            Some((s, e, _)) => {
                ranges.push((s, e));
                Some((start, end, chars))
            }
            None => Some((start, end, chars)),
        };
    }
    if let Some((s, e, _)) = current {
        ranges.push((s, e));
    }

    absorb_blank_ranges(text, ranges)
        .into_iter()
        .enumerate()
        .map(|(i, (start, end))| Span {
            context_start: if i > 0 && overlap_tokens > 0 {
                overlap_start(text, start, overlap_tokens * 4)
            } else {
                start
            },
            start,
            end,
            heading: None,
        })
        .collect()
}

/// Fold whitespace-only ranges into the previous range (or the next one when
/// they lead the text), keeping the partition exact.
fn absorb_blank_ranges(text: &str, ranges: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(ranges.len());
    let mut leading: Option<usize> = None;

    for (start, end) in ranges {
        if text[start..end].trim().is_empty() {
            match merged.last_mut() {
                Some(last) => last.1 = end,
                None => leading = Some(leading.unwrap_or(start)),
            }
            continue;
        }
        merged.push((leading.take().unwrap_or(start), end));
    }
    merged
}

/// Sentence-sized units covering `text` exactly.
///
/// A unit ends after `.`, `!` or `?` followed by whitespace, or at a blank
/// line; the whitespace that follows belongs to the unit.
fn sentence_units(text: &str) -> Vec<(usize, usize)> {
    let mut units = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let boundary = match c {
            '.' | '!' | '?' => chars.peek().is_some_and(|&(_, n)| n.is_whitespace()),
            '\n' => chars.peek().is_some_and(|&(_, n)| n == '\n'),
            _ => false,
        };
        if !boundary {
            continue;
        }

        let mut end = i + c.len_utf8();
        while let Some(&(j, n)) = chars.peek() {
            if !n.is_whitespace() {
                break;
            }
            end = j + n.len_utf8();
            chars.next();
        }
        units.push((start, end));
        start = end;
    }
    if start < text.len() {
        units.push((start, text.len()));
    }
    units
}

/// Split an oversized sentence into pieces of at most `max_chars`,
/// breaking after whitespace where possible.
fn hard_split(text: &str, start: usize, end: usize, max_chars: usize) -> Vec<(usize, usize)> {
    let mut pieces = Vec::new();
    let mut piece_start = start;
    let mut count = 0;
    let mut last_break: Option<usize> = None;

    for (offset, c) in text[start..end].char_indices() {
        let pos = start + offset;
        if count == max_chars {
            let cut = last_break.filter(|&b| b > piece_start).unwrap_or(pos);
            pieces.push((piece_start, cut));
            count = text[cut..pos].chars().count();
            piece_start = cut;
            last_break = None;
        }
        count += 1;
        if c.is_whitespace() {
            last_break = Some(pos + c.len_utf8());
        }
    }
    if piece_start < end {
        pieces.push((piece_start, end));
    }
    pieces
}

/// Start of up to `max_chars` of context before `start`, moved forward to a
/// word boundary when it lands mid-word.
fn overlap_start(text: &str, start: usize, max_chars: usize) -> usize {
    let prefix = &text[..start];
    let Some((back, _)) = prefix.char_indices().rev().take(max_chars).last() else {
        return start;
    };
    if back == 0 || prefix[..back].ends_with(char::is_whitespace) {
        return back;
    }

    let window = &prefix[back..];
    match window.find(char::is_whitespace) {
        Some(ws) => {
            let after = window[ws..]
                .find(|c: char| !c.is_whitespace())
                .map_or(window.len(), |i| ws + i);
            back + after
        }
        None => back,
    }
}

// ---------------------------------------------------------------------------
// Section-bounded boundaries
// ---------------------------------------------------------------------------

fn section_spans(text: &str) -> Vec<Span> {
    let mut starts: Vec<(usize, Option<String>)> = Vec::new();
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        if let Some(heading) = heading_text(line) {
            starts.push((offset, Some(heading)));
        } else if starts.is_empty() {
            starts.push((0, None));
        }
        offset += line.len();
    }

    starts
        .iter()
        .enumerate()
        .map(|(i, (start, heading))| {
            let end = starts.get(i + 1).map_or(text.len(), |(next, _)| *next);
            Span {
                context_start: *start,
                start: *start,
                end,
                heading: heading.clone(),
            }
        })
        .collect()
}

fn heading_text(line: &str) -> Option<String> {
    let line = line.trim_end();
    let hashes = line.chars().take_while(|&c| c == '#').count();
    if !(1..=6).contains(&hashes) {
        return None;
    }
    let rest = line[hashes..].strip_prefix(' ')?.trim();
    (!rest.is_empty()).then(|| rest.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn page(text: &str) -> ProcessedPage {
        ProcessedPage {
            url: Url::parse("https://acme.example/about").unwrap(),
            title: None,
            description: None,
            text: text.to_string(),
            quality_score: 1.0,
            fingerprint: String::new(),
            duplicate_of: None,
            fetched_at: Utc::now(),
        }
    }

    fn token(max: usize) -> TextChunker {
        TextChunker::new(ChunkPolicy::token_bounded(max, 0).unwrap())
    }

    const ABOUT: &str = "# About Acme\n\nAcme has fixed pipes since 1982. We cover the whole county! \
        Need a quote? Call us today.\n\n## Team\n\nOur engineers are certified. Each one has a decade \
        of experience.";

    #[test]
    fn token_chunks_reconstruct_the_text() {
        let page = page(ABOUT);
        for max in [5, 8, 12, 20, 1000] {
            let chunks: Vec<Chunk> = token(max).chunk(&page).collect();
            let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
            assert_eq!(joined, ABOUT, "max_tokens={max}");
            for c in &chunks {
                assert!(c.token_estimate <= max, "{} > {max}: {:?}", c.token_estimate, c.text);
            }
        }
    }

    #[test]
    fn token_chunks_break_only_at_sentence_ends() {
        let page = page(ABOUT);
        let chunks: Vec<Chunk> = token(20).chunk(&page).collect();
        assert!(chunks.len() > 1);
        for c in &chunks[..chunks.len() - 1] {
            let trimmed = c.text.trim_end();
            assert!(
                trimmed.ends_with(['.', '!', '?']) || c.text.ends_with("\n\n"),
                "chunk ended mid-sentence: {:?}",
                c.text
            );
        }
    }

    #[test]
    fn oversized_sentence_is_hard_split() {
        let long = "word ".repeat(40);
        let page = page(long.trim_end());
        let chunks: Vec<Chunk> = token(10).chunk(&page).collect();

        assert_eq!(chunks.len(), 5);
        assert!(chunks.iter().all(|c| c.token_estimate <= 10));
        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(joined, long.trim_end());
        // Breaks land after whitespace, not mid-word
        assert!(chunks[0].text.ends_with(' '));
    }

    #[test]
    fn unbroken_token_at_budget_leaves_no_blank_chunk() {
        let text = format!("{}\n\nNext sentence here.", "a".repeat(40));
        let page = page(&text);
        let chunks: Vec<Chunk> = token(10).chunk(&page).collect();

        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| !c.text.trim().is_empty()), "{chunks:?}");
        assert!(chunks.iter().all(|c| c.token_estimate <= 10));
        assert_eq!(chunks[0].text, format!("{}\n\n", "a".repeat(40)));
        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn leading_blank_lines_join_the_first_chunk() {
        let text = format!("\n\n{}. Done.", "b".repeat(50));
        let page = page(&text);
        let chunks: Vec<Chunk> = token(10).chunk(&page).collect();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text, format!("\n\n{}", "b".repeat(40)));
        assert!(chunks.iter().all(|c| !c.text.trim().is_empty()), "{chunks:?}");
        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn index_and_total_are_consistent() {
        let page = page(ABOUT);
        let chunks: Vec<Chunk> = token(12).chunk(&page).collect();
        let total = chunks.len();
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
            assert_eq!(c.total, total);
            assert_eq!(c.source_url, page.url);
            assert!(c.chunk_id.ends_with(&format!("-{i:04}")));
        }
    }

    #[test]
    fn sequence_is_lazy_sized_and_restartable() {
        let page = page(ABOUT);
        let chunker = token(12);
        let sequence = chunker.chunk(&page);
        let len = sequence.len();

        let first: Vec<Chunk> = sequence.clone().collect();
        let second: Vec<Chunk> = chunker.chunk(&page).collect();
        assert_eq!(first.len(), len);
        assert_eq!(first, second);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert_eq!(token(10).chunk(&page("")).count(), 0);
        assert_eq!(
            TextChunker::new(ChunkPolicy::SectionBounded).chunk(&page("  ")).count(),
            0
        );
    }

    #[test]
    fn section_chunks_carry_headings() {
        let text = "Intro line.\n\n# About Acme\n\nSince 1982.\n\n## Team\n\nCertified engineers.";
        let page = page(text);
        let chunks: Vec<Chunk> = TextChunker::new(ChunkPolicy::SectionBounded)
            .chunk(&page)
            .collect();

        let headings: Vec<Option<&str>> = chunks.iter().map(|c| c.heading.as_deref()).collect();
        assert_eq!(headings, vec![None, Some("About Acme"), Some("Team")]);
        assert_eq!(chunks[1].text, "# About Acme\n\nSince 1982.\n\n");
        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn overlap_repeats_trailing_context() {
        let text = "One two three four five six seven eight. Nine ten eleven twelve thirteen.";
        let page = page(text);
        let chunker = TextChunker::new(ChunkPolicy::token_bounded(15, 4).unwrap());
        let chunks: Vec<Chunk> = chunker.chunk(&page).collect();

        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.token_estimate <= 15));
        // 16 chars back lands mid-word, so context starts at the next word
        assert!(chunks[1].text.starts_with("seven eight. Nine"), "{:?}", chunks[1].text);
    }

    #[test]
    fn invalid_policies_are_rejected() {
        assert!(ChunkPolicy::token_bounded(0, 0).is_err());
        assert!(ChunkPolicy::token_bounded(10, 10).is_err());
        let config = ChunkingConfig::default();
        assert_eq!(
            ChunkPolicy::named("section", &config).unwrap(),
            ChunkPolicy::SectionBounded
        );
        assert!(ChunkPolicy::named("paragraph", &config).is_err());
    }
}
