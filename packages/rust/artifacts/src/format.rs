//! Export format names and per-record validation errors.

use serde::Serialize;

/// External formats a target's corpus can be rendered into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExportFormat {
    /// One JSON object per accepted page.
    Jsonl,
    /// One chat-style training example per chunk.
    ChatPairs,
    /// One knowledge-base entry per accepted page.
    KnowledgeBase,
    /// One retrieval record per chunk, with position metadata.
    RetrievalChunks,
    /// Assistant configuration header followed by knowledge entries.
    ConfigBundle,
    /// Spreadsheet-friendly page listing with a content preview.
    Csv,
    /// Human-readable dump.
    Text,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 7] = [
        Self::Jsonl,
        Self::ChatPairs,
        Self::KnowledgeBase,
        Self::RetrievalChunks,
        Self::ConfigBundle,
        Self::Csv,
        Self::Text,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jsonl => "jsonl",
            Self::ChatPairs => "chat-pairs",
            Self::KnowledgeBase => "knowledge-base",
            Self::RetrievalChunks => "retrieval-chunks",
            Self::ConfigBundle => "config-bundle",
            Self::Csv => "csv",
            Self::Text => "text",
        }
    }

    /// Whether records are JSON lines (and the trailing summary is JSON too).
    pub fn is_json_lines(&self) -> bool {
        !matches!(self, Self::Csv | Self::Text)
    }

    /// Whether records are built from chunks rather than whole pages.
    pub fn uses_chunks(&self) -> bool {
        matches!(self, Self::ChatPairs | Self::RetrievalChunks)
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == wanted)
            .ok_or_else(|| UnknownFormat(s.to_string()))
    }
}

/// A format name that matches no [`ExportFormat`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "unknown export format {0:?} (expected jsonl, chat-pairs, knowledge-base, \
     retrieval-chunks, config-bundle, csv or text)"
)]
pub struct UnknownFormat(pub String);

/// A record that could not be emitted because a required field is missing.
///
/// Skips only the offending record; collected into the export summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{format} record for {url} is missing required field `{field}`")]
pub struct FormatError {
    pub format: ExportFormat,
    pub field: &'static str,
    pub url: String,
}

impl FormatError {
    pub fn missing(format: ExportFormat, field: &'static str, url: impl Into<String>) -> Self {
        Self {
            format,
            field,
            url: url.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_parse_back() {
        for format in ExportFormat::ALL {
            assert_eq!(format.as_str().parse::<ExportFormat>(), Ok(format));
        }
        assert_eq!("Chat_Pairs".parse::<ExportFormat>(), Ok(ExportFormat::ChatPairs));
        assert!("parquet".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn format_error_names_field_and_url() {
        let err = FormatError::missing(ExportFormat::KnowledgeBase, "title", "https://acme.example/x");
        assert_eq!(
            err.to_string(),
            "knowledge-base record for https://acme.example/x is missing required field `title`"
        );
    }
}
