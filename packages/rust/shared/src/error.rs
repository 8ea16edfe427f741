//! Error types for SiteCorpus.
//!
//! Library crates use [`SiteCorpusError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Per-URL fetch failures are not errors: they travel inside
//! [`PageResult`](crate::types::PageResult) as a
//! [`FailureReason`](crate::types::FailureReason) and only surface in the run
//! summary. The variants here are the conditions that abort an operation.

use std::path::PathBuf;

/// Top-level error type for all SiteCorpus operations.
#[derive(Debug, thiserror::Error)]
pub enum SiteCorpusError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error outside the per-URL fetch loop (robots.txt, probes).
    #[error("network error: {0}")]
    Network(String),

    /// HTML parsing or content extraction error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad registry entry, malformed stored record, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// HTML-to-Markdown conversion error.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// A candidate URL has an unsupported scheme or no host.
    #[error("invalid URL {url:?}: {reason}")]
    UrlValidation { url: String, reason: String },

    /// A well-formed URL failed its reachability probe.
    #[error("URL {url} is not reachable: {reason}")]
    UnreachableUrl { url: String, reason: String },

    /// The crawl root failed under every strategy in the fallback order.
    #[error("root URL {url} unreachable under every strategy: {attempts}")]
    RootUnreachable { url: String, attempts: String },

    /// A frontier invariant was violated (e.g. a non-positive page budget).
    #[error("frontier invariant violated: {message}")]
    Invariant { message: String },

    /// A crawl for this target is already running.
    #[error("a crawl for target {target} is already running")]
    AlreadyRunning { target: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SiteCorpusError>;

impl SiteCorpusError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Reject a candidate URL with a reason.
    pub fn url_validation(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UrlValidation {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Report a frontier invariant violation.
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant {
            message: msg.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = SiteCorpusError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = SiteCorpusError::url_validation("not-a-url", "relative URL without a base");
        assert!(err.to_string().contains("\"not-a-url\""));

        let err = SiteCorpusError::invariant("max pages must be at least 1, got -2");
        assert!(err.to_string().contains("got -2"));
    }
}
