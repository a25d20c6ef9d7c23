//! Error types for SmartAdmit.
//!
//! Library crates use [`SmartAdmitError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all SmartAdmit operations.
#[derive(Debug, thiserror::Error)]
pub enum SmartAdmitError {
    /// Configuration loading or validation error (missing credentials included).
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error talking to a provider or fetching a page.
    #[error("network error: {0}")]
    Network(String),

    /// Language-model provider returned an error or an unusable response.
    #[error("reasoning error: {0}")]
    Reasoning(String),

    /// Web search provider error.
    #[error("search error: {0}")]
    Search(String),

    /// Document text extraction failed (direct and OCR).
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// A pipeline stage failed; earlier results are kept.
    #[error("stage '{stage}' failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: Box<SmartAdmitError>,
    },

    /// JSON / response parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Invalid pipeline definition or illegal session transition.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// HTML-to-Markdown conversion error.
    #[error("conversion error: {0}")]
    Conversion(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SmartAdmitError>;

impl SmartAdmitError {
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

    /// Attribute an error to the named stage.
    pub fn in_stage(stage: impl Into<String>, cause: SmartAdmitError) -> Self {
        Self::Stage {
            stage: stage.into(),
            source: Box::new(cause),
        }
    }

    /// Whether a retry of the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = SmartAdmitError::config("missing search API key");
        assert_eq!(err.to_string(), "config error: missing search API key");

        let err = SmartAdmitError::validation("stage 'ranking' depends on unknown stage");
        assert!(err.to_string().contains("unknown stage"));
    }

    #[test]
    fn stage_error_names_stage_and_cause() {
        let err = SmartAdmitError::in_stage(
            "matched_programs",
            SmartAdmitError::Reasoning("HTTP 401".into()),
        );
        let msg = err.to_string();
        assert!(msg.contains("matched_programs"));
        assert!(msg.contains("HTTP 401"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn only_network_errors_are_transient() {
        assert!(SmartAdmitError::Network("timeout".into()).is_transient());
        assert!(!SmartAdmitError::Reasoning("bad".into()).is_transient());
    }
}
