//! Core domain types for pipeline runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Phrase a stage emits when it found nothing; it overrides any structure.
pub const NO_RESULTS_SENTINEL: &str = "No matching scholarships found";

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for pipeline run identifiers (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Reconciled
// ---------------------------------------------------------------------------

/// Structured view of one stage's raw text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Reconciled {
    /// An array literal whose elements are all records.
    Records(Vec<Map<String, Value>>),
    /// A single record.
    Record(Map<String, Value>),
    /// Free-form text (trimmed).
    Narrative(String),
    /// The no-results sentinel phrase.
    NoResults(String),
}

impl Reconciled {
    /// Short shape name for logs and status output.
    pub fn shape(&self) -> &'static str {
        match self {
            Self::Records(_) => "records",
            Self::Record(_) => "record",
            Self::Narrative(_) => "narrative",
            Self::NoResults(_) => "no_results",
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, Self::Records(_) | Self::Record(_))
    }
}

// ---------------------------------------------------------------------------
// StageResult / StageFailure
// ---------------------------------------------------------------------------

/// Stored output of one completed stage. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// Stage name (the result key).
    pub stage: String,
    /// Raw model text as returned.
    pub raw: String,
    /// Reconciled form of `raw`.
    pub reconciled: Reconciled,
    /// Model that produced the text.
    pub model: String,
    /// Pages consulted during the research step.
    #[serde(default)]
    pub sources: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

/// The stage that halted advancement and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: String,
    pub cause: String,
    pub failed_at: DateTime<Utc>,
}

/// One follow-up question and its answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaExchange {
    pub question: String,
    pub answer: String,
    pub asked_at: DateTime<Utc>,
}

/// Cut `text` to at most `max_chars` characters, marking the cut with `…`.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", text[..idx].trim_end()),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_roundtrip() {
        let id = RunId::new();
        let s = id.to_string();
        let parsed: RunId = s.parse().expect("parse RunId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn reconciled_serialization_is_tagged() {
        let value = Reconciled::NoResults(NO_RESULTS_SENTINEL.into());
        let json = serde_json::to_value(&value).expect("serialize");
        assert_eq!(json["kind"], "no_results");
        assert_eq!(json["value"], NO_RESULTS_SENTINEL);

        let back: Reconciled = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, value);
        assert_eq!(back.shape(), "no_results");
        assert!(!back.is_structured());
    }

    #[test]
    fn stage_result_defaults_sources() {
        let json = r#"{
            "stage": "reviews",
            "raw": "Great campus.",
            "reconciled": {"kind": "narrative", "value": "Great campus."},
            "model": "m",
            "completed_at": "2026-01-01T00:00:00Z"
        }"#;
        let result: StageResult = serde_json::from_str(json).expect("parse");
        assert!(result.sources.is_empty());
        assert_eq!(result.reconciled.shape(), "narrative");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("ünïcödé", 3), "ünï…");
        assert_eq!(truncate_chars("₹₹₹₹", 2), "₹₹…");
        assert_eq!(truncate_chars("two words", 4), "two…");
        assert_eq!(truncate_chars("short", 10), "short");
    }
}
