//! Seams to external collaborators: language models, web search, page
//! fetching, and document text extraction.
//!
//! Implementations live in `smartadmit-providers`; tests use scripted fakes.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Result;

// ---------------------------------------------------------------------------
// Reasoning
// ---------------------------------------------------------------------------

/// One prompt for a reasoning call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasoningRequest {
    /// Role/persona instructions.
    pub system: String,
    /// Task instructions with placeholders already resolved.
    pub prompt: String,
}

impl ReasoningRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
        }
    }
}

/// Prompt in, free-form text out. Model, temperature, endpoint, and
/// credentials belong to the implementation.
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    async fn complete(&self, request: &ReasoningRequest) -> Result<String>;

    /// Identifier of the configured model.
    fn model_id(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Search / fetch
// ---------------------------------------------------------------------------

/// One organic search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub snippet: String,
}

#[async_trait]
pub trait SearchCapability: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>>;
}

/// Readable content of a fetched page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageContent {
    pub url: String,
    pub title: Option<String>,
    /// Main content as Markdown.
    pub text: String,
}

#[async_trait]
pub trait FetchCapability: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<PageContent>;
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// How document text was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    PlainText,
    PdfDirect,
    Ocr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedDocument {
    pub text: String,
    pub method: ExtractionMethod,
}

/// Path in, plain text out. Blocking; callers off the async runtime use
/// `spawn_blocking`. Total failure is `SmartAdmitError::Extraction`.
pub trait DocumentTextExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<ExtractedDocument>;
}
