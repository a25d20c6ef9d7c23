//! Concrete collaborators for the SmartAdmit pipeline.
//!
//! - [`OpenRouterClient`]: chat-completions reasoning with retry/backoff
//! - [`SerperSearch`]: web search
//! - [`PageFetcher`]: page fetch + HTML to Markdown
//! - [`PdfDocumentExtractor`]: PDF/plain-text extraction with OCR fallback

pub mod document;
pub mod fetch;
mod http;
pub mod reasoning;
pub mod search;

pub use document::PdfDocumentExtractor;
pub use fetch::{PageFetcher, html_to_text};
pub use reasoning::{OpenRouterClient, RetryPolicy};
pub use search::SerperSearch;
