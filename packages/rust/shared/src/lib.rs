//! Shared types, error model, and configuration for SmartAdmit.
//!
//! This crate is the foundation depended on by all other SmartAdmit crates.
//! It provides:
//! - [`SmartAdmitError`], the unified error type
//! - Domain types ([`Profile`], [`StageResult`], [`Reconciled`], [`RunId`])
//! - Collaborator traits ([`ReasoningClient`], [`SearchCapability`],
//!   [`FetchCapability`], [`DocumentTextExtractor`])
//! - Configuration ([`AppConfig`], [`Credentials`], config loading)

pub mod capability;
pub mod config;
pub mod error;
pub mod profile;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use capability::{
    DocumentTextExtractor, ExtractedDocument, ExtractionMethod, FetchCapability, PageContent,
    ReasoningClient, ReasoningRequest, SearchCapability, SearchHit,
};
pub use config::{
    AppConfig, Credentials, DefaultsConfig, DocumentConfig, OpenRouterConfig, SerperConfig,
    config_dir, config_file_path, expand_home, init_config, load_config, load_config_from,
    resolve_credentials,
};
pub use error::{Result, SmartAdmitError};
pub use profile::{AcademicLevel, ExamEntry, FieldValue, NOT_SPECIFIED, Profile, ProfileField};
pub use types::{
    NO_RESULTS_SENTINEL, QaExchange, Reconciled, RunId, StageFailure, StageResult, truncate_chars,
};
