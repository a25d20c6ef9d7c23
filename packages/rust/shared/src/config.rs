//! Application configuration for SmartAdmit.
//!
//! User config lives at `~/.smartadmit/smartadmit.toml`.
//! CLI flags override environment values, which override the config file.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SmartAdmitError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "smartadmit.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".smartadmit";

// ---------------------------------------------------------------------------
// Config structs (matching smartadmit.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// OpenRouter (reasoning provider) settings.
    #[serde(default)]
    pub openrouter: OpenRouterConfig,

    /// Serper (search provider) settings.
    #[serde(default)]
    pub serper: SerperConfig,

    /// Document ingestion settings.
    #[serde(default)]
    pub document: DocumentConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Path of the run database. `~` expands to the home directory.
    #[serde(default = "default_database")]
    pub database: String,

    /// Directory reports are written to.
    #[serde(default = "default_reports_dir")]
    pub reports_dir: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            reports_dir: default_reports_dir(),
        }
    }
}

fn default_database() -> String {
    "~/.smartadmit/runs.db".into()
}
fn default_reports_dir() -> String {
    "~/smartadmit-reports".into()
}

/// `[openrouter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_openrouter_key_env")]
    pub api_key_env: String,

    /// OpenAI-compatible API root.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model used by the pipeline stages and Q&A.
    #[serde(default = "default_model")]
    pub model: String,

    /// Smaller model used for profile extraction during intake.
    #[serde(default = "default_extractor_model")]
    pub extractor_model: String,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Attempts per request, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay for exponential backoff between attempts.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_openrouter_key_env(),
            base_url: default_base_url(),
            model: default_model(),
            extractor_model: default_extractor_model(),
            temperature: default_temperature(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_openrouter_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_model() -> String {
    "meta-llama/llama-3.3-70b-instruct:free".into()
}
fn default_extractor_model() -> String {
    "meta-llama/llama-3.2-3b-instruct:free".into()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    800
}
fn default_timeout_secs() -> u64 {
    120
}

/// `[serper]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerperConfig {
    /// Name of the env var holding the API key.
    #[serde(default = "default_serper_key_env")]
    pub api_key_env: String,

    /// Search endpoint.
    #[serde(default = "default_serper_endpoint")]
    pub endpoint: String,

    /// Hits requested per query.
    #[serde(default = "default_results_per_query")]
    pub results_per_query: usize,

    /// Top hits whose pages are fetched and excerpted per stage.
    #[serde(default = "default_fetch_top")]
    pub fetch_top: usize,
}

impl Default for SerperConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_serper_key_env(),
            endpoint: default_serper_endpoint(),
            results_per_query: default_results_per_query(),
            fetch_top: default_fetch_top(),
        }
    }
}

fn default_serper_key_env() -> String {
    "SERPER_API_KEY".into()
}
fn default_serper_endpoint() -> String {
    "https://google.serper.dev/search".into()
}
fn default_results_per_query() -> usize {
    8
}
fn default_fetch_top() -> usize {
    2
}

/// `[document]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentConfig {
    /// Fall back to OCR when a PDF has no text layer.
    #[serde(default = "default_true")]
    pub ocr_enabled: bool,

    /// Rasterizer command (poppler).
    #[serde(default = "default_pdftoppm")]
    pub pdftoppm_cmd: String,

    /// OCR command.
    #[serde(default = "default_tesseract")]
    pub tesseract_cmd: String,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            ocr_enabled: true,
            pdftoppm_cmd: default_pdftoppm(),
            tesseract_cmd: default_tesseract(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_pdftoppm() -> String {
    "pdftoppm".into()
}
fn default_tesseract() -> String {
    "tesseract".into()
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// API keys for the reasoning and search providers. Both are required.
#[derive(Clone)]
pub struct Credentials {
    reasoning_key: String,
    search_key: String,
}

impl Credentials {
    /// Build credentials, rejecting blank keys.
    pub fn new(reasoning_key: impl Into<String>, search_key: impl Into<String>) -> Result<Self> {
        let reasoning_key = reasoning_key.into().trim().to_string();
        let search_key = search_key.into().trim().to_string();

        if reasoning_key.is_empty() {
            return Err(SmartAdmitError::config("reasoning provider API key is missing"));
        }
        if search_key.is_empty() {
            return Err(SmartAdmitError::config("search provider API key is missing"));
        }

        Ok(Self {
            reasoning_key,
            search_key,
        })
    }

    pub fn reasoning_key(&self) -> &str {
        &self.reasoning_key
    }

    pub fn search_key(&self) -> &str {
        &self.search_key
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("reasoning_key", &"<redacted>")
            .field("search_key", &"<redacted>")
            .finish()
    }
}

/// Resolve credentials from explicit overrides, falling back to the env vars
/// named in the config.
pub fn resolve_credentials(
    config: &AppConfig,
    reasoning_override: Option<&str>,
    search_override: Option<&str>,
) -> Result<Credentials> {
    let reasoning = match reasoning_override {
        Some(key) => key.to_string(),
        None => read_key_env(&config.openrouter.api_key_env, "https://openrouter.ai/keys")?,
    };
    let search = match search_override {
        Some(key) => key.to_string(),
        None => read_key_env(&config.serper.api_key_env, "https://serper.dev")?,
    };
    Credentials::new(reasoning, search)
}

fn read_key_env(var_name: &str, signup_url: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(SmartAdmitError::config(format!(
            "API key not found. Set the {var_name} environment variable.\n\
             Get a key at {signup_url}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.smartadmit/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| SmartAdmitError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.smartadmit/smartadmit.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| SmartAdmitError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| SmartAdmitError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| SmartAdmitError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| SmartAdmitError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| SmartAdmitError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("OPENROUTER_API_KEY"));
        assert!(toml_str.contains("SERPER_API_KEY"));
        assert!(toml_str.contains("google.serper.dev"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.openrouter.max_attempts, 3);
        assert_eq!(parsed.serper.fetch_top, 2);
        assert!((parsed.openrouter.temperature - 0.1).abs() < f32::EPSILON);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[openrouter]
model = "openai/gpt-4o-mini"

[document]
ocr_enabled = false
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.openrouter.model, "openai/gpt-4o-mini");
        assert_eq!(config.openrouter.api_key_env, "OPENROUTER_API_KEY");
        assert!(!config.document.ocr_enabled);
        assert_eq!(config.document.tesseract_cmd, "tesseract");
    }

    #[test]
    fn credentials_require_both_keys() {
        assert!(Credentials::new("sk-or-1", "serper-1").is_ok());

        let err = Credentials::new("", "serper-1").unwrap_err();
        assert!(err.to_string().contains("reasoning provider"));

        let err = Credentials::new("sk-or-1", "   ").unwrap_err();
        assert!(err.to_string().contains("search provider"));
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let creds = Credentials::new("sk-or-secret", "serper-secret").unwrap();
        let dbg = format!("{creds:?}");
        assert!(!dbg.contains("secret"));
    }

    #[test]
    fn resolve_credentials_reports_missing_env() {
        let mut config = AppConfig::default();
        // Unique names so other tests cannot interfere
        config.openrouter.api_key_env = "SA_TEST_NONEXISTENT_OR_KEY_4821".into();
        config.serper.api_key_env = "SA_TEST_NONEXISTENT_SERPER_KEY_4821".into();

        let err = resolve_credentials(&config, None, Some("serper")).unwrap_err();
        assert!(err.to_string().contains("SA_TEST_NONEXISTENT_OR_KEY_4821"));

        let err = resolve_credentials(&config, Some("or"), None).unwrap_err();
        assert!(err.to_string().contains("SA_TEST_NONEXISTENT_SERPER_KEY_4821"));

        assert!(resolve_credentials(&config, Some("or"), Some("serper")).is_ok());
    }

    #[test]
    fn expand_home_leaves_absolute_paths() {
        assert_eq!(expand_home("/tmp/runs.db"), PathBuf::from("/tmp/runs.db"));
    }
}
