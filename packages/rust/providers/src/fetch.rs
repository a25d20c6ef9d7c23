//! Page fetching for research notes: HTTP GET, main-content extraction,
//! HTML to Markdown via `htmd`, and truncation.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::{debug, instrument, warn};
use url::Url;

use smartadmit_shared::{FetchCapability, PageContent, Result, SmartAdmitError, truncate_chars};

use crate::http::{build_fetch_client, is_ssrf_target, status_error};

const FETCH_TIMEOUT: Duration = Duration::from_secs(20);

/// Default cap on the Markdown kept per page.
const DEFAULT_MAX_CHARS: usize = 4_000;

/// Fetches a page and reduces it to readable Markdown.
pub struct PageFetcher {
    client: Client,
    max_chars: usize,
    /// Allow localhost/private IPs (for tests with mock servers).
    allow_localhost: bool,
}

impl PageFetcher {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: build_fetch_client(FETCH_TIMEOUT, false)?,
            max_chars: DEFAULT_MAX_CHARS,
            allow_localhost: false,
        })
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }

    /// Allow fetching localhost/private IPs (for tests).
    #[cfg(test)]
    pub fn allow_localhost(mut self) -> Self {
        self.client = build_fetch_client(FETCH_TIMEOUT, true).expect("build test client");
        self.allow_localhost = true;
        self
    }
}

#[async_trait]
impl FetchCapability for PageFetcher {
    #[instrument(skip(self), fields(url = %url))]
    async fn fetch(&self, url: &Url) -> Result<PageContent> {
        if !self.allow_localhost && is_ssrf_target(url) {
            warn!("SSRF protection: blocked");
            return Err(SmartAdmitError::validation(format!(
                "refusing to fetch non-public URL {url}"
            )));
        }

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| SmartAdmitError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        let html = response
            .text()
            .await
            .map_err(|e| SmartAdmitError::Network(format!("{url}: failed to read body: {e}")))?;

        if !status.is_success() {
            return Err(status_error(status, "", SmartAdmitError::Network));
        }

        let title = extract_title(&html);
        let text = html_to_text(&html, self.max_chars)?;
        debug!(chars = text.len(), "page converted");

        Ok(PageContent {
            url: url.to_string(),
            title,
            text,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Convert a full HTML document to trimmed Markdown of the main content.
pub fn html_to_text(html: &str, max_chars: usize) -> Result<String> {
    let content_html = extract_content_html(html);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec![
            "script", "style", "nav", "header", "footer", "aside", "iframe", "noscript", "svg",
            "form",
        ])
        .build();

    let markdown = converter
        .convert(&content_html)
        .map_err(|e| SmartAdmitError::Conversion(format!("htmd conversion failed: {e}")))?;

    Ok(truncate_chars(&collapse_blank_lines(&markdown), max_chars))
}

/// Extract the main content HTML, preferring semantic containers.
fn extract_content_html(html: &str) -> String {
    let doc = Html::parse_document(html);

    let selectors = ["main", "article", "[role=\"main\"]", "#content", ".content", "body"];
    for sel_str in &selectors {
        if let Ok(selector) = Selector::parse(sel_str) {
            if let Some(el) = doc.select(&selector).next() {
                return el.inner_html();
            }
        }
    }

    html.to_string()
}

fn extract_title(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let selector = Selector::parse("title").ok()?;
    doc.select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

fn collapse_blank_lines(md: &str) -> String {
    static BLANKS: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)+").expect("valid regex"));
    BLANKS.replace_all(md.trim(), "\n\n").into_owned()
}
