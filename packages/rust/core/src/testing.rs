//! Scripted collaborators for unit tests.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use url::Url;

use smartadmit_shared::{
    DocumentTextExtractor, ExtractedDocument, ExtractionMethod, FetchCapability, PageContent,
    ReasoningClient, ReasoningRequest, Result, SearchCapability, SearchHit, SmartAdmitError,
};

/// Replies in order; an exhausted script is a reasoning error.
pub struct ScriptedReasoning {
    replies: Mutex<VecDeque<Result<String>>>,
    requests: Mutex<Vec<ReasoningRequest>>,
}

impl ScriptedReasoning {
    pub fn new(replies: Vec<Result<String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn ok(replies: &[&str]) -> Self {
        Self::new(replies.iter().map(|r| Ok(r.to_string())).collect())
    }

    pub fn push(&self, reply: Result<String>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn requests(&self) -> Vec<ReasoningRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ReasoningClient for ScriptedReasoning {
    async fn complete(&self, request: &ReasoningRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(SmartAdmitError::Reasoning("script exhausted".into())))
    }

    fn model_id(&self) -> &str {
        "scripted-model"
    }
}

/// Fixed hits, or a failure when `fail` is set.
pub struct FakeSearch {
    pub hits: Vec<SearchHit>,
    pub fail: bool,
    queries: Mutex<Vec<String>>,
}

impl FakeSearch {
    pub fn new(hits: Vec<SearchHit>) -> Self {
        Self {
            hits,
            fail: false,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchCapability for FakeSearch {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        self.queries.lock().unwrap().push(query.to_string());
        if self.fail {
            return Err(SmartAdmitError::Search("HTTP 403: quota exceeded".into()));
        }
        Ok(self.hits.iter().take(limit).cloned().collect())
    }
}

pub fn hit(title: &str, link: &str, snippet: &str) -> SearchHit {
    SearchHit {
        title: title.into(),
        link: link.into(),
        snippet: snippet.into(),
    }
}

/// Pages by URL; anything else is a network error.
pub struct FakeFetch {
    pub pages: HashMap<String, String>,
}

#[async_trait]
impl FetchCapability for FakeFetch {
    async fn fetch(&self, url: &Url) -> Result<PageContent> {
        match self.pages.get(url.as_str()) {
            Some(text) => Ok(PageContent {
                url: url.to_string(),
                title: None,
                text: text.clone(),
            }),
            None => Err(SmartAdmitError::Network(format!("connection refused: {url}"))),
        }
    }
}

pub struct StaticDocuments(pub String);

impl DocumentTextExtractor for StaticDocuments {
    fn extract(&self, _path: &Path) -> Result<ExtractedDocument> {
        Ok(ExtractedDocument {
            text: self.0.clone(),
            method: ExtractionMethod::PdfDirect,
        })
    }
}

pub struct FailingDocuments;

impl DocumentTextExtractor for FailingDocuments {
    fn extract(&self, path: &Path) -> Result<ExtractedDocument> {
        Err(SmartAdmitError::Extraction(format!(
            "no text in {} (direct and OCR)",
            path.display()
        )))
    }
}
