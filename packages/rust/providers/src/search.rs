//! Serper (Google search API) implementation of [`SearchCapability`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use smartadmit_shared::{Credentials, Result, SearchCapability, SearchHit, SerperConfig, SmartAdmitError};

use crate::http::{build_client, status_error};

const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SerperOrganic>,
}

#[derive(Debug, Deserialize)]
struct SerperOrganic {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
}

/// Web search through `google.serper.dev`.
pub struct SerperSearch {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl SerperSearch {
    pub fn new(config: &SerperConfig, credentials: &Credentials) -> Result<Self> {
        Ok(Self {
            client: build_client(SEARCH_TIMEOUT)?,
            endpoint: config.endpoint.clone(),
            api_key: credentials.search_key().to_string(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl SearchCapability for SerperSearch {
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", &self.api_key)
            .json(&json!({ "q": query, "num": limit }))
            .send()
            .await
            .map_err(|e| SmartAdmitError::Network(format!("{}: {e}", self.endpoint)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| SmartAdmitError::Network(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(status_error(status, &text, SmartAdmitError::Search));
        }

        let parsed: SerperResponse = serde_json::from_str(&text)
            .map_err(|e| SmartAdmitError::Search(format!("invalid search response: {e}")))?;

        let hits: Vec<SearchHit> = parsed
            .organic
            .into_iter()
            .filter(|o| !o.link.is_empty())
            .take(limit)
            .map(|o| SearchHit {
                title: o.title,
                link: o.link,
                snippet: o.snippet,
            })
            .collect();

        debug!(hits = hits.len(), "search complete");
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_search(server: &MockServer) -> SerperSearch {
        let creds = Credentials::new("sk-or", "serper-key").unwrap();
        SerperSearch::new(&SerperConfig::default(), &creds)
            .unwrap()
            .with_endpoint(format!("{}/search", server.uri()))
    }

    #[tokio::test]
    async fn parses_organic_results() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(header("X-API-KEY", "serper-key"))
            .and(body_json(json!({"q": "MS data science Canada", "num": 2})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "searchParameters": {"q": "MS data science Canada"},
                "organic": [
                    {"title": "UofT MScAC", "link": "https://www.utoronto.ca/mscac", "snippet": "Applied computing", "position": 1},
                    {"title": "UBC MDS", "link": "https://masterdatascience.ubc.ca", "position": 2},
                    {"title": "Extra", "link": "https://example.org", "snippet": "x", "position": 3}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let hits = test_search(&server)
            .search("MS data science Canada", 2)
            .await
            .expect("search");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "UofT MScAC");
        assert_eq!(hits[1].snippet, "");
    }

    #[tokio::test]
    async fn missing_organic_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"answerBox": {}})))
            .mount(&server)
            .await;

        let hits = test_search(&server).search("anything", 5).await.expect("search");
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn forbidden_is_a_search_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("Unauthorized."))
            .mount(&server)
            .await;

        let err = test_search(&server).search("q", 5).await.unwrap_err();
        assert!(matches!(err, SmartAdmitError::Search(_)));
    }
}
