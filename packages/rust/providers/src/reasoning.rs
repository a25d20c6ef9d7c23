//! OpenRouter-backed [`ReasoningClient`] using the OpenAI-compatible
//! chat/completions API, with retry and exponential backoff.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument, warn};

use smartadmit_shared::{
    Credentials, OpenRouterConfig, ReasoningClient, ReasoningRequest, Result, SmartAdmitError,
};

use crate::http::{build_client, status_error};

/// Attempts and backoff for transient provider failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero behaves as one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each one after.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &OpenRouterConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.backoff_ms),
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay after the failed attempt number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

// ---------------------------------------------------------------------------
// OpenRouterClient
// ---------------------------------------------------------------------------

/// Chat-completions client bound to one model and temperature.
pub struct OpenRouterClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    retry: RetryPolicy,
}

impl OpenRouterClient {
    /// Client for the pipeline model.
    pub fn new(config: &OpenRouterConfig, credentials: &Credentials) -> Result<Self> {
        let client = build_client(Duration::from_secs(config.timeout_secs))?;
        Ok(Self {
            client,
            endpoint: completions_endpoint(&config.base_url),
            api_key: credentials.reasoning_key().to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            retry: RetryPolicy::from_config(config),
        })
    }

    /// Client for the smaller profile-extraction model.
    pub fn extractor(config: &OpenRouterConfig, credentials: &Credentials) -> Result<Self> {
        Ok(Self::new(config, credentials)?.with_model(config.extractor_model.clone()))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.endpoint = completions_endpoint(base_url);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn send_once(&self, request: &ReasoningRequest) -> Result<String> {
        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.prompt},
            ],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SmartAdmitError::Network(format!("{}: {e}", self.endpoint)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| SmartAdmitError::Network(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(status_error(status, &text, SmartAdmitError::Reasoning));
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| SmartAdmitError::parse(format!("invalid completion response: {e}")))?;

        if let Some(err) = parsed.error {
            return Err(SmartAdmitError::Reasoning(format!("provider error: {err}")));
        }

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default();

        if content.is_empty() {
            return Err(SmartAdmitError::Reasoning(format!(
                "model {} returned an empty completion",
                self.model
            )));
        }

        Ok(content)
    }
}

#[async_trait]
impl ReasoningClient for OpenRouterClient {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn complete(&self, request: &ReasoningRequest) -> Result<String> {
        let attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match self.send_once(request).await {
                Ok(text) => {
                    debug!(attempt = attempt + 1, chars = text.len(), "completion received");
                    return Ok(text);
                }
                Err(e) if e.is_transient() && attempt + 1 < attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "reasoning call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

fn completions_endpoint(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{base}/chat/completions")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(server: &MockServer) -> OpenRouterClient {
        let creds = Credentials::new("sk-or-test", "serper-test").unwrap();
        OpenRouterClient::new(&OpenRouterConfig::default(), &creds)
            .unwrap()
            .with_base_url(&format!("{}/api/v1", server.uri()))
            .with_retry(RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
            })
    }

    fn completion(content: &str) -> serde_json::Value {
        json!({"choices": [{"message": {"role": "assistant", "content": content}}]})
    }

    #[test]
    fn endpoint_normalization() {
        assert_eq!(
            completions_endpoint("https://openrouter.ai/api/v1/"),
            "https://openrouter.ai/api/v1/chat/completions"
        );
        assert_eq!(
            completions_endpoint("http://x/v1/chat/completions"),
            "http://x/v1/chat/completions"
        );
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(200),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(200));
        assert_eq!(policy.delay_for(1), Duration::from_millis(400));
        assert_eq!(policy.delay_for(2), Duration::from_millis(800));
    }

    #[tokio::test]
    async fn sends_chat_request_and_reads_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-or-test"))
            .and(body_partial_json(json!({
                "model": "meta-llama/llama-3.3-70b-instruct:free",
                "messages": [{"role": "system", "content": "sys"}, {"role": "user", "content": "hello"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("  [] \n")))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let out = client
            .complete(&ReasoningRequest::new("sys", "hello"))
            .await
            .expect("completion");
        assert_eq!(out, "[]");
    }

    #[tokio::test]
    async fn retries_server_errors_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("ok")))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let out = client
            .complete(&ReasoningRequest::new("s", "p"))
            .await
            .expect("should succeed on third attempt");
        assert_eq!(out, "ok");
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let err = client
            .complete(&ReasoningRequest::new("s", "p"))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn auth_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let err = client
            .complete(&ReasoningRequest::new("s", "p"))
            .await
            .unwrap_err();
        assert!(matches!(err, SmartAdmitError::Reasoning(ref m) if m.contains("401")));
    }

    #[tokio::test]
    async fn empty_completion_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let err = client
            .complete(&ReasoningRequest::new("s", "p"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("empty completion"));
    }

    #[test]
    fn extractor_uses_extractor_model() {
        let creds = Credentials::new("a", "b").unwrap();
        let client = OpenRouterClient::extractor(&OpenRouterConfig::default(), &creds).unwrap();
        assert_eq!(client.model_id(), "meta-llama/llama-3.2-3b-instruct:free");
    }
}
