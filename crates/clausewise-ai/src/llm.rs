//! HTTP language-model client for an Anthropic-style messages endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::service::{GenerateRequest, Generation, LanguageModel, ServiceError};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Client for `POST {base_url}/v1/messages`.
pub struct MessagesClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    model: String,
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

impl MessagesClient {
    /// `base_url` should be like `https://api.anthropic.com` (no trailing slash).
    pub fn new(base_url: String, api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build from `CLAUSEWISE_LLM_API_KEY`, `CLAUSEWISE_LLM_URL` and
    /// `CLAUSEWISE_LLM_MODEL`. `None` when no API key is set.
    pub fn from_env() -> Option<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    pub fn from_vars(lookup: impl Fn(&'static str) -> Option<String>) -> Option<Self> {
        let api_key = lookup("CLAUSEWISE_LLM_API_KEY").filter(|k| !k.trim().is_empty())?;
        let base_url = lookup("CLAUSEWISE_LLM_URL").unwrap_or_else(|| DEFAULT_BASE_URL.into());
        let model = lookup("CLAUSEWISE_LLM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.into());
        Some(Self::new(base_url, api_key, model))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn map_transport(&self, e: reqwest::Error) -> ServiceError {
        if e.is_timeout() {
            ServiceError::Timeout(self.timeout)
        } else if e.is_decode() {
            ServiceError::InvalidResponse(e.to_string())
        } else {
            ServiceError::Unavailable(e.to_string())
        }
    }
}

#[async_trait]
impl LanguageModel for MessagesClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<Generation, ServiceError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: request.system_prompt.as_deref(),
            messages: vec![Message {
                role: "user",
                content: &request.user_prompt,
            }],
        };

        debug!(url = %url, model = %self.model, "sending messages request");
        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let body = resp.text().await.unwrap_or_default();
            return Err(classify(status.as_u16(), retry_after, body, self.timeout));
        }

        let parsed: MessagesResponse = resp.json().await.map_err(|e| self.map_transport(e))?;
        let text: String = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text)
            .collect();
        if text.is_empty() {
            return Err(ServiceError::InvalidResponse(
                "response contained no text".into(),
            ));
        }
        info!(model = %parsed.model, chars = text.len(), "generation received");
        Ok(Generation {
            text,
            model: parsed.model,
        })
    }
}

fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Map a non-success status to a service error.
fn classify(status: u16, retry_after: Option<Duration>, body: String, timeout: Duration) -> ServiceError {
    match status {
        429 => ServiceError::RateLimited { retry_after },
        408 | 504 => ServiceError::Timeout(timeout),
        500..=599 => ServiceError::Unavailable(format!("server returned {status}: {body}")),
        _ => ServiceError::Rejected(format!("server returned {status}: {body}")),
    }
}
