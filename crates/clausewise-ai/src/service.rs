//! Collaborator interfaces for the external models.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServiceError {
    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The service refused the request itself; repeating it will not help.
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl ServiceError {
    /// Whether the same request may succeed if retried.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

/// Turns text into vectors for similarity search.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Model identifier, recorded for reproducibility.
    fn model(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError>;

    /// Embed several texts, one vector per input in order.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ServiceError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Prompt for a single completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub system_prompt: Option<String>,
    pub user_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    /// Model that actually served the request.
    pub model: String,
}

/// A text-generation model. Treated as unreliable: callers retry.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, request: &GenerateRequest) -> Result<Generation, ServiceError>;
}
