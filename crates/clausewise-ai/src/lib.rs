//! AI layer: embedding-backed rule matching and language-model rewrites.
//!
//! Both external models sit behind narrow traits ([`EmbeddingService`],
//! [`LanguageModel`]) so the matching and rewrite logic runs unchanged
//! against ONNX Runtime, a remote API, or a deterministic fake.

pub mod hashing;
pub mod lexical;
pub mod matcher;
pub mod rewrite;
pub mod service;
mod vector;

#[cfg(feature = "onnx")]
mod embedder;
#[cfg(feature = "onnx")]
pub use embedder::OnnxEmbedder;

#[cfg(feature = "http")]
pub mod llm;
#[cfg(feature = "http")]
pub use llm::MessagesClient;

pub use hashing::HashingEmbedder;
pub use matcher::{MatchOptions, RuleMatcher};
pub use rewrite::{RetryPolicy, RewriteError, RewriteGenerator, ViolatedRule};
pub use service::{EmbeddingService, GenerateRequest, Generation, LanguageModel, ServiceError};
