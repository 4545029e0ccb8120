//! Deterministic feature-hashing embedder.
//!
//! Needs no model files: each significant term is hashed into one of `dim`
//! buckets with a sign bit, so texts sharing vocabulary land close together.
//! Used when no ONNX model is configured and as the test double.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::lexical;
use crate::service::{EmbeddingService, ServiceError};
use crate::vector::normalize;

pub const DEFAULT_DIM: usize = 256;

#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dim: usize,
    model: String,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Self {
        let dim = dim.max(1);
        Self {
            dim,
            model: format!("feature-hash-sha256-{dim}"),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dim];
        for term in lexical::terms(text) {
            let digest = Sha256::digest(term.as_bytes());
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&digest[..8]);
            let h = u64::from_le_bytes(bytes);
            let bucket = (h % self.dim as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        normalize(&mut v);
        v
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIM)
    }
}

#[async_trait]
impl EmbeddingService for HashingEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        Ok(self.vectorize(text))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ServiceError> {
        Ok(texts.iter().map(|t| self.vectorize(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::cosine_sim;

    #[tokio::test]
    async fn same_text_same_vector() {
        let e = HashingEmbedder::default();
        let a = e.embed("Personal data is retained indefinitely").await.unwrap();
        let b = e.embed("Personal data is retained indefinitely").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), DEFAULT_DIM);
    }

    #[tokio::test]
    async fn shared_vocabulary_scores_higher() {
        let e = HashingEmbedder::default();
        let rule = e.embed("retention of personal data").await.unwrap();
        let close = e.embed("Supplier retains personal data for ten years").await.unwrap();
        let far = e.embed("Invoices are payable within sixty days").await.unwrap();
        assert!(cosine_sim(&rule, &close) > cosine_sim(&rule, &far));
    }

    #[tokio::test]
    async fn text_without_terms_is_zero_vector() {
        let e = HashingEmbedder::new(16);
        let v = e.embed("the and of").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn model_name_records_dimension() {
        assert_eq!(HashingEmbedder::new(64).model(), "feature-hash-sha256-64");
        assert_eq!(HashingEmbedder::new(0).dim(), 1);
    }
}
