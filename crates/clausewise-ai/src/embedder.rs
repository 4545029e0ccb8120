//! ONNX Runtime embedding pipeline for sentence-transformers models.
//!
//! Produces mean-pooled, L2-normalised sentence embeddings (384 dimensions
//! for all-MiniLM-L6-v2). The model directory must contain `model.onnx` and
//! `tokenizer.json`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;
use tracing::info;

use crate::service::{EmbeddingService, ServiceError};
use crate::vector::normalize;

const MAX_TOKENS: usize = 256;

/// Sentence embedding service backed by ONNX Runtime.
///
/// Inference is CPU-bound and needs exclusive access to the session, so each
/// batch runs on the blocking pool behind a mutex.
pub struct OnnxEmbedder {
    model: Arc<Mutex<Model>>,
    name: String,
    dim: usize,
}

struct Model {
    session: Session,
    tokenizer: Tokenizer,
    dim: usize,
}

impl OnnxEmbedder {
    /// Load a model from a directory containing `model.onnx` and `tokenizer.json`.
    pub fn load(model_dir: &Path) -> anyhow::Result<Self> {
        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");

        anyhow::ensure!(model_path.exists(), "model.onnx not found in {model_dir:?}");
        anyhow::ensure!(
            tokenizer_path.exists(),
            "tokenizer.json not found in {model_dir:?}"
        );

        let session = Session::builder()?.commit_from_file(&model_path)?;
        let dim = infer_dim(session.outputs()[0].dtype()).unwrap_or(384);

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("load tokenizer: {e}"))?;
        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: MAX_TOKENS,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("set truncation: {e}"))?;
        tokenizer.with_padding(Some(tokenizers::PaddingParams::default()));

        let name = model_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "onnx".to_string());

        info!(dim, model = %model_path.display(), "loaded embedding model");
        Ok(Self {
            model: Arc::new(Mutex::new(Model {
                session,
                tokenizer,
                dim,
            })),
            name,
            dim,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }
}

/// Token ids, attention mask and type ids for a batch, padded to the longest
/// encoding and flattened row-major as `[rows, width]`.
struct PackedBatch {
    rows: usize,
    width: usize,
    ids: Vec<i64>,
    mask: Vec<i64>,
    type_ids: Vec<i64>,
}

impl PackedBatch {
    fn pack(encodings: &[tokenizers::Encoding]) -> Self {
        let rows = encodings.len();
        let width = encodings.iter().map(|e| e.len()).max().unwrap_or(0);
        let mut packed = Self {
            rows,
            width,
            ids: vec![0; rows * width],
            mask: vec![0; rows * width],
            type_ids: vec![0; rows * width],
        };
        for (row, encoding) in encodings.iter().enumerate() {
            let base = row * width;
            let columns = encoding
                .get_ids()
                .iter()
                .zip(encoding.get_attention_mask())
                .zip(encoding.get_type_ids());
            for (col, ((&id, &mask), &type_id)) in columns.enumerate() {
                packed.ids[base + col] = i64::from(id);
                packed.mask[base + col] = i64::from(mask);
                packed.type_ids[base + col] = i64::from(type_id);
            }
        }
        packed
    }

    fn tensor(&self, data: &[i64]) -> ort::Result<Tensor<i64>> {
        let shape = [self.rows as i64, self.width as i64];
        Tensor::from_array((shape, data.to_vec().into_boxed_slice()))
    }
}

impl Model {
    fn run(&mut self, texts: Vec<String>) -> anyhow::Result<Vec<Vec<f32>>> {
        let encodings = self
            .tokenizer
            .encode_batch(texts, true)
            .map_err(|e| anyhow::anyhow!("tokenize: {e}"))?;
        let batch = PackedBatch::pack(&encodings);

        let outputs = self.session.run(ort::inputs![
            "input_ids" => batch.tensor(&batch.ids)?,
            "attention_mask" => batch.tensor(&batch.mask)?,
            "token_type_ids" => batch.tensor(&batch.type_ids)?,
        ])?;

        // [rows, tokens, dim]
        let (shape, hidden) = outputs[0].try_extract_tensor::<f32>()?;
        let shape: &[i64] = shape;
        let [rows, tokens, dim] = shape else {
            anyhow::bail!("expected a rank-3 output, got {shape:?}");
        };
        anyhow::ensure!(
            *rows as usize == batch.rows && *dim as usize == self.dim,
            "output shape {shape:?} does not fit {} texts of dimension {}",
            batch.rows,
            self.dim
        );

        Ok(mean_pool(
            hidden,
            &batch.mask,
            batch.rows,
            batch.width,
            *tokens as usize,
            self.dim,
        ))
    }
}

/// Attention-masked mean over the token axis, normalised to unit length.
///
/// `mask` is laid out as `[batch, mask_seq_len]`, `tokens` as
/// `[batch, out_seq_len, dim]`.
fn mean_pool(
    tokens: &[f32],
    mask: &[i64],
    batch_size: usize,
    mask_seq_len: usize,
    out_seq_len: usize,
    dim: usize,
) -> Vec<Vec<f32>> {
    let mut embeddings = Vec::with_capacity(batch_size);
    for i in 0..batch_size {
        let mut pooled = vec![0.0f32; dim];
        let mut token_count = 0.0f32;
        for j in 0..out_seq_len.min(mask_seq_len) {
            let weight = mask[i * mask_seq_len + j] as f32;
            if weight > 0.0 {
                let offset = (i * out_seq_len + j) * dim;
                for (d, p) in pooled.iter_mut().enumerate() {
                    *p += tokens[offset + d] * weight;
                }
                token_count += weight;
            }
        }
        if token_count > 0.0 {
            for p in &mut pooled {
                *p /= token_count;
            }
        }
        normalize(&mut pooled);
        embeddings.push(pooled);
    }
    embeddings
}

fn infer_dim(output_type: &ort::value::ValueType) -> Option<usize> {
    match output_type {
        ort::value::ValueType::Tensor { shape, .. } => shape
            .last()
            .and_then(|&d| if d > 0 { Some(d as usize) } else { None }),
        _ => None,
    }
}

#[async_trait]
impl EmbeddingService for OnnxEmbedder {
    fn model(&self) -> &str {
        &self.name
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        self.embed_batch(&[text])
            .await?
            .pop()
            .ok_or_else(|| ServiceError::InvalidResponse("model returned no embedding".into()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ServiceError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = Arc::clone(&self.model);
        let owned: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| anyhow::anyhow!("embedding model lock poisoned"))?;
            model.run(owned)
        })
        .await
        .map_err(|e| ServiceError::Unavailable(format!("embedding task failed: {e}")))?
        .map_err(|e| ServiceError::Unavailable(format!("{e:#}")))
    }
}
