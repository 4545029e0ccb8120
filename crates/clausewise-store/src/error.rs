use std::path::PathBuf;

use clausewise_core::CorpusError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("contract not found: {0}")]
    ContractNotFound(String),

    #[error("corpus version not found: {0}")]
    VersionNotFound(String),

    #[error("no rule corpus has been published")]
    NoCorpus,

    #[error("corpus version {0} is already published with different rules")]
    VersionConflict(String),

    #[error("refusing to overwrite {0}")]
    AlreadyExists(PathBuf),

    #[error("invalid corpus: {0}")]
    Corpus(#[from] CorpusError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "parquet")]
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[cfg(feature = "parquet")]
    #[error("parquet error: {0}")]
    Parquet(#[from] ::parquet::errors::ParquetError),

    #[error("{0}")]
    Other(String),
}
