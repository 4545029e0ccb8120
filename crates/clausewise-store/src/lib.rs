//! Storage layer: rule corpora, contract documents, cached matches, and
//! persisted reports.

mod cache;
mod corpus;
mod documents;
mod error;
mod sink;

#[cfg(feature = "parquet")]
mod parquet_corpus;

pub use cache::{CacheKey, MatchCache};
pub use corpus::{InMemoryCorpusProvider, JsonCorpusProvider, RuleCorpusProvider};
pub use documents::{DocumentStore, FsDocumentStore, InMemoryDocumentStore};
pub use error::StoreError;
pub use sink::{JsonReportSink, ReportSink};

#[cfg(feature = "parquet")]
pub use parquet_corpus::{ParquetCorpusProvider, read_parquet, rules_from_batches};
