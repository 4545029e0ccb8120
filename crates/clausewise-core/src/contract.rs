//! Contracts and the clauses segmented out of them.
//!
//! Both are immutable once constructed: fields are private and there is no
//! mutating API. Rewrite suggestions live beside a clause, never inside it.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractId(String);

impl ContractId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Clause identifier, stable for a given contract text: `<contract>#<ordinal>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClauseId(String);

impl ClauseId {
    pub fn new(contract: &ContractId, ordinal: usize) -> Self {
        Self(format!("{contract}#{ordinal:04}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClauseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Half-open byte range `[start, end)`. Offsets always fall on UTF-8 char
/// boundaries of the text they index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextSpan {
    pub start: usize,
    pub end: usize,
}

impl TextSpan {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end, "span start {start} after end {end}");
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn overlaps(&self, other: &TextSpan) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// An ingested contract. The raw text is shared, never copied or edited.
#[derive(Debug, Clone)]
pub struct Contract {
    id: ContractId,
    raw_text: Arc<str>,
    ingested_at: DateTime<Utc>,
}

impl Contract {
    /// Ingest contract text as of now.
    pub fn ingest(id: ContractId, raw_text: impl Into<Arc<str>>) -> Self {
        Self::ingest_at(id, raw_text, Utc::now())
    }

    pub fn ingest_at(
        id: ContractId,
        raw_text: impl Into<Arc<str>>,
        ingested_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            raw_text: raw_text.into(),
            ingested_at,
        }
    }

    pub fn id(&self) -> &ContractId {
        &self.id
    }

    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    pub fn ingested_at(&self) -> DateTime<Utc> {
        self.ingested_at
    }
}

/// One addressable clause of a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clause {
    id: ClauseId,
    contract_id: ContractId,
    ordinal: usize,
    heading: Option<String>,
    text: String,
    span: TextSpan,
}

impl Clause {
    /// Build a clause from a span of the contract text. `text` is the span
    /// with surrounding whitespace trimmed.
    pub fn from_span(
        contract: &Contract,
        ordinal: usize,
        span: TextSpan,
        heading: Option<String>,
    ) -> Self {
        let text = contract.raw_text()[span.start..span.end].trim().to_string();
        Self {
            id: ClauseId::new(contract.id(), ordinal),
            contract_id: contract.id().clone(),
            ordinal,
            heading,
            text,
            span,
        }
    }

    pub fn id(&self) -> &ClauseId {
        &self.id
    }

    pub fn contract_id(&self) -> &ContractId {
        &self.contract_id
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// Structural marker that introduced the clause, e.g. `3.1` or `(a)`.
    pub fn heading(&self) -> Option<&str> {
        self.heading.as_deref()
    }

    /// Sortable form of the heading; see [`crate::numbering::sort_key`].
    pub fn heading_key(&self) -> Option<String> {
        self.heading.as_deref().map(crate::numbering::sort_key)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn span(&self) -> TextSpan {
        self.span
    }

    /// Hex SHA-256 of the clause text; keys the match cache.
    pub fn text_hash(&self) -> String {
        let digest = Sha256::digest(self.text.as_bytes());
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}
