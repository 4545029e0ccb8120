use thiserror::Error;

/// Fatal to a run: no clauses means no per-clause analysis.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SegmentationError {
    #[error("contract {0} has no text to segment")]
    Empty(String),
}

/// Raised per clause by the rule matcher. "No match" is never an error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MatchingError {
    #[error("embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Input invariant violated when scoring a clause.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoringError {
    #[error("match against rule {rule_id} has confidence {confidence} outside [0, 1]")]
    ConfidenceOutOfRange { rule_id: String, confidence: f32 },

    #[error("match against rule {rule_id} has severity {severity} outside 1..=5")]
    SeverityOutOfRange { rule_id: String, severity: u8 },

    #[error("rule {0} matched more than once")]
    DuplicateRule(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorpusError {
    #[error("corpus version must not be empty")]
    EmptyVersion,

    #[error("rule at position {0} has an empty id")]
    EmptyRuleId(usize),

    #[error("rule {0} appears more than once")]
    DuplicateRule(String),

    #[error("rule {rule_id} has severity {severity} outside 1..=5")]
    InvalidSeverity { rule_id: String, severity: u8 },

    #[error("rule {0} has an effective window that ends before it starts")]
    InvertedWindow(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("parse config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("{0}")]
    Invalid(String),
}
