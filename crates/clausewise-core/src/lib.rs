//! Core types for contract compliance analysis: the data model, clause
//! segmentation, risk scoring, and analysis configuration.

pub mod config;
pub mod contract;
pub mod error;
pub mod numbering;
pub mod report;
pub mod risk;
pub mod rule;
pub mod schema;
pub mod segment;

pub use config::AnalysisConfig;
pub use contract::{Clause, ClauseId, Contract, ContractId, TextSpan};
pub use error::{ConfigError, CorpusError, MatchingError, ScoringError, SegmentationError};
pub use report::{
    ClauseFailure, ClauseOutcome, ClauseReport, ComplianceReport, FailureKind, ReportSummary,
    RewriteOutcome, RewriteSuggestion, RunStatus, Verdict,
};
pub use risk::{ClauseMatch, RiskAssessment, RiskCategory, score};
pub use rule::{CorpusVersion, RegulatoryRule, RuleCorpus, RuleId};
pub use schema::rules;
pub use segment::segment;
