//! Per-clause outcomes and the compliance report that aggregates them.
//!
//! A [`ComplianceReport`] is built once from the full set of clause results
//! and has no mutating API. Re-running analysis produces a new report.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::contract::{Clause, ClauseId, ContractId};
use crate::risk::{RiskAssessment, RiskCategory};
use crate::rule::{CorpusVersion, RuleId};

/// Suggested replacement text for a risky clause. Stands beside the clause;
/// it is never written back into the contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewriteSuggestion {
    pub clause_id: ClauseId,
    pub suggested_text: String,
    pub rationale: String,
    pub model_version: String,
    pub addressed_rules: Vec<RuleId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RewriteOutcome {
    /// Risk below the rewrite threshold.
    NotRequired,
    /// Rewrites switched off for this run.
    Disabled,
    Suggested { suggestion: RewriteSuggestion },
    /// The language model failed on every attempt (`rewrite_unavailable`).
    Unavailable { attempts: u32, error: String },
}

/// What happened to one clause during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ClauseOutcome {
    Assessed {
        assessment: RiskAssessment,
        rewrite: RewriteOutcome,
    },
    MatchingFailed {
        error: String,
    },
    ScoringFailed {
        error: String,
    },
    TimedOut {
        after_ms: u64,
    },
    /// The run was cancelled before this clause started.
    Cancelled,
    /// The clause unit died without producing a result.
    Aborted {
        error: String,
    },
}

impl ClauseOutcome {
    pub fn assessment(&self) -> Option<&RiskAssessment> {
        match self {
            Self::Assessed { assessment, .. } => Some(assessment),
            _ => None,
        }
    }

    pub fn rewrite(&self) -> Option<&RewriteOutcome> {
        match self {
            Self::Assessed { rewrite, .. } => Some(rewrite),
            _ => None,
        }
    }

    /// Failure entry for the report, if this outcome is one.
    fn failure(&self) -> Option<(FailureKind, String)> {
        match self {
            Self::Assessed {
                rewrite: RewriteOutcome::Unavailable { attempts, error },
                ..
            } => Some((
                FailureKind::RewriteUnavailable,
                format!("rewrite failed after {attempts} attempts: {error}"),
            )),
            Self::Assessed { .. } => None,
            Self::MatchingFailed { error } => Some((FailureKind::Matching, error.clone())),
            Self::ScoringFailed { error } => Some((FailureKind::Scoring, error.clone())),
            Self::TimedOut { after_ms } => Some((
                FailureKind::Timeout,
                format!("clause analysis exceeded {after_ms} ms"),
            )),
            Self::Cancelled => Some((FailureKind::Cancelled, "run cancelled".to_string())),
            Self::Aborted { error } => Some((FailureKind::Aborted, error.clone())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClauseReport {
    pub clause: Clause,
    pub outcome: ClauseOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Matching,
    Scoring,
    Timeout,
    Cancelled,
    Aborted,
    RewriteUnavailable,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Matching => "matching",
            Self::Scoring => "scoring",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Aborted => "aborted",
            Self::RewriteUnavailable => "rewrite_unavailable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClauseFailure {
    pub clause_id: ClauseId,
    pub ordinal: usize,
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Complete,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall recommendation for the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// At least one high-risk clause.
    Reject,
    /// More than half of the assessed clauses are medium risk.
    ReviewRecommended,
    Acceptable,
    /// Nothing was assessed.
    Inconclusive,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reject => "reject",
            Self::ReviewRecommended => "review_recommended",
            Self::Acceptable => "acceptable",
            Self::Inconclusive => "inconclusive",
        }
    }
}

/// Headline figures for a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_clauses: usize,
    pub assessed: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub failed: usize,
    pub rewrites_suggested: usize,
    pub rewrites_unavailable: usize,
    /// Low-risk clauses as a percentage of assessed clauses.
    pub compliance_rate: f32,
    pub average_risk: f32,
    pub verdict: Verdict,
    /// Regulation → number of medium/high clauses citing it.
    pub flagged_regulations: BTreeMap<String, usize>,
}

impl ReportSummary {
    fn from_results(total_clauses: usize, results: &[ClauseReport]) -> Self {
        let mut summary = Self {
            total_clauses,
            assessed: 0,
            high: 0,
            medium: 0,
            low: 0,
            failed: 0,
            rewrites_suggested: 0,
            rewrites_unavailable: 0,
            compliance_rate: 0.0,
            average_risk: 0.0,
            verdict: Verdict::Inconclusive,
            flagged_regulations: BTreeMap::new(),
        };
        let mut risk_sum = 0.0f32;

        for result in results {
            let ClauseOutcome::Assessed { assessment, rewrite } = &result.outcome else {
                summary.failed += 1;
                continue;
            };
            summary.assessed += 1;
            risk_sum += assessment.risk_score;
            match assessment.risk_category {
                RiskCategory::High => summary.high += 1,
                RiskCategory::Medium => summary.medium += 1,
                RiskCategory::Low => summary.low += 1,
            }
            if assessment.risk_category >= RiskCategory::Medium {
                for regulation in assessment.regulations() {
                    *summary
                        .flagged_regulations
                        .entry(regulation.to_string())
                        .or_insert(0) += 1;
                }
            }
            match rewrite {
                RewriteOutcome::Suggested { .. } => summary.rewrites_suggested += 1,
                RewriteOutcome::Unavailable { .. } => summary.rewrites_unavailable += 1,
                RewriteOutcome::NotRequired | RewriteOutcome::Disabled => {}
            }
        }

        if summary.assessed > 0 {
            let assessed = summary.assessed as f32;
            summary.compliance_rate = summary.low as f32 / assessed * 100.0;
            summary.average_risk = risk_sum / assessed;
            summary.verdict = if summary.high > 0 {
                Verdict::Reject
            } else if summary.medium as f32 > assessed * 0.5 {
                Verdict::ReviewRecommended
            } else {
                Verdict::Acceptable
            };
        }
        summary
    }
}

/// The immutable result of one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceReport {
    report_id: Uuid,
    contract_id: ContractId,
    corpus_version: CorpusVersion,
    generated_at: DateTime<Utc>,
    run_status: RunStatus,
    results: Vec<ClauseReport>,
    failures: Vec<ClauseFailure>,
    fatal_error: Option<String>,
    summary: ReportSummary,
}

impl ComplianceReport {
    /// Build a report from every clause's result, already in ordinal order.
    ///
    /// A run in which no clause was assessed is `failed` and keeps only the
    /// failure list.
    pub fn from_results(
        contract_id: ContractId,
        corpus_version: CorpusVersion,
        results: Vec<ClauseReport>,
    ) -> Self {
        let total = results.len();
        let failures: Vec<ClauseFailure> = results
            .iter()
            .filter_map(|r| {
                r.outcome.failure().map(|(kind, message)| ClauseFailure {
                    clause_id: r.clause.id().clone(),
                    ordinal: r.clause.ordinal(),
                    kind,
                    message,
                })
            })
            .collect();
        let summary = ReportSummary::from_results(total, &results);

        let (run_status, results, fatal_error) = if summary.assessed == 0 {
            (
                RunStatus::Failed,
                Vec::new(),
                Some("no clause produced a risk assessment".to_string()),
            )
        } else if failures.is_empty() {
            (RunStatus::Complete, results, None)
        } else {
            (RunStatus::Partial, results, None)
        };

        Self {
            report_id: Uuid::new_v4(),
            contract_id,
            corpus_version,
            generated_at: Utc::now(),
            run_status,
            results,
            failures,
            fatal_error,
            summary,
        }
    }

    /// A report for a run that could not analyse any clause at all, e.g.
    /// because segmentation failed.
    pub fn failed(
        contract_id: ContractId,
        corpus_version: CorpusVersion,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            report_id: Uuid::new_v4(),
            contract_id,
            corpus_version,
            generated_at: Utc::now(),
            run_status: RunStatus::Failed,
            results: Vec::new(),
            failures: Vec::new(),
            fatal_error: Some(reason.into()),
            summary: ReportSummary::from_results(0, &[]),
        }
    }

    pub fn report_id(&self) -> Uuid {
        self.report_id
    }

    pub fn contract_id(&self) -> &ContractId {
        &self.contract_id
    }

    pub fn corpus_version(&self) -> &CorpusVersion {
        &self.corpus_version
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn run_status(&self) -> RunStatus {
        self.run_status
    }

    /// Per-clause results in ordinal order. Empty for a failed run.
    pub fn results(&self) -> &[ClauseReport] {
        &self.results
    }

    pub fn failures(&self) -> &[ClauseFailure] {
        &self.failures
    }

    pub fn fatal_error(&self) -> Option<&str> {
        self.fatal_error.as_deref()
    }

    pub fn summary(&self) -> &ReportSummary {
        &self.summary
    }
}
