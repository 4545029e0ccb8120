//! Risk scoring for a clause from its rule matches.
//!
//! # Scoring
//!
//! Each match contributes `confidence × severity / 5`, a value in [0, 1].
//! The dominant match is the one with the largest contribution; on a tie the
//! more severe rule wins. The remaining matches can only add a bounded share
//! of the headroom left by the dominant one:
//!
//! ```text
//! score = d + (1 − d) × TAIL_WEIGHT × mean(other contributions)
//! ```
//!
//! so a single confident match against a severity-5 rule outweighs any
//! number of low-severity matches, and the score never leaves [0, 1].
//! Inputs are sorted before any arithmetic, which makes the result
//! independent of match order.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::contract::{ClauseId, TextSpan};
use crate::error::ScoringError;
use crate::rule::{RuleId, SEVERITY_MAX, SEVERITY_MIN};

/// Share of the remaining headroom the non-dominant matches can fill.
pub const TAIL_WEIGHT: f32 = 0.25;
pub const MEDIUM_THRESHOLD: f32 = 0.33;
pub const HIGH_THRESHOLD: f32 = 0.66;

/// A rule a clause was matched against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClauseMatch {
    pub rule_id: RuleId,
    pub regulation: String,
    pub severity: u8,
    /// Matcher confidence in [0, 1].
    pub confidence: f32,
    /// Where in the clause text the match was anchored, if anywhere.
    pub matched_span: Option<TextSpan>,
}

impl ClauseMatch {
    fn contribution(&self) -> f32 {
        self.confidence * f32::from(self.severity) / f32::from(SEVERITY_MAX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskCategory {
    Low,
    Medium,
    High,
}

impl RiskCategory {
    pub fn from_score(score: f32) -> Self {
        if score < MEDIUM_THRESHOLD {
            Self::Low
        } else if score < HIGH_THRESHOLD {
            Self::Medium
        } else {
            Self::High
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RiskCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown risk category: {other}")),
        }
    }
}

/// Derived risk for one clause. Never edited after scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub clause_id: ClauseId,
    pub risk_score: f32,
    pub risk_category: RiskCategory,
    /// Most severe first.
    pub contributing_matches: Vec<ClauseMatch>,
}

impl RiskAssessment {
    /// Distinct regulations cited by the contributing matches, in order.
    pub fn regulations(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.contributing_matches
            .iter()
            .map(|m| m.regulation.as_str())
            .filter(|r| seen.insert(*r))
            .collect()
    }
}

/// Score a clause from its matches.
pub fn score(clause_id: &ClauseId, matches: &[ClauseMatch]) -> Result<RiskAssessment, ScoringError> {
    validate(matches)?;

    let mut ordered = matches.to_vec();
    ordered.sort_by(by_severity);

    let risk_score = combine(&ordered);
    Ok(RiskAssessment {
        clause_id: clause_id.clone(),
        risk_score,
        risk_category: RiskCategory::from_score(risk_score),
        contributing_matches: ordered,
    })
}

fn validate(matches: &[ClauseMatch]) -> Result<(), ScoringError> {
    let mut seen = HashSet::with_capacity(matches.len());
    for m in matches {
        if !m.confidence.is_finite() || !(0.0..=1.0).contains(&m.confidence) {
            return Err(ScoringError::ConfidenceOutOfRange {
                rule_id: m.rule_id.to_string(),
                confidence: m.confidence,
            });
        }
        if !(SEVERITY_MIN..=SEVERITY_MAX).contains(&m.severity) {
            return Err(ScoringError::SeverityOutOfRange {
                rule_id: m.rule_id.to_string(),
                severity: m.severity,
            });
        }
        if !seen.insert(&m.rule_id) {
            return Err(ScoringError::DuplicateRule(m.rule_id.to_string()));
        }
    }
    Ok(())
}

/// Severity desc, then confidence desc, then rule id.
fn by_severity(a: &ClauseMatch, b: &ClauseMatch) -> Ordering {
    b.severity
        .cmp(&a.severity)
        .then_with(|| b.confidence.total_cmp(&a.confidence))
        .then_with(|| a.rule_id.cmp(&b.rule_id))
}

/// `ordered` must already be sorted with [`by_severity`].
fn combine(ordered: &[ClauseMatch]) -> f32 {
    let Some(dominant_idx) = dominant(ordered) else {
        return 0.0;
    };
    let d = ordered[dominant_idx].contribution();
    if ordered.len() == 1 {
        return d;
    }

    let tail_sum: f32 = ordered
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != dominant_idx)
        .map(|(_, m)| m.contribution())
        .sum();
    let tail_mean = tail_sum / (ordered.len() - 1) as f32;

    (d + (1.0 - d) * TAIL_WEIGHT * tail_mean).clamp(0.0, 1.0)
}

/// Index of the largest contribution; the first (most severe) wins ties.
fn dominant(ordered: &[ClauseMatch]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, m) in ordered.iter().enumerate() {
        let c = m.contribution();
        if best.is_none_or(|(_, b)| c > b) {
            best = Some((i, c));
        }
    }
    best.map(|(i, _)| i)
}
