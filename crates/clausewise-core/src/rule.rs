//! Regulatory rules and versioned rule corpora.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::CorpusError;

pub const SEVERITY_MIN: u8 = 1;
pub const SEVERITY_MAX: u8 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(String);

impl RuleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Corpus version name. Orders by release: digit runs compare by value, so
/// `2025.10` follows `2025.9` and `v10` follows `v2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorpusVersion(String);

impl CorpusVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorpusVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Ord for CorpusVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        release_parts(&self.0)
            .cmp(release_parts(&other.0))
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for CorpusVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(PartialEq, Eq)]
enum Part<'a> {
    /// Digits without leading zeros.
    Num(&'a str),
    Text(&'a str),
}

impl Ord for Part<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Part::Num(a), Part::Num(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
            (Part::Text(a), Part::Text(b)) => a.cmp(b),
            (Part::Num(_), Part::Text(_)) => Ordering::Less,
            (Part::Text(_), Part::Num(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Part<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Digit and letter runs of a version name; separators are dropped.
fn release_parts(version: &str) -> impl Iterator<Item = Part<'_>> {
    let mut rest = version;
    std::iter::from_fn(move || {
        rest = rest.trim_start_matches(|c: char| !c.is_alphanumeric());
        let digits = rest.chars().next()?.is_ascii_digit();
        let end = rest
            .find(|c: char| !c.is_alphanumeric() || c.is_ascii_digit() != digits)
            .unwrap_or(rest.len());
        let (run, tail) = rest.split_at(end);
        rest = tail;
        Some(if digits {
            Part::Num(run.trim_start_matches('0'))
        } else {
            Part::Text(run)
        })
    })
}

/// A single regulatory requirement a clause can be checked against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegulatoryRule {
    pub id: RuleId,
    /// Source regulation, e.g. "GDPR" or "HIPAA".
    pub regulation: String,
    pub jurisdiction: String,
    pub category: String,
    /// Ordinal severity, 1 (minor) to 5 (critical).
    pub severity: u8,
    pub description: String,
    /// Terms that make a clause a candidate for this rule.
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub effective_from: Option<NaiveDate>,
    #[serde(default)]
    pub effective_to: Option<NaiveDate>,
}

impl RegulatoryRule {
    /// Whether the rule is in force on `date`. Both bounds are inclusive;
    /// a missing bound is open.
    pub fn is_effective_on(&self, date: NaiveDate) -> bool {
        self.effective_from.is_none_or(|from| from <= date)
            && self.effective_to.is_none_or(|to| date <= to)
    }
}

/// An immutable, validated snapshot of the rule set at one version.
///
/// A run pins one snapshot (behind an `Arc`) for its whole lifetime; newer
/// versions are published as new snapshots, never by editing this one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleCorpus {
    version: CorpusVersion,
    rules: Vec<RegulatoryRule>,
}

impl RuleCorpus {
    pub fn new(version: CorpusVersion, rules: Vec<RegulatoryRule>) -> Result<Self, CorpusError> {
        if version.as_str().trim().is_empty() {
            return Err(CorpusError::EmptyVersion);
        }

        let mut seen = HashSet::with_capacity(rules.len());
        for (i, rule) in rules.iter().enumerate() {
            if rule.id.as_str().trim().is_empty() {
                return Err(CorpusError::EmptyRuleId(i));
            }
            if !seen.insert(&rule.id) {
                return Err(CorpusError::DuplicateRule(rule.id.to_string()));
            }
            if !(SEVERITY_MIN..=SEVERITY_MAX).contains(&rule.severity) {
                return Err(CorpusError::InvalidSeverity {
                    rule_id: rule.id.to_string(),
                    severity: rule.severity,
                });
            }
            if let (Some(from), Some(to)) = (rule.effective_from, rule.effective_to)
                && to < from
            {
                return Err(CorpusError::InvertedWindow(rule.id.to_string()));
            }
        }

        Ok(Self { version, rules })
    }

    pub fn version(&self) -> &CorpusVersion {
        &self.version
    }

    pub fn rules(&self) -> &[RegulatoryRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, id: &RuleId) -> Option<&RegulatoryRule> {
        self.rules.iter().find(|r| &r.id == id)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::rule;
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn effective_window_is_inclusive() {
        let mut r = rule("r1", 3);
        r.effective_from = Some(date("2024-01-01"));
        r.effective_to = Some(date("2024-12-31"));
        assert!(!r.is_effective_on(date("2023-12-31")));
        assert!(r.is_effective_on(date("2024-01-01")));
        assert!(r.is_effective_on(date("2024-12-31")));
        assert!(!r.is_effective_on(date("2025-01-01")));
    }

    #[test]
    fn versions_order_by_release() {
        let mut versions: Vec<CorpusVersion> = ["2025.10", "2025.9", "2024.12", "2025.1"]
            .into_iter()
            .map(CorpusVersion::new)
            .collect();
        versions.sort();
        let names: Vec<&str> = versions.iter().map(CorpusVersion::as_str).collect();
        assert_eq!(names, vec!["2024.12", "2025.1", "2025.9", "2025.10"]);

        assert!(CorpusVersion::new("v2") < CorpusVersion::new("v10"));
        assert!(CorpusVersion::new("a") < CorpusVersion::new("b"));
        assert!(CorpusVersion::new("2025.1") < CorpusVersion::new("2025.1-rc1"));
        // Same value, different spelling: still a strict order.
        assert_ne!(
            CorpusVersion::new("1.01").cmp(&CorpusVersion::new("1.1")),
            Ordering::Equal
        );
    }

    #[test]
    fn open_window_is_always_effective() {
        assert!(rule("r1", 3).is_effective_on(date("1990-06-01")));
    }

    #[test]
    fn corpus_rejects_duplicates() {
        let err = RuleCorpus::new(CorpusVersion::new("v1"), vec![rule("a", 1), rule("a", 2)]);
        assert_eq!(err, Err(CorpusError::DuplicateRule("a".into())));
    }

    #[test]
    fn corpus_rejects_out_of_scale_severity() {
        let err = RuleCorpus::new(CorpusVersion::new("v1"), vec![rule("a", 0)]);
        assert!(matches!(err, Err(CorpusError::InvalidSeverity { severity: 0, .. })));
        let err = RuleCorpus::new(CorpusVersion::new("v1"), vec![rule("a", 6)]);
        assert!(matches!(err, Err(CorpusError::InvalidSeverity { severity: 6, .. })));
    }

    #[test]
    fn corpus_rejects_inverted_window() {
        let mut r = rule("a", 2);
        r.effective_from = Some(date("2025-01-01"));
        r.effective_to = Some(date("2024-01-01"));
        let err = RuleCorpus::new(CorpusVersion::new("v1"), vec![r]);
        assert_eq!(err, Err(CorpusError::InvertedWindow("a".into())));
    }

    #[test]
    fn corpus_rejects_blank_version() {
        let err = RuleCorpus::new(CorpusVersion::new("  "), vec![]);
        assert_eq!(err, Err(CorpusError::EmptyVersion));
    }

    #[test]
    fn rule_json_defaults_optional_fields() {
        let json = r#"{
            "id": "gdpr-5-1-e",
            "regulation": "GDPR",
            "jurisdiction": "EU",
            "category": "data_retention",
            "severity": 4,
            "description": "Personal data kept no longer than necessary."
        }"#;
        let r: RegulatoryRule = serde_json::from_str(json).unwrap();
        assert!(r.keywords.is_empty());
        assert!(r.effective_from.is_none());
        assert_eq!(r.severity, 4);
    }

    #[test]
    fn get_by_id() {
        let corpus =
            RuleCorpus::new(CorpusVersion::new("v1"), vec![rule("a", 1), rule("b", 5)]).unwrap();
        assert_eq!(corpus.get(&RuleId::new("b")).map(|r| r.severity), Some(5));
        assert!(corpus.get(&RuleId::new("z")).is_none());
    }
}
