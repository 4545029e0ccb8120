//! Lexical candidate filter.
//!
//! Cheap first pass of rule matching: a rule is only worth embedding against
//! a clause if it is in scope (jurisdiction, category, effective date) and
//! shares at least one significant term with it.

use std::collections::HashSet;

use chrono::NaiveDate;
use clausewise_core::{AnalysisConfig, RegulatoryRule, TextSpan};

const STOPWORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "agreement", "all", "also", "and", "any",
    "are", "been", "before", "being", "between", "both", "but", "can", "could", "does", "each",
    "either", "for", "from", "had", "has", "have", "hereby", "herein", "hereof", "hereto",
    "hereunder", "its", "may", "more", "most", "must", "not", "only", "other", "our", "out",
    "over", "parties", "party", "provided", "same", "shall", "should", "such", "than", "that",
    "the", "their", "them", "then", "there", "thereof", "these", "they", "this", "those",
    "through", "under", "until", "upon", "was", "were", "what", "when", "where", "which",
    "while", "who", "will", "with", "within", "without", "would", "you", "your",
];

/// Longest first; the first suffix that leaves a stem of at least
/// `MIN_STEM` characters is removed.
const SUFFIXES: &[&str] = &[
    "ations", "ation", "ating", "ated", "ates", "ate", "ments", "ment", "ings", "ing", "ies",
    "ed", "s",
];

const MIN_STEM: usize = 4;
const MIN_TERM: usize = 3;

/// Split text into alphanumeric words with their byte offsets.
pub fn words(text: &str) -> impl Iterator<Item = (usize, &str)> {
    let mut start = None;
    text.char_indices()
        .chain(std::iter::once((text.len(), ' ')))
        .filter_map(move |(i, c)| {
            if c.is_alphanumeric() {
                start.get_or_insert(i);
                None
            } else {
                start.take().map(|s| (s, &text[s..i]))
            }
        })
}

/// Normalise a single word into a comparable term, or `None` if it carries
/// no signal.
pub fn term(word: &str) -> Option<String> {
    let lower = word.to_lowercase();
    let is_number = lower.chars().all(|c| c.is_ascii_digit());
    if !is_number && lower.chars().count() < MIN_TERM {
        return None;
    }
    if STOPWORDS.binary_search(&lower.as_str()).is_ok() {
        return None;
    }
    Some(stem(lower))
}

/// Significant terms of `text`, in order of appearance (duplicates kept).
pub fn terms(text: &str) -> Vec<String> {
    words(text).filter_map(|(_, w)| term(w)).collect()
}

fn stem(word: String) -> String {
    for suffix in SUFFIXES {
        if let Some(base) = word.strip_suffix(suffix) {
            if *suffix == "s" && base.ends_with('s') {
                break;
            }
            if base.chars().count() >= MIN_STEM {
                return if *suffix == "ies" {
                    format!("{base}y")
                } else {
                    base.to_string()
                };
            }
        }
    }
    word
}

/// Pre-computed term sets for one rule.
#[derive(Debug, Clone, Default)]
pub struct RuleTerms {
    /// Terms from the rule's keyword list, or from its description when it
    /// has no keywords. Lexical score is measured against these.
    pub keywords: HashSet<String>,
    /// Keyword and description terms; any overlap makes a candidate.
    pub all: HashSet<String>,
}

impl RuleTerms {
    pub fn for_rule(rule: &RegulatoryRule) -> Self {
        let description: HashSet<String> = terms(&rule.description).into_iter().collect();
        let listed: HashSet<String> = rule.keywords.iter().flat_map(|k| terms(k)).collect();
        let keywords = if listed.is_empty() {
            description.clone()
        } else {
            listed
        };
        let all = keywords.union(&description).cloned().collect();
        Self { keywords, all }
    }
}

/// Scope restrictions applied before any term comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleFilter {
    pub jurisdictions: Vec<String>,
    pub categories: Vec<String>,
    pub as_of: NaiveDate,
}

impl RuleFilter {
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self {
            jurisdictions: config.jurisdictions.clone(),
            categories: config.categories.clone(),
            as_of: config.analysis_date(),
        }
    }

    pub fn admits(&self, rule: &RegulatoryRule) -> bool {
        let in_list = |list: &[String], value: &str| {
            list.is_empty() || list.iter().any(|v| v.eq_ignore_ascii_case(value))
        };
        in_list(&self.jurisdictions, &rule.jurisdiction)
            && in_list(&self.categories, &rule.category)
            && rule.is_effective_on(self.as_of)
    }
}

/// A rule that survived the lexical pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Index into the corpus rule list.
    pub index: usize,
    /// Fraction of the rule's keyword terms present in the clause.
    pub lexical_score: f32,
    /// First word in the clause that matched one of the rule's terms.
    pub span: Option<TextSpan>,
}

/// Rules from `rules` that are in scope and share a term with `text`.
///
/// `rule_terms` must be parallel to `rules`.
pub fn candidates(
    text: &str,
    rules: &[RegulatoryRule],
    rule_terms: &[RuleTerms],
    filter: &RuleFilter,
) -> Vec<Candidate> {
    let clause_words: Vec<(usize, &str, String)> = words(text)
        .filter_map(|(offset, w)| term(w).map(|t| (offset, w, t)))
        .collect();
    if clause_words.is_empty() {
        return Vec::new();
    }
    let clause_terms: HashSet<&str> = clause_words.iter().map(|(_, _, t)| t.as_str()).collect();

    rules
        .iter()
        .zip(rule_terms)
        .enumerate()
        .filter(|(_, (rule, _))| filter.admits(rule))
        .filter_map(|(index, (_, rt))| {
            let (offset, word, _) = clause_words.iter().find(|(_, _, t)| rt.all.contains(t))?;
            let hits = rt
                .keywords
                .iter()
                .filter(|k| clause_terms.contains(k.as_str()))
                .count();
            let lexical_score = if rt.keywords.is_empty() {
                0.0
            } else {
                hits as f32 / rt.keywords.len() as f32
            };
            Some(Candidate {
                index,
                lexical_score,
                span: Some(TextSpan::new(*offset, offset + word.len())),
            })
        })
        .collect()
}
