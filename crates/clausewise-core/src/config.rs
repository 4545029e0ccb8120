//! Analysis configuration.
//!
//! Values come from, in increasing precedence: built-in defaults, an
//! optional JSON file, and `CLAUSEWISE_*` environment variables.

use std::path::Path;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::risk::RiskCategory;

/// Tunables for one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Matches below this confidence are discarded.
    pub confidence_floor: f32,
    pub max_matches_per_clause: usize,
    /// Only rules for these jurisdictions are considered; empty means all.
    pub jurisdictions: Vec<String>,
    /// Only rules in these categories are considered; empty means all.
    pub categories: Vec<String>,
    /// Date used to decide which rules are in force. Defaults to today.
    pub as_of: Option<NaiveDate>,
    pub rewrites_enabled: bool,
    /// Lowest risk category that gets a rewrite suggestion.
    pub rewrite_min_category: RiskCategory,
    /// Retries after the first rewrite attempt.
    pub rewrite_max_retries: u32,
    /// Base delay for exponential backoff between rewrite attempts.
    pub rewrite_backoff_ms: u64,
    /// Upper bound on outstanding language-model calls.
    pub max_concurrent_rewrites: usize,
    pub max_concurrent_clauses: usize,
    /// Per-clause budget covering matching, scoring and rewriting.
    pub clause_timeout_ms: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            confidence_floor: 0.3,
            max_matches_per_clause: 8,
            jurisdictions: Vec::new(),
            categories: Vec::new(),
            as_of: None,
            rewrites_enabled: true,
            rewrite_min_category: RiskCategory::Medium,
            rewrite_max_retries: 2,
            rewrite_backoff_ms: 500,
            max_concurrent_rewrites: 4,
            max_concurrent_clauses: 16,
            clause_timeout_ms: 30_000,
        }
    }
}

impl AnalysisConfig {
    /// Load from a JSON file; missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `CLAUSEWISE_*` overrides from the process environment.
    ///
    /// Variables:
    /// - `CLAUSEWISE_CONFIDENCE_FLOOR`
    /// - `CLAUSEWISE_MAX_MATCHES`
    /// - `CLAUSEWISE_JURISDICTIONS`, `CLAUSEWISE_CATEGORIES` (comma-separated)
    /// - `CLAUSEWISE_AS_OF` (YYYY-MM-DD)
    /// - `CLAUSEWISE_REWRITES_ENABLED`
    /// - `CLAUSEWISE_REWRITE_MIN_CATEGORY` (low, medium, high)
    /// - `CLAUSEWISE_REWRITE_RETRIES`
    /// - `CLAUSEWISE_REWRITE_BACKOFF_MS`
    /// - `CLAUSEWISE_MAX_REWRITES`
    /// - `CLAUSEWISE_MAX_CLAUSES`
    /// - `CLAUSEWISE_CLAUSE_TIMEOUT_MS`
    pub fn with_env(self) -> Result<Self, ConfigError> {
        self.with_vars(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn with_vars(
        mut self,
        lookup: impl Fn(&'static str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(v) = parsed(&lookup, "CLAUSEWISE_CONFIDENCE_FLOOR")? {
            self.confidence_floor = v;
        }
        if let Some(v) = parsed(&lookup, "CLAUSEWISE_MAX_MATCHES")? {
            self.max_matches_per_clause = v;
        }
        if let Some(v) = lookup("CLAUSEWISE_JURISDICTIONS") {
            self.jurisdictions = split_list(&v);
        }
        if let Some(v) = lookup("CLAUSEWISE_CATEGORIES") {
            self.categories = split_list(&v);
        }
        if let Some(v) = parsed(&lookup, "CLAUSEWISE_AS_OF")? {
            self.as_of = Some(v);
        }
        if let Some(v) = parsed(&lookup, "CLAUSEWISE_REWRITES_ENABLED")? {
            self.rewrites_enabled = v;
        }
        if let Some(v) = parsed(&lookup, "CLAUSEWISE_REWRITE_MIN_CATEGORY")? {
            self.rewrite_min_category = v;
        }
        if let Some(v) = parsed(&lookup, "CLAUSEWISE_REWRITE_RETRIES")? {
            self.rewrite_max_retries = v;
        }
        if let Some(v) = parsed(&lookup, "CLAUSEWISE_REWRITE_BACKOFF_MS")? {
            self.rewrite_backoff_ms = v;
        }
        if let Some(v) = parsed(&lookup, "CLAUSEWISE_MAX_REWRITES")? {
            self.max_concurrent_rewrites = v;
        }
        if let Some(v) = parsed(&lookup, "CLAUSEWISE_MAX_CLAUSES")? {
            self.max_concurrent_clauses = v;
        }
        if let Some(v) = parsed(&lookup, "CLAUSEWISE_CLAUSE_TIMEOUT_MS")? {
            self.clause_timeout_ms = v;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.confidence_floor) {
            return Err(ConfigError::Invalid(format!(
                "confidence_floor must be within [0, 1], got {}",
                self.confidence_floor
            )));
        }
        for (name, value) in [
            ("max_matches_per_clause", self.max_matches_per_clause),
            ("max_concurrent_rewrites", self.max_concurrent_rewrites),
            ("max_concurrent_clauses", self.max_concurrent_clauses),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be at least 1")));
            }
        }
        if self.clause_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "clause_timeout_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn clause_timeout(&self) -> Duration {
        Duration::from_millis(self.clause_timeout_ms)
    }

    pub fn rewrite_backoff(&self) -> Duration {
        Duration::from_millis(self.rewrite_backoff_ms)
    }

    /// The date rules must be in force on.
    pub fn analysis_date(&self) -> NaiveDate {
        self.as_of.unwrap_or_else(|| Utc::now().date_naive())
    }
}

fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&'static str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var, value }),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
