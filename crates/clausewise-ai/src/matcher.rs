//! Rule matcher: lexical candidate filter followed by semantic ranking.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use clausewise_core::{
    AnalysisConfig, Clause, ClauseMatch, CorpusVersion, MatchingError, RegulatoryRule, RuleCorpus,
};
use tokio::sync::OnceCell;
use tracing::{debug, trace};

use crate::lexical::{self, RuleFilter, RuleTerms};
use crate::service::EmbeddingService;
use crate::vector::cosine_sim;

/// Weight of embedding similarity in the final confidence.
pub const SEMANTIC_WEIGHT: f32 = 0.8;
/// Weight of keyword coverage in the final confidence.
pub const LEXICAL_WEIGHT: f32 = 0.2;

/// Number of rule texts sent per embedding call when indexing a corpus.
const EMBED_BATCH_SIZE: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct MatchOptions {
    pub confidence_floor: f32,
    pub max_matches: usize,
    pub filter: RuleFilter,
}

impl MatchOptions {
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self {
            confidence_floor: config.confidence_floor,
            max_matches: config.max_matches_per_clause,
            filter: RuleFilter::from_config(config),
        }
    }
}

/// Per-version data derived from a corpus. Terms are built eagerly; rule
/// vectors only once some clause actually needs them.
struct CorpusIndex {
    rules: Vec<RegulatoryRule>,
    terms: Vec<RuleTerms>,
    vectors: OnceCell<Vec<Vec<f32>>>,
}

impl CorpusIndex {
    fn build(corpus: &RuleCorpus) -> Self {
        Self {
            rules: corpus.rules().to_vec(),
            terms: corpus.rules().iter().map(RuleTerms::for_rule).collect(),
            vectors: OnceCell::new(),
        }
    }

    /// Whether the index was built from exactly these rules.
    fn covers(&self, corpus: &RuleCorpus) -> bool {
        self.rules.as_slice() == corpus.rules()
    }
}

/// Matches clauses against a rule corpus.
///
/// Safe to share between concurrent clause tasks. Rule embeddings are cached
/// per corpus version, so a run pays for them once.
pub struct RuleMatcher {
    embeddings: Arc<dyn EmbeddingService>,
    options: MatchOptions,
    indexes: Mutex<HashMap<CorpusVersion, Arc<CorpusIndex>>>,
}

impl RuleMatcher {
    pub fn new(embeddings: Arc<dyn EmbeddingService>, options: MatchOptions) -> Self {
        Self {
            embeddings,
            options,
            indexes: Mutex::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> &MatchOptions {
        &self.options
    }

    pub fn embedding_model(&self) -> &str {
        self.embeddings.model()
    }

    /// Rules relevant to `clause`, most confident first.
    ///
    /// An empty result means no rule applied; it is not an error.
    pub async fn match_clause(
        &self,
        clause: &Clause,
        corpus: &RuleCorpus,
    ) -> Result<Vec<ClauseMatch>, MatchingError> {
        let index = self.index(corpus);
        let candidates = lexical::candidates(
            clause.text(),
            corpus.rules(),
            &index.terms,
            &self.options.filter,
        );
        if candidates.is_empty() {
            trace!(clause = %clause.id(), "no lexical candidates");
            return Ok(Vec::new());
        }

        let rule_vectors = index
            .vectors
            .get_or_try_init(|| self.embed_rules(corpus.rules()))
            .await?;
        let clause_vector = self
            .embeddings
            .embed(clause.text())
            .await
            .map_err(|e| MatchingError::EmbeddingUnavailable(e.to_string()))?;

        let mut matches = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let rule = &corpus.rules()[candidate.index];
            let rule_vector = &rule_vectors[candidate.index];
            if rule_vector.len() != clause_vector.len() {
                return Err(MatchingError::DimensionMismatch {
                    expected: rule_vector.len(),
                    actual: clause_vector.len(),
                });
            }
            let similarity = cosine_sim(&clause_vector, rule_vector);
            let semantic = if similarity.is_finite() {
                similarity.clamp(0.0, 1.0)
            } else {
                0.0
            };
            let confidence = (SEMANTIC_WEIGHT * semantic
                + LEXICAL_WEIGHT * candidate.lexical_score)
                .clamp(0.0, 1.0);
            if confidence < self.options.confidence_floor {
                continue;
            }
            matches.push(ClauseMatch {
                rule_id: rule.id.clone(),
                regulation: rule.regulation.clone(),
                severity: rule.severity,
                confidence,
                matched_span: candidate.span,
            });
        }

        matches.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.rule_id.cmp(&b.rule_id))
        });
        matches.truncate(self.options.max_matches);
        debug!(clause = %clause.id(), matches = matches.len(), "clause matched");
        Ok(matches)
    }

    /// Drop cached indexes for every corpus version except `version`.
    pub fn retain_version(&self, version: &CorpusVersion) {
        self.indexes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|v, _| v == version);
    }

    fn index(&self, corpus: &RuleCorpus) -> Arc<CorpusIndex> {
        let mut indexes = self.indexes.lock().unwrap_or_else(PoisonError::into_inner);
        let index = indexes
            .entry(corpus.version().clone())
            .or_insert_with(|| Arc::new(CorpusIndex::build(corpus)));
        if !index.covers(corpus) {
            debug!(corpus_version = %corpus.version(), rules = corpus.len(), "corpus rules changed, reindexing");
            *index = Arc::new(CorpusIndex::build(corpus));
        }
        Arc::clone(index)
    }

    async fn embed_rules(&self, rules: &[RegulatoryRule]) -> Result<Vec<Vec<f32>>, MatchingError> {
        let texts: Vec<String> = rules.iter().map(rule_text).collect();
        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(EMBED_BATCH_SIZE) {
            let refs: Vec<&str> = chunk.iter().map(String::as_str).collect();
            let batch = self
                .embeddings
                .embed_batch(&refs)
                .await
                .map_err(|e| MatchingError::EmbeddingUnavailable(e.to_string()))?;
            if batch.len() != refs.len() {
                return Err(MatchingError::EmbeddingUnavailable(format!(
                    "expected {} vectors, got {}",
                    refs.len(),
                    batch.len()
                )));
            }
            vectors.extend(batch);
        }

        if let Some(first) = vectors.first() {
            let expected = first.len();
            if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
                return Err(MatchingError::DimensionMismatch {
                    expected,
                    actual: bad.len(),
                });
            }
        }
        debug!(rules = vectors.len(), model = self.embeddings.model(), "rule vectors computed");
        Ok(vectors)
    }
}

/// Text embedded for a rule: its description followed by its keywords.
fn rule_text(rule: &RegulatoryRule) -> String {
    if rule.keywords.is_empty() {
        rule.description.clone()
    } else {
        format!("{} {}", rule.description, rule.keywords.join(" "))
    }
}
