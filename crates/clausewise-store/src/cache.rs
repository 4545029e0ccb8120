//! Match cache keyed by clause text and corpus version.
//!
//! Identical clause text matched against the same corpus version yields the
//! same matches, so results can be shared across clauses and runs. Entries
//! are immutable: the first write for a key wins. A cache is only valid for
//! one matcher configuration.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use clausewise_core::{Clause, ClauseMatch, CorpusVersion};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Hex SHA-256 of the clause text.
    pub text_hash: String,
    pub version: CorpusVersion,
}

impl CacheKey {
    pub fn for_clause(clause: &Clause, version: &CorpusVersion) -> Self {
        Self {
            text_hash: clause.text_hash(),
            version: version.clone(),
        }
    }
}

#[derive(Default)]
pub struct MatchCache {
    entries: RwLock<HashMap<CacheKey, Arc<[ClauseMatch]>>>,
}

impl MatchCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<[ClauseMatch]>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Store `matches` unless the key is already present. Returns the entry
    /// that is in the cache afterwards.
    pub fn insert(&self, key: CacheKey, matches: Vec<ClauseMatch>) -> Arc<[ClauseMatch]> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(entries.entry(key).or_insert_with(|| matches.into()))
    }

    /// Evict every entry not belonging to `version`.
    pub fn retain_version(&self, version: &CorpusVersion) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|k, _| &k.version == version);
        debug!(version = %version, evicted = before - entries.len(), "match cache rotated");
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
