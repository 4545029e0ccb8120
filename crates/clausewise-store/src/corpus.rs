//! Rule corpus providers.
//!
//! A provider hands out immutable `Arc<RuleCorpus>` snapshots. Publishing a
//! new version rotates the current pointer; snapshots already handed out are
//! never touched, so a run keeps the version it pinned.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use clausewise_core::{CorpusVersion, RegulatoryRule, RuleCorpus};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::StoreError;

#[async_trait]
pub trait RuleCorpusProvider: Send + Sync {
    /// Version new runs should pin by default.
    async fn current_version(&self) -> Result<CorpusVersion, StoreError>;

    /// Snapshot at `version`, or at the current version when `None`.
    async fn get_corpus(
        &self,
        version: Option<&CorpusVersion>,
    ) -> Result<Arc<RuleCorpus>, StoreError>;
}

// ── In-memory ──

#[derive(Default)]
struct Snapshots {
    current: Option<CorpusVersion>,
    published: HashMap<CorpusVersion, Arc<RuleCorpus>>,
}

/// Provider holding published snapshots in memory.
#[derive(Default)]
pub struct InMemoryCorpusProvider {
    state: RwLock<Snapshots>,
}

impl InMemoryCorpusProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_corpus(corpus: RuleCorpus) -> Result<Self, StoreError> {
        let provider = Self::new();
        provider.publish(corpus)?;
        Ok(provider)
    }

    /// Publish `corpus` and make it current. Re-publishing identical rules
    /// under an existing version is a no-op; different rules are rejected.
    pub fn publish(&self, corpus: RuleCorpus) -> Result<Arc<RuleCorpus>, StoreError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let version = corpus.version().clone();
        let snapshot = match state.published.get(&version).cloned() {
            Some(existing) if *existing == corpus => existing,
            Some(_) => return Err(StoreError::VersionConflict(version.to_string())),
            None => {
                let snapshot = Arc::new(corpus);
                state.published.insert(version.clone(), Arc::clone(&snapshot));
                snapshot
            }
        };
        info!(version = %version, rules = snapshot.len(), "corpus published");
        state.current = Some(version);
        Ok(snapshot)
    }

    /// Forget a non-current version. Runs holding the snapshot keep it.
    pub fn retire(&self, version: &CorpusVersion) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.current.as_ref() == Some(version) {
            return false;
        }
        state.published.remove(version).is_some()
    }

    pub fn versions(&self) -> Vec<CorpusVersion> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut versions: Vec<_> = state.published.keys().cloned().collect();
        versions.sort();
        versions
    }
}

#[async_trait]
impl RuleCorpusProvider for InMemoryCorpusProvider {
    async fn current_version(&self) -> Result<CorpusVersion, StoreError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.current.clone().ok_or(StoreError::NoCorpus)
    }

    async fn get_corpus(
        &self,
        version: Option<&CorpusVersion>,
    ) -> Result<Arc<RuleCorpus>, StoreError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let version = match version {
            Some(v) => v,
            None => state.current.as_ref().ok_or(StoreError::NoCorpus)?,
        };
        state
            .published
            .get(version)
            .cloned()
            .ok_or_else(|| StoreError::VersionNotFound(version.to_string()))
    }
}

// ── JSON directory ──

/// Name of the pointer file holding the current version.
const CURRENT_FILE: &str = "CURRENT";

#[derive(Deserialize)]
struct CorpusFile {
    version: CorpusVersion,
    rules: Vec<RegulatoryRule>,
}

/// Provider backed by a directory of `<version>.json` files.
///
/// The current version is named by a `CURRENT` file; without one, the
/// latest version in release order wins. Loaded snapshots are kept so every caller
/// pinning a version shares one `Arc`.
pub struct JsonCorpusProvider {
    dir: PathBuf,
    loaded: Mutex<HashMap<CorpusVersion, Arc<RuleCorpus>>>,
}

impl JsonCorpusProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            loaded: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Published versions, oldest release first.
    pub async fn versions(&self) -> Result<Vec<CorpusVersion>, StoreError> {
        let mut versions = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json")
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                versions.push(CorpusVersion::new(stem));
            }
        }
        versions.sort();
        Ok(versions)
    }

    /// Write `corpus` as a new version file and make it current. An existing
    /// version file is never overwritten.
    pub async fn publish(&self, corpus: &RuleCorpus) -> Result<PathBuf, StoreError> {
        let path = self.version_path(corpus.version())?;
        let json = serde_json::to_vec_pretty(corpus)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StoreError::AlreadyExists(path));
            }
            Err(e) => return Err(e.into()),
        };
        tokio::io::AsyncWriteExt::write_all(&mut file, &json).await?;
        tokio::io::AsyncWriteExt::flush(&mut file).await?;
        self.set_current(corpus.version()).await?;
        info!(version = %corpus.version(), path = %path.display(), "corpus published");
        Ok(path)
    }

    /// Point `CURRENT` at an already published version.
    pub async fn set_current(&self, version: &CorpusVersion) -> Result<(), StoreError> {
        let path = self.version_path(version)?;
        if !tokio::fs::try_exists(&path).await? {
            return Err(StoreError::VersionNotFound(version.to_string()));
        }
        let tmp = self.dir.join(format!("{CURRENT_FILE}.tmp"));
        tokio::fs::write(&tmp, version.as_str()).await?;
        tokio::fs::rename(&tmp, self.dir.join(CURRENT_FILE)).await?;
        Ok(())
    }

    fn version_path(&self, version: &CorpusVersion) -> Result<PathBuf, StoreError> {
        let name = version.as_str();
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(StoreError::VersionNotFound(name.to_string()));
        }
        Ok(self.dir.join(format!("{name}.json")))
    }

    async fn load(&self, version: &CorpusVersion) -> Result<Arc<RuleCorpus>, StoreError> {
        let cached = self
            .loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(version)
            .cloned();
        if let Some(hit) = cached {
            return Ok(hit);
        }

        let path = self.version_path(version)?;
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::VersionNotFound(version.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let file: CorpusFile = serde_json::from_slice(&raw)?;
        if &file.version != version {
            return Err(StoreError::Other(format!(
                "{} declares version {}",
                path.display(),
                file.version
            )));
        }
        let corpus = Arc::new(RuleCorpus::new(file.version, file.rules)?);
        debug!(version = %version, rules = corpus.len(), "corpus loaded");

        let mut loaded = self.loaded.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(Arc::clone(loaded.entry(version.clone()).or_insert(corpus)))
    }
}

#[async_trait]
impl RuleCorpusProvider for JsonCorpusProvider {
    async fn current_version(&self) -> Result<CorpusVersion, StoreError> {
        match tokio::fs::read_to_string(self.dir.join(CURRENT_FILE)).await {
            Ok(raw) if !raw.trim().is_empty() => return Ok(CorpusVersion::new(raw.trim())),
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.versions()
            .await?
            .pop()
            .ok_or(StoreError::NoCorpus)
    }

    async fn get_corpus(
        &self,
        version: Option<&CorpusVersion>,
    ) -> Result<Arc<RuleCorpus>, StoreError> {
        match version {
            Some(v) => self.load(v).await,
            None => {
                let current = self.current_version().await?;
                self.load(&current).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clausewise_core::RuleId;
    use tempfile::TempDir;

    fn rule(id: &str) -> RegulatoryRule {
        RegulatoryRule {
            id: RuleId::new(id),
            regulation: "GDPR".into(),
            jurisdiction: "EU".into(),
            category: "data_protection".into(),
            severity: 4,
            description: format!("requirement {id}"),
            keywords: vec!["personal data".into()],
            effective_from: None,
            effective_to: None,
        }
    }

    fn corpus(version: &str, ids: &[&str]) -> RuleCorpus {
        RuleCorpus::new(
            CorpusVersion::new(version),
            ids.iter().map(|id| rule(id)).collect(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn empty_provider_has_no_corpus() {
        let p = InMemoryCorpusProvider::new();
        assert!(matches!(p.current_version().await, Err(StoreError::NoCorpus)));
        assert!(matches!(p.get_corpus(None).await, Err(StoreError::NoCorpus)));
    }

    #[tokio::test]
    async fn rotation_keeps_pinned_snapshot() {
        let p = InMemoryCorpusProvider::with_corpus(corpus("v1", &["R1"])).unwrap();
        let pinned = p.get_corpus(None).await.unwrap();

        p.publish(corpus("v2", &["R1", "R2"])).unwrap();
        assert_eq!(p.current_version().await.unwrap().as_str(), "v2");
        assert_eq!(pinned.version().as_str(), "v1");
        assert_eq!(pinned.len(), 1);

        let again = p.get_corpus(Some(&CorpusVersion::new("v1"))).await.unwrap();
        assert!(Arc::ptr_eq(&pinned, &again));
    }

    #[tokio::test]
    async fn republish_conflict_is_rejected() {
        let p = InMemoryCorpusProvider::with_corpus(corpus("v1", &["R1"])).unwrap();
        assert!(p.publish(corpus("v1", &["R1"])).is_ok());
        assert!(matches!(
            p.publish(corpus("v1", &["R9"])),
            Err(StoreError::VersionConflict(_))
        ));
    }

    #[tokio::test]
    async fn retire_spares_current() {
        let p = InMemoryCorpusProvider::with_corpus(corpus("v1", &["R1"])).unwrap();
        p.publish(corpus("v2", &["R1"])).unwrap();
        assert!(!p.retire(&CorpusVersion::new("v2")));
        assert!(p.retire(&CorpusVersion::new("v1")));
        assert_eq!(p.versions(), vec![CorpusVersion::new("v2")]);
        assert!(matches!(
            p.get_corpus(Some(&CorpusVersion::new("v1"))).await,
            Err(StoreError::VersionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn json_directory_round_trip() {
        let tmp = TempDir::new().unwrap();
        let p = JsonCorpusProvider::new(tmp.path());
        p.publish(&corpus("2025.1", &["R1", "R2"])).await.unwrap();
        p.publish(&corpus("2025.2", &["R1"])).await.unwrap();

        assert_eq!(p.current_version().await.unwrap().as_str(), "2025.2");
        assert_eq!(
            p.versions().await.unwrap(),
            vec![CorpusVersion::new("2025.1"), CorpusVersion::new("2025.2")]
        );

        let old = p
            .get_corpus(Some(&CorpusVersion::new("2025.1")))
            .await
            .unwrap();
        assert_eq!(old.len(), 2);
        assert_eq!(old.rules()[0].keywords, vec!["personal data"]);

        // A fresh provider over the same directory sees the same data.
        let reopened = JsonCorpusProvider::new(tmp.path());
        let current = reopened.get_corpus(None).await.unwrap();
        assert_eq!(current.version().as_str(), "2025.2");
    }

    #[tokio::test]
    async fn json_pins_share_one_snapshot() {
        let tmp = TempDir::new().unwrap();
        let p = JsonCorpusProvider::new(tmp.path());
        p.publish(&corpus("v1", &["R1"])).await.unwrap();
        let a = p.get_corpus(None).await.unwrap();
        let b = p.get_corpus(None).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn json_publish_never_overwrites() {
        let tmp = TempDir::new().unwrap();
        let p = JsonCorpusProvider::new(tmp.path());
        p.publish(&corpus("v1", &["R1"])).await.unwrap();
        let err = p.publish(&corpus("v1", &["R2"])).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn json_without_pointer_uses_greatest_version() {
        let tmp = TempDir::new().unwrap();
        for v in ["a", "c", "b"] {
            let json = serde_json::to_string(&corpus(v, &["R1"])).unwrap();
            std::fs::write(tmp.path().join(format!("{v}.json")), json).unwrap();
        }
        let p = JsonCorpusProvider::new(tmp.path());
        assert_eq!(p.current_version().await.unwrap().as_str(), "c");
    }

    #[tokio::test]
    async fn json_without_pointer_orders_numeric_versions_by_value() {
        let tmp = TempDir::new().unwrap();
        for v in ["2025.9", "2025.10", "2025.2"] {
            let json = serde_json::to_string(&corpus(v, &["R1"])).unwrap();
            std::fs::write(tmp.path().join(format!("{v}.json")), json).unwrap();
        }
        let p = JsonCorpusProvider::new(tmp.path());
        assert_eq!(p.current_version().await.unwrap().as_str(), "2025.10");
        let names: Vec<String> = p
            .versions()
            .await
            .unwrap()
            .iter()
            .map(|v| v.to_string())
            .collect();
        assert_eq!(names, vec!["2025.2", "2025.9", "2025.10"]);
    }

    #[tokio::test]
    async fn json_invalid_rules_are_rejected() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("bad.json"),
            r#"{"version": "bad", "rules": [
                {"id": "R1", "regulation": "GDPR", "jurisdiction": "EU",
                 "category": "x", "severity": 9, "description": "d"}
            ]}"#,
        )
        .unwrap();
        let p = JsonCorpusProvider::new(tmp.path());
        let err = p
            .get_corpus(Some(&CorpusVersion::new("bad")))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Corpus(_)));
    }

    #[tokio::test]
    async fn json_rejects_path_like_versions() {
        let tmp = TempDir::new().unwrap();
        let p = JsonCorpusProvider::new(tmp.path());
        let err = p
            .get_corpus(Some(&CorpusVersion::new("../etc/passwd")))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionNotFound(_)));
    }
}
