//! Contract document storage.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use clausewise_core::ContractId;
use tracing::debug;

use crate::error::StoreError;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Full text of a contract.
    async fn get_contract(&self, id: &ContractId) -> Result<String, StoreError>;
}

/// Contracts as UTF-8 files under a root directory. `id` resolves to
/// `<root>/<id>` or, failing that, `<root>/<id>.txt`.
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn get_contract(&self, id: &ContractId) -> Result<String, StoreError> {
        let name = id.as_str();
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(StoreError::ContractNotFound(name.to_string()));
        }
        for candidate in [self.root.join(name), self.root.join(format!("{name}.txt"))] {
            match tokio::fs::read_to_string(&candidate).await {
                Ok(text) => {
                    debug!(contract = %id, path = %candidate.display(), bytes = text.len(), "contract loaded");
                    return Ok(text);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::ContractNotFound(name.to_string()))
    }
}

/// Contracts held in memory.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    docs: RwLock<HashMap<ContractId, String>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, id: ContractId, text: impl Into<String>) {
        self.docs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, text.into());
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get_contract(&self, id: &ContractId) -> Result<String, StoreError> {
        self.docs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::ContractNotFound(id.to_string()))
    }
}
