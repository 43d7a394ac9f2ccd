use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::errors::{Result, SyncError};
use crate::models::DocumentId;

/// Id of the single metadata document.
pub const METADATA_DOCUMENT_ID: DocumentId = 1;

/// The two logical document types kept in one collection namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DocType {
    Meta,
    Object,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Meta => "meta",
            DocType::Object => "object",
        }
    }
}

/// A remote document store with per-document atomicity and nothing more.
///
/// Implementations report a missing document on `update`/`delete` as [`SyncError::NotFound`]
/// and an existing one on `create` as [`SyncError::DuplicateId`]; anything that prevents the
/// request from being answered is [`SyncError::BackendUnavailable`].
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    /// Verifies the backend is reachable before first use.
    async fn open(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn exists(&self, doc_type: DocType, id: DocumentId) -> Result<bool>;

    async fn get(&self, doc_type: DocType, id: DocumentId) -> Result<Option<JsonValue>>;

    async fn create(&self, doc_type: DocType, id: DocumentId, body: &JsonValue) -> Result<()>;

    /// Merges the top-level fields of `doc` into the stored document.
    async fn update(&self, doc_type: DocType, id: DocumentId, doc: &JsonValue) -> Result<()>;

    async fn delete(&self, doc_type: DocType, id: DocumentId) -> Result<()>;

    /// Deletes every document of `doc_type`, returning how many were removed.
    async fn delete_all(&self, doc_type: DocType) -> Result<u64>;

    async fn count(&self, doc_type: DocType) -> Result<u64>;
}

/// Process-local index used for dry runs and tests.
#[derive(Default)]
pub struct MemoryIndex {
    docs: Mutex<HashMap<DocType, BTreeMap<DocumentId, JsonValue>>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of every stored document of `doc_type`, ordered by id.
    pub fn documents(&self, doc_type: DocType) -> Result<BTreeMap<DocumentId, JsonValue>> {
        let docs = self.lock()?;
        Ok(docs.get(&doc_type).cloned().unwrap_or_default())
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<DocType, BTreeMap<DocumentId, JsonValue>>>> {
        self.docs
            .lock()
            .map_err(|_| SyncError::BackendUnavailable("memory index mutex poisoned".into()))
    }
}

#[async_trait]
impl DocumentIndex for MemoryIndex {
    async fn exists(&self, doc_type: DocType, id: DocumentId) -> Result<bool> {
        let docs = self.lock()?;
        Ok(docs.get(&doc_type).is_some_and(|d| d.contains_key(&id)))
    }

    async fn get(&self, doc_type: DocType, id: DocumentId) -> Result<Option<JsonValue>> {
        let docs = self.lock()?;
        Ok(docs.get(&doc_type).and_then(|d| d.get(&id)).cloned())
    }

    async fn create(&self, doc_type: DocType, id: DocumentId, body: &JsonValue) -> Result<()> {
        let mut docs = self.lock()?;
        let bucket = docs.entry(doc_type).or_default();
        if bucket.contains_key(&id) {
            return Err(SyncError::DuplicateId(id));
        }
        bucket.insert(id, body.clone());
        Ok(())
    }

    async fn update(&self, doc_type: DocType, id: DocumentId, doc: &JsonValue) -> Result<()> {
        let mut docs = self.lock()?;
        let stored = docs
            .get_mut(&doc_type)
            .and_then(|d| d.get_mut(&id))
            .ok_or(SyncError::NotFound(id))?;
        match (stored, doc) {
            (JsonValue::Object(target), JsonValue::Object(fields)) => {
                for (key, value) in fields {
                    target.insert(key.clone(), value.clone());
                }
            }
            (stored, doc) => *stored = doc.clone(),
        }
        Ok(())
    }

    async fn delete(&self, doc_type: DocType, id: DocumentId) -> Result<()> {
        let mut docs = self.lock()?;
        docs.get_mut(&doc_type)
            .and_then(|d| d.remove(&id))
            .map(|_| ())
            .ok_or(SyncError::NotFound(id))
    }

    async fn delete_all(&self, doc_type: DocType) -> Result<u64> {
        let mut docs = self.lock()?;
        Ok(docs.remove(&doc_type).map_or(0, |d| d.len() as u64))
    }

    async fn count(&self, doc_type: DocType) -> Result<u64> {
        let docs = self.lock()?;
        Ok(docs.get(&doc_type).map_or(0, |d| d.len() as u64))
    }
}
