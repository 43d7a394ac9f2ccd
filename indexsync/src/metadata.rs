use std::sync::Arc;

use crate::errors::{Result, SyncError};
use crate::index::{DocType, DocumentIndex, METADATA_DOCUMENT_ID};
use crate::models::{IndexMetadata, SnapshotReference};
use crate::snapshot::SnapshotLayout;

/// Synchronization state kept as the single `meta` document of the index.
pub struct IndexMetadataStore {
    index: Arc<dyn DocumentIndex>,
}

impl IndexMetadataStore {
    pub fn new(index: Arc<dyn DocumentIndex>) -> Self {
        Self { index }
    }

    pub async fn exists(&self) -> Result<bool> {
        self.index.exists(DocType::Meta, METADATA_DOCUMENT_ID).await
    }

    /// Creates the metadata document unless it is already there. Returns whether it was created.
    pub async fn initialize_if_absent(&self) -> Result<bool> {
        if self.exists().await? {
            return Ok(false);
        }
        let body = serde_json::to_value(IndexMetadata::default())?;
        match self
            .index
            .create(DocType::Meta, METADATA_DOCUMENT_ID, &body)
            .await
        {
            Ok(()) => {
                log::info!("Created index metadata document");
                Ok(true)
            }
            Err(SyncError::DuplicateId(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn read(&self) -> Result<IndexMetadata> {
        let doc = self
            .index
            .get(DocType::Meta, METADATA_DOCUMENT_ID)
            .await?
            .ok_or(SyncError::NotInitialized)?;
        Ok(serde_json::from_value(doc)?)
    }

    /// The last imported snapshot, resolved within `layout`.
    pub async fn last_snapshot_reference(
        &self,
        layout: &SnapshotLayout,
    ) -> Result<Option<SnapshotReference>> {
        let meta = self.read().await?;
        if !meta.has_imported_snapshot {
            return Ok(None);
        }
        Ok(Some(layout.reference(meta.last_import_timestamp)))
    }

    /// Commit point of a pass: only call once every document mutation has resolved.
    pub async fn record_import(&self, snapshot: &SnapshotReference) -> Result<()> {
        self.write(IndexMetadata::imported(snapshot.timestamp)).await?;
        log::info!(
            "Index metadata now points at snapshot {}",
            snapshot.timestamp
        );
        Ok(())
    }

    /// Marks the index as never imported, then deletes every object document.
    /// The two steps are not atomic; a failure between them leaves stale documents behind
    /// under metadata that already forces the next pass to bootstrap.
    pub async fn reset(&self) -> Result<u64> {
        self.write(IndexMetadata::default()).await?;
        let deleted = self.index.delete_all(DocType::Object).await?;
        log::info!("Reset index metadata and deleted {} documents", deleted);
        Ok(deleted)
    }

    async fn write(&self, meta: IndexMetadata) -> Result<()> {
        let doc = serde_json::to_value(meta)?;
        match self
            .index
            .update(DocType::Meta, METADATA_DOCUMENT_ID, &doc)
            .await
        {
            Err(SyncError::NotFound(_)) => Err(SyncError::NotInitialized),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MemoryIndex;
    use serde_json::json;

    fn store() -> (Arc<MemoryIndex>, IndexMetadataStore) {
        let index = Arc::new(MemoryIndex::new());
        let store = IndexMetadataStore::new(index.clone());
        (index, store)
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let (_index, store) = store();
        assert!(!store.exists().await.unwrap());
        assert!(store.initialize_if_absent().await.unwrap());
        assert!(!store.initialize_if_absent().await.unwrap());
        assert_eq!(store.read().await.unwrap(), IndexMetadata::default());
    }

    #[tokio::test]
    async fn initialize_keeps_existing_state() {
        let (index, store) = store();
        index
            .create(
                DocType::Meta,
                METADATA_DOCUMENT_ID,
                &json!({"hasImportedCSV": true, "lastCSVImportTimestamp": 99}),
            )
            .await
            .unwrap();
        assert!(!store.initialize_if_absent().await.unwrap());
        assert_eq!(store.read().await.unwrap(), IndexMetadata::imported(99));
    }

    #[tokio::test]
    async fn last_reference_follows_recorded_import() {
        let (_index, store) = store();
        store.initialize_if_absent().await.unwrap();
        let layout = SnapshotLayout::new("/exports");
        assert!(store.last_snapshot_reference(&layout).await.unwrap().is_none());

        store.record_import(&layout.reference(1234)).await.unwrap();
        let last = store.last_snapshot_reference(&layout).await.unwrap().unwrap();
        assert_eq!(last, layout.reference(1234));
    }

    #[tokio::test]
    async fn reset_clears_metadata_and_documents() {
        let (index, store) = store();
        store.initialize_if_absent().await.unwrap();
        store
            .record_import(&SnapshotLayout::new("/x").reference(5))
            .await
            .unwrap();
        index.create(DocType::Object, 10, &json!({"id": 10})).await.unwrap();

        assert_eq!(store.reset().await.unwrap(), 1);
        assert_eq!(store.read().await.unwrap(), IndexMetadata::default());
        assert_eq!(index.count(DocType::Object).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_metadata_means_not_initialized() {
        let (_index, store) = store();
        assert!(matches!(store.read().await, Err(SyncError::NotInitialized)));
        assert!(matches!(
            store.record_import(&SnapshotLayout::new("/x").reference(1)).await,
            Err(SyncError::NotInitialized)
        ));
    }
}
