use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::applier::{ApplyReport, DocumentApplier, DocumentOperation, plan_operations};
use crate::catalog::{Catalog, STATUS_FAILED, STATUS_SUCCEEDED};
use crate::config::SyncConfig;
use crate::diff::SnapshotDiffProvider;
use crate::errors::{Result, SyncError};
use crate::index::{DocType, DocumentIndex};
use crate::metadata::IndexMetadataStore;
use crate::models::{IndexStatus, SnapshotReference, SyncMode, SyncReport};
use crate::reader::{CsvSnapshotReader, RecordReader};
use crate::snapshot::{KeyCompatibilityChecker, SnapshotLayout};

/// Keeps a document index in step with a series of snapshots.
#[async_trait]
pub trait IndexSynchronizer: Send + Sync {
    /// Connects to the index and creates the metadata document if needed. Must be called
    /// once before any other operation.
    async fn initialize(&self) -> Result<()>;

    /// Brings the index to the state of the snapshot at `snapshot_path`, either by a full
    /// load or by applying the change-set against the last imported snapshot.
    async fn synchronize(&self, snapshot_path: &Path) -> Result<SyncReport>;

    /// Forgets every import and deletes every object document. Returns how many were deleted.
    async fn reset_index(&self) -> Result<u64>;
}

/// Chooses between bootstrap and diff-apply for each pass.
///
/// Passes must be serialized by the caller; two concurrent passes on the same index may
/// interleave their metadata reads and writes.
pub struct IncrementalSynchronizer {
    index: Arc<dyn DocumentIndex>,
    metadata: IndexMetadataStore,
    applier: DocumentApplier,
    checker: KeyCompatibilityChecker,
    diff: Arc<dyn SnapshotDiffProvider>,
    catalog: Option<Arc<Catalog>>,
    snapshot_root: PathBuf,
    delimiter: u8,
    batch_size: usize,
    initialized: AtomicBool,
}

impl IncrementalSynchronizer {
    pub fn new(
        config: &SyncConfig,
        index: Arc<dyn DocumentIndex>,
        diff: Arc<dyn SnapshotDiffProvider>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            metadata: IndexMetadataStore::new(Arc::clone(&index)),
            applier: DocumentApplier::new(
                Arc::clone(&index),
                config.id_field.clone(),
                config.max_in_flight,
            ),
            checker: KeyCompatibilityChecker::new(config.delimiter),
            index,
            diff,
            catalog: None,
            snapshot_root: config.snapshot_root.clone(),
            delimiter: config.delimiter_byte()?,
            batch_size: config.bootstrap_batch_size,
            initialized: AtomicBool::new(false),
        })
    }

    /// Records every pass in `catalog`.
    pub fn with_catalog(mut self, catalog: Arc<Catalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn metadata(&self) -> &IndexMetadataStore {
        &self.metadata
    }

    /// Synchronizes to the newest snapshot under the configured snapshot root.
    pub async fn synchronize_latest(&self) -> Result<SyncReport> {
        self.ensure_initialized()?;
        let layout = SnapshotLayout::new(&self.snapshot_root);
        let latest = layout.latest().await?.ok_or_else(|| {
            SyncError::InvalidSnapshot(format!(
                "no snapshots found under {}",
                self.snapshot_root.display()
            ))
        })?;
        self.synchronize(&latest.path).await
    }

    pub async fn status(&self) -> Result<IndexStatus> {
        self.ensure_initialized()?;
        Ok(IndexStatus {
            metadata: self.metadata.read().await?,
            document_count: self.index.count(DocType::Object).await?,
        })
    }

    /// Creates one document per record read from `reader`, in batches. Every record is
    /// attempted even after some have failed.
    pub async fn load_records(&self, reader: &mut dyn RecordReader) -> Result<ApplyReport> {
        let mut total = ApplyReport::default();
        let mut batch = Vec::with_capacity(self.batch_size);
        while let Some(record) = reader.next().await? {
            batch.push(DocumentOperation::Create(record));
            if batch.len() >= self.batch_size {
                total.merge(self.applier.apply(std::mem::take(&mut batch)).await);
                log::debug!("Loaded {} records so far", total.attempted());
            }
        }
        if !batch.is_empty() {
            total.merge(self.applier.apply(batch).await);
        }
        total.into_result()
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(SyncError::NotInitialized)
        }
    }

    async fn run_pass(&self, snapshot: &SnapshotReference) -> Result<SyncReport> {
        let layout = SnapshotLayout::new(snapshot.root().unwrap_or(self.snapshot_root.as_path()));

        let Some(previous) = self.metadata.last_snapshot_reference(&layout).await? else {
            log::info!(
                "No snapshot imported yet; bootstrapping from {}",
                snapshot.path.display()
            );
            return self.full_load(snapshot, SyncMode::Bootstrap).await;
        };

        if previous.timestamp == snapshot.timestamp {
            log::info!(
                "Snapshot {} is already the last import; nothing to apply",
                snapshot.timestamp
            );
            return Ok(SyncReport::unchanged(snapshot.clone()));
        }

        if !self.checker.keys_match(&previous.path, &snapshot.path).await? {
            log::warn!(
                "Header keys of snapshot {} differ from last import {}; reloading from scratch",
                snapshot.timestamp,
                previous.timestamp
            );
            return self.full_load(snapshot, SyncMode::SchemaReload).await;
        }

        log::info!(
            "Header keys match; applying diff from snapshot {} to {}",
            previous.timestamp,
            snapshot.timestamp
        );
        self.apply_diff(&previous, snapshot).await
    }

    async fn full_load(&self, snapshot: &SnapshotReference, mode: SyncMode) -> Result<SyncReport> {
        // Open first so an unreadable snapshot leaves the index untouched.
        let mut reader = CsvSnapshotReader::open(&snapshot.path, self.delimiter)?;

        let cleared = self.metadata.reset().await?;
        log::info!("Cleared {} documents before full load", cleared);

        let applied = self.load_records(&mut reader).await?;
        self.metadata.record_import(snapshot).await?;
        log::info!(
            "Full load of snapshot {} created {} documents",
            snapshot.timestamp,
            applied.created
        );
        Ok(report(snapshot, mode, &applied))
    }

    async fn apply_diff(
        &self,
        previous: &SnapshotReference,
        snapshot: &SnapshotReference,
    ) -> Result<SyncReport> {
        let change_set = self.diff.diff(&previous.path, &snapshot.path).await?;
        log::info!(
            "Change-set for snapshot {}: {} added, {} changed, {} removed",
            snapshot.timestamp,
            change_set.added.len(),
            change_set.changed.len(),
            change_set.removed.len()
        );

        let ops = plan_operations(change_set);
        let applied = self.applier.reapply(ops).await.into_result()?;
        if !applied.missing_deletes.is_empty() {
            log::warn!(
                "{} removed documents were already absent from the index",
                applied.missing_deletes.len()
            );
        }

        self.metadata.record_import(snapshot).await?;
        Ok(report(snapshot, SyncMode::Incremental, &applied))
    }

    fn finish_pass(&self, pass_id: Option<i64>, outcome: &Result<SyncReport>) {
        let (Some(catalog), Some(pass_id)) = (&self.catalog, pass_id) else {
            return;
        };
        let result = match outcome {
            Ok(report) => catalog.finish_pass_log(
                pass_id,
                STATUS_SUCCEEDED,
                Some(report.mode),
                &format!(
                    "created={} updated={} deleted={} missing_deletes={}",
                    report.created, report.updated, report.deleted, report.missing_deletes
                ),
            ),
            Err(e) => catalog.finish_pass_log(pass_id, STATUS_FAILED, None, &e.to_string()),
        };
        if let Err(e) = result {
            log::error!("Failed to record outcome of pass {}: {}", pass_id, e);
        }
    }
}

fn report(snapshot: &SnapshotReference, mode: SyncMode, applied: &ApplyReport) -> SyncReport {
    SyncReport {
        snapshot: snapshot.clone(),
        mode,
        created: applied.created,
        updated: applied.updated,
        deleted: applied.deleted,
        missing_deletes: applied.missing_deletes.len(),
    }
}

#[async_trait]
impl IndexSynchronizer for IncrementalSynchronizer {
    async fn initialize(&self) -> Result<()> {
        self.index.open().await?;
        self.metadata.initialize_if_absent().await?;
        self.initialized.store(true, Ordering::Release);
        log::info!("Index synchronizer ready");
        Ok(())
    }

    async fn synchronize(&self, snapshot_path: &Path) -> Result<SyncReport> {
        self.ensure_initialized()?;
        let resolved = SnapshotReference::from_path(snapshot_path);

        let pass_id = match &self.catalog {
            Some(catalog) => Some(catalog.create_pass_log(
                &snapshot_path.display().to_string(),
                resolved.as_ref().ok(),
            )?),
            None => None,
        };

        let outcome = match resolved {
            Ok(snapshot) => self.run_pass(&snapshot).await,
            Err(e) => Err(e),
        };
        match &outcome {
            Ok(report) => log::info!(
                "Pass for snapshot {} finished ({}): {} created, {} updated, {} deleted",
                report.snapshot.timestamp,
                report.mode.as_str(),
                report.created,
                report.updated,
                report.deleted
            ),
            Err(e) => log::error!(
                "Pass for {} failed; the snapshot was not recorded as imported: {}",
                snapshot_path.display(),
                e
            ),
        }
        self.finish_pass(pass_id, &outcome);
        outcome
    }

    async fn reset_index(&self) -> Result<u64> {
        self.ensure_initialized()?;
        self.metadata.reset().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MemoryIndex;
    use crate::models::{ChangeSet, ChangedRecord, DocumentId, FieldChange, IndexMetadata, Record};
    use serde_json::{Value as JsonValue, json};
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;
    use tempfile::{TempDir, tempdir};

    /// Returns a fixed change-set, or fails when given none.
    struct FixedDiff {
        change_set: Option<ChangeSet>,
        calls: AtomicUsize,
    }

    impl FixedDiff {
        fn new(change_set: Option<ChangeSet>) -> Arc<Self> {
            Arc::new(Self {
                change_set,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SnapshotDiffProvider for FixedDiff {
        async fn diff(&self, _old: &Path, _new: &Path) -> Result<ChangeSet> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.change_set
                .clone()
                .ok_or_else(|| SyncError::DiffToolFailure("exit status 1".into()))
        }
    }

    /// Fails updates to one document as if the backend had gone away, until healed.
    struct FlakyIndex {
        inner: MemoryIndex,
        fail_update_of: DocumentId,
        healed: AtomicBool,
    }

    impl FlakyIndex {
        fn failing_update_of(id: DocumentId) -> Arc<Self> {
            Arc::new(Self {
                inner: MemoryIndex::new(),
                fail_update_of: id,
                healed: AtomicBool::new(false),
            })
        }

        fn heal(&self) {
            self.healed.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl DocumentIndex for FlakyIndex {
        async fn exists(&self, t: DocType, id: DocumentId) -> Result<bool> {
            self.inner.exists(t, id).await
        }
        async fn get(&self, t: DocType, id: DocumentId) -> Result<Option<JsonValue>> {
            self.inner.get(t, id).await
        }
        async fn create(&self, t: DocType, id: DocumentId, body: &JsonValue) -> Result<()> {
            self.inner.create(t, id, body).await
        }
        async fn update(&self, t: DocType, id: DocumentId, doc: &JsonValue) -> Result<()> {
            if t == DocType::Object && id == self.fail_update_of && !self.healed.load(Ordering::SeqCst) {
                return Err(SyncError::BackendUnavailable("connection reset".into()));
            }
            self.inner.update(t, id, doc).await
        }
        async fn delete(&self, t: DocType, id: DocumentId) -> Result<()> {
            self.inner.delete(t, id).await
        }
        async fn delete_all(&self, t: DocType) -> Result<u64> {
            self.inner.delete_all(t).await
        }
        async fn count(&self, t: DocType) -> Result<u64> {
            self.inner.count(t).await
        }
    }

    fn write_snapshot(root: &Path, timestamp: i64, contents: &str) -> PathBuf {
        let dir = root.join(format!("csv_{timestamp}"));
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("objects.csv");
        std::fs::write(&file, contents).unwrap();
        file
    }

    fn config(dir: &TempDir) -> SyncConfig {
        let mut config = SyncConfig::new(dir.path());
        config.snapshot_root = dir.path().to_path_buf();
        config.bootstrap_batch_size = 2;
        config
    }

    async fn ready(
        dir: &TempDir,
        index: Arc<dyn DocumentIndex>,
        diff: Arc<dyn SnapshotDiffProvider>,
    ) -> IncrementalSynchronizer {
        let sync = IncrementalSynchronizer::new(&config(dir), index, diff).unwrap();
        sync.initialize().await.unwrap();
        sync
    }

    fn baseline_to_next() -> ChangeSet {
        ChangeSet {
            added: vec![Record::from_raw([("id", "3"), ("x", "c")])],
            changed: vec![ChangedRecord {
                id: 1,
                fields: BTreeMap::from([(
                    "x".to_string(),
                    FieldChange {
                        from: Some("a".into()),
                        to: Some("a2".into()),
                    },
                )]),
            }],
            removed: vec![2],
        }
    }

    #[tokio::test]
    async fn operations_require_initialize() {
        let dir = tempdir().unwrap();
        let path = write_snapshot(dir.path(), 1, "id\n1\n");
        let sync =
            IncrementalSynchronizer::new(&config(&dir), Arc::new(MemoryIndex::new()), FixedDiff::new(None))
                .unwrap();
        assert!(matches!(sync.synchronize(&path).await, Err(SyncError::NotInitialized)));
        assert!(matches!(sync.reset_index().await, Err(SyncError::NotInitialized)));
        assert!(matches!(sync.status().await, Err(SyncError::NotInitialized)));
    }

    #[tokio::test]
    async fn bootstrap_loads_every_record() {
        let dir = tempdir().unwrap();
        let path = write_snapshot(
            dir.path(),
            100,
            "id,title,year\n1,Wave,1831\n2,,1832\n3,Fuji,\n4,Rain,1835\n5,Snow,1836\n",
        );
        let index = Arc::new(MemoryIndex::new());
        let diff = FixedDiff::new(None);
        let sync = ready(&dir, index.clone(), diff.clone()).await;

        let report = sync.synchronize(&path).await.unwrap();
        assert_eq!(report.mode, SyncMode::Bootstrap);
        assert_eq!(report.created, 5);

        let docs = index.documents(DocType::Object).unwrap();
        assert_eq!(docs.len(), 5);
        assert_eq!(docs[&2], json!({"id": 2, "title": null, "year": "1832"}));
        assert_eq!(docs[&3]["year"], JsonValue::Null);
        assert_eq!(sync.metadata().read().await.unwrap(), IndexMetadata::imported(100));
        assert_eq!(diff.calls(), 0);
    }

    #[tokio::test]
    async fn same_snapshot_again_is_a_no_op() {
        let dir = tempdir().unwrap();
        let path = write_snapshot(dir.path(), 100, "id,title\n1,Wave\n");
        let index = Arc::new(MemoryIndex::new());
        let diff = FixedDiff::new(Some(ChangeSet::default()));
        let sync = ready(&dir, index.clone(), diff.clone()).await;
        sync.synchronize(&path).await.unwrap();

        // A document only a reload would remove.
        index.create(DocType::Object, 99, &json!({"id": 99})).await.unwrap();

        let report = sync.synchronize(path.parent().unwrap()).await.unwrap();
        assert_eq!(report.mode, SyncMode::AlreadyCurrent);
        assert_eq!(report.created + report.updated + report.deleted, 0);
        assert_eq!(index.count(DocType::Object).await.unwrap(), 2);
        assert_eq!(diff.calls(), 0);
    }

    #[tokio::test]
    async fn incremental_pass_applies_change_set() {
        let dir = tempdir().unwrap();
        let a = write_snapshot(dir.path(), 100, "id,x\n1,a\n2,b\n");
        let b = write_snapshot(dir.path(), 200, "id,x\n1,a2\n3,c\n");
        let index = Arc::new(MemoryIndex::new());
        let diff = FixedDiff::new(Some(baseline_to_next()));
        let sync = ready(&dir, index.clone(), diff.clone()).await;

        sync.synchronize(&a).await.unwrap();
        let report = sync.synchronize(&b).await.unwrap();

        assert_eq!(report.mode, SyncMode::Incremental);
        assert_eq!((report.created, report.updated, report.deleted), (1, 1, 1));
        assert_eq!(diff.calls(), 1);

        let docs = index.documents(DocType::Object).unwrap();
        assert_eq!(
            docs,
            BTreeMap::from([(1, json!({"id": 1, "x": "a2"})), (3, json!({"id": 3, "x": "c"}))])
        );
        assert_eq!(sync.metadata().read().await.unwrap(), IndexMetadata::imported(200));
    }

    #[tokio::test]
    async fn missing_delete_still_advances_metadata() {
        let dir = tempdir().unwrap();
        let a = write_snapshot(dir.path(), 100, "id,x\n1,a\n2,b\n");
        let b = write_snapshot(dir.path(), 200, "id,x\n1,a\n");
        let diff = FixedDiff::new(Some(ChangeSet {
            removed: vec![2, 42],
            ..ChangeSet::default()
        }));
        let sync = ready(&dir, Arc::new(MemoryIndex::new()), diff).await;

        sync.synchronize(&a).await.unwrap();
        let report = sync.synchronize(&b).await.unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(report.missing_deletes, 1);
        assert_eq!(sync.metadata().read().await.unwrap().last_import_timestamp, 200);
    }

    #[tokio::test]
    async fn diff_failure_leaves_metadata_unchanged() {
        let dir = tempdir().unwrap();
        let a = write_snapshot(dir.path(), 100, "id,x\n1,a\n");
        let b = write_snapshot(dir.path(), 200, "id,x\n1,b\n");
        let index = Arc::new(MemoryIndex::new());
        let sync = ready(&dir, index.clone(), FixedDiff::new(None)).await;

        sync.synchronize(&a).await.unwrap();
        let err = sync.synchronize(&b).await.unwrap_err();
        assert!(matches!(err, SyncError::DiffToolFailure(_)));
        assert_eq!(sync.metadata().read().await.unwrap(), IndexMetadata::imported(100));
        assert_eq!(index.documents(DocType::Object).unwrap()[&1]["x"], "a");
    }

    #[tokio::test]
    async fn failed_operation_fails_pass_but_siblings_apply() {
        let dir = tempdir().unwrap();
        let a = write_snapshot(dir.path(), 100, "id,x\n1,a\n2,b\n");
        let b = write_snapshot(dir.path(), 200, "id,x\n1,a2\n3,c\n");
        let index = FlakyIndex::failing_update_of(1);
        let sync = ready(&dir, index.clone(), FixedDiff::new(Some(baseline_to_next()))).await;

        sync.synchronize(&a).await.unwrap();
        let err = sync.synchronize(&b).await.unwrap_err();
        match err {
            SyncError::PartialApply { attempted, failures } => {
                assert_eq!(attempted, 3);
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].id, Some(1));
            }
            other => panic!("unexpected error: {other}"),
        }

        // No rollback: the create and delete went through.
        let docs = index.inner.documents(DocType::Object).unwrap();
        assert!(docs.contains_key(&3));
        assert!(!docs.contains_key(&2));
        assert_eq!(sync.metadata().read().await.unwrap().last_import_timestamp, 100);
    }

    #[tokio::test]
    async fn retry_after_partial_apply_converges() {
        let dir = tempdir().unwrap();
        let a = write_snapshot(dir.path(), 100, "id,x\n1,a\n2,b\n");
        let b = write_snapshot(dir.path(), 200, "id,x\n1,a2\n3,c\n");
        let index = FlakyIndex::failing_update_of(1);
        let sync = ready(&dir, index.clone(), FixedDiff::new(Some(baseline_to_next()))).await;

        sync.synchronize(&a).await.unwrap();
        assert!(matches!(
            sync.synchronize(&b).await,
            Err(SyncError::PartialApply { .. })
        ));

        index.heal();
        let report = sync.synchronize(&b).await.unwrap();
        assert_eq!(report.mode, SyncMode::Incremental);
        assert_eq!(report.created, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(report.missing_deletes, 1);
        assert_eq!(
            sync.metadata().read().await.unwrap(),
            IndexMetadata::imported(200)
        );

        let docs = index.inner.documents(DocType::Object).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[&1], json!({"id": 1, "x": "a2"}));
        assert_eq!(docs[&3], json!({"id": 3, "x": "c"}));

        let again = sync.synchronize(&b).await.unwrap();
        assert_eq!(again.mode, SyncMode::AlreadyCurrent);
    }

    #[tokio::test]
    async fn failed_full_load_leaves_metadata_reset() {
        let dir = tempdir().unwrap();
        let a = write_snapshot(dir.path(), 100, "id,x\n1,a\n");
        let b = write_snapshot(dir.path(), 200, "id,y\n2,q\nbad,r\n");
        let index = Arc::new(MemoryIndex::new());
        let sync = ready(&dir, index.clone(), FixedDiff::new(None)).await;

        sync.synchronize(&a).await.unwrap();
        assert!(matches!(
            sync.synchronize(&b).await,
            Err(SyncError::PartialApply { .. })
        ));

        // The reload cleared the previous import; nothing is recorded for either snapshot.
        assert_eq!(sync.metadata().read().await.unwrap(), IndexMetadata::default());
        let docs = index.documents(DocType::Object).unwrap();
        assert_eq!(docs.keys().copied().collect::<Vec<_>>(), vec![2]);
    }

    #[tokio::test]
    async fn header_change_forces_full_reload() {
        let dir = tempdir().unwrap();
        let a = write_snapshot(dir.path(), 100, "id,x\n1,a\n2,b\n");
        let b = write_snapshot(dir.path(), 200, "id,x,y\n3,c,d\n");
        let index = Arc::new(MemoryIndex::new());
        let diff = FixedDiff::new(Some(ChangeSet::default()));
        let sync = ready(&dir, index.clone(), diff.clone()).await;

        sync.synchronize(&a).await.unwrap();
        let report = sync.synchronize(&b).await.unwrap();
        assert_eq!(report.mode, SyncMode::SchemaReload);
        assert_eq!(report.created, 1);
        assert_eq!(diff.calls(), 0);
        assert_eq!(
            index.documents(DocType::Object).unwrap(),
            BTreeMap::from([(3, json!({"id": 3, "x": "c", "y": "d"}))])
        );
    }

    #[tokio::test]
    async fn missing_previous_snapshot_fails_the_pass() {
        let dir = tempdir().unwrap();
        let a = write_snapshot(dir.path(), 100, "id\n1\n");
        let b = write_snapshot(dir.path(), 200, "id\n1\n");
        let sync = ready(&dir, Arc::new(MemoryIndex::new()), FixedDiff::new(None)).await;

        sync.synchronize(&a).await.unwrap();
        std::fs::remove_dir_all(a.parent().unwrap()).unwrap();
        let err = sync.synchronize(&b).await.unwrap_err();
        assert!(matches!(err, SyncError::SnapshotUnreadable { .. }));
    }

    #[tokio::test]
    async fn unreadable_snapshot_does_not_clear_the_index() {
        let dir = tempdir().unwrap();
        let index = Arc::new(MemoryIndex::new());
        let sync = ready(&dir, index.clone(), FixedDiff::new(None)).await;
        index.create(DocType::Object, 7, &json!({"id": 7})).await.unwrap();

        let missing = dir.path().join("csv_300").join("objects.csv");
        let err = sync.synchronize(&missing).await.unwrap_err();
        assert!(matches!(err, SyncError::SnapshotUnreadable { .. }));
        assert_eq!(index.count(DocType::Object).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn bad_primary_keys_fail_bootstrap_after_loading_the_rest() {
        let dir = tempdir().unwrap();
        let path = write_snapshot(dir.path(), 100, "id,x\n1,a\nnope,b\n3,c\n");
        let index = Arc::new(MemoryIndex::new());
        let sync = ready(&dir, index.clone(), FixedDiff::new(None)).await;

        let err = sync.synchronize(&path).await.unwrap_err();
        assert!(matches!(err, SyncError::PartialApply { attempted: 3, .. }));
        assert_eq!(index.count(DocType::Object).await.unwrap(), 2);
        assert!(!sync.metadata().read().await.unwrap().has_imported_snapshot);
    }

    #[tokio::test]
    async fn reset_forgets_imports() {
        let dir = tempdir().unwrap();
        let path = write_snapshot(dir.path(), 100, "id\n1\n2\n");
        let index = Arc::new(MemoryIndex::new());
        let sync = ready(&dir, index.clone(), FixedDiff::new(None)).await;
        sync.synchronize(&path).await.unwrap();

        assert_eq!(sync.reset_index().await.unwrap(), 2);
        let status = sync.status().await.unwrap();
        assert!(!status.metadata.has_imported_snapshot);
        assert_eq!(status.document_count, 0);

        // The next pass bootstraps again.
        let report = sync.synchronize(&path).await.unwrap();
        assert_eq!(report.mode, SyncMode::Bootstrap);
    }

    #[tokio::test]
    async fn synchronize_latest_picks_newest_snapshot() {
        let dir = tempdir().unwrap();
        write_snapshot(dir.path(), 100, "id\n1\n");
        write_snapshot(dir.path(), 300, "id\n1\n2\n3\n");
        write_snapshot(dir.path(), 200, "id\n1\n2\n");
        let sync = ready(&dir, Arc::new(MemoryIndex::new()), FixedDiff::new(None)).await;

        let report = sync.synchronize_latest().await.unwrap();
        assert_eq!(report.snapshot.timestamp, 300);
        assert_eq!(report.created, 3);
    }

    #[tokio::test]
    async fn passes_are_recorded_in_catalog() {
        let dir = tempdir().unwrap();
        let a = write_snapshot(dir.path(), 100, "id,x\n1,a\n");
        let b = write_snapshot(dir.path(), 200, "id,x\n1,b\n");
        let catalog = Arc::new(Catalog::new(&config(&dir)).unwrap());
        catalog.initialize_schema().unwrap();
        let sync = IncrementalSynchronizer::new(
            &config(&dir),
            Arc::new(MemoryIndex::new()),
            FixedDiff::new(None),
        )
        .unwrap()
        .with_catalog(Arc::clone(&catalog));
        sync.initialize().await.unwrap();

        sync.synchronize(&a).await.unwrap();
        sync.synchronize(&b).await.unwrap_err();
        sync.synchronize(Path::new("/no/such/place")).await.unwrap_err();

        let passes = catalog.list_passes(10).unwrap();
        let statuses: Vec<&str> = passes.iter().map(|p| p.status.as_str()).collect();
        assert_eq!(statuses, vec![STATUS_FAILED, STATUS_FAILED, STATUS_SUCCEEDED]);
        assert_eq!(passes[2].mode.as_deref(), Some("bootstrap"));
        assert_eq!(passes[1].snapshot_timestamp, Some(200));
        assert!(passes[0].snapshot_timestamp.is_none());
    }
}
