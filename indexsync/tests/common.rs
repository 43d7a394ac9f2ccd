use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use indexsync::IndexSync;
use indexsync::config::SyncConfig;
use indexsync::diff::SnapshotDiffProvider;
use indexsync::errors::Result as SyncResult;
use indexsync::index::{DocumentIndex, MemoryIndex};
use indexsync::models::{ChangeSet, ChangedRecord, DocumentId, FieldChange, Record};
use indexsync::reader::{CsvSnapshotReader, RecordReader};
use tempfile::TempDir;

/// Key-based diff of two small snapshots, computed in process.
pub struct RecordDiff {
    pub id_field: String,
}

impl Default for RecordDiff {
    fn default() -> Self {
        Self {
            id_field: "id".to_string(),
        }
    }
}

impl RecordDiff {
    async fn read_all(&self, path: &Path) -> SyncResult<BTreeMap<DocumentId, Record>> {
        let mut reader = CsvSnapshotReader::open(path, b',')?;
        let mut records = BTreeMap::new();
        while let Some(record) = reader.next().await? {
            records.insert(record.id(&self.id_field)?, record);
        }
        Ok(records)
    }
}

#[async_trait]
impl SnapshotDiffProvider for RecordDiff {
    async fn diff(&self, old: &Path, new: &Path) -> SyncResult<ChangeSet> {
        let old = self.read_all(old).await?;
        let new = self.read_all(new).await?;

        let mut change_set = ChangeSet::default();
        for (id, record) in &new {
            let Some(previous) = old.get(id) else {
                change_set.added.push(record.clone());
                continue;
            };
            let fields: BTreeMap<String, FieldChange> = record
                .fields()
                .filter(|(name, value)| previous.get(name) != *value)
                .map(|(name, value)| {
                    let change = FieldChange {
                        from: previous.get(name).map(str::to_string),
                        to: value.map(str::to_string),
                    };
                    (name.to_string(), change)
                })
                .collect();
            if !fields.is_empty() {
                change_set.changed.push(ChangedRecord { id: *id, fields });
            }
        }
        change_set.removed = old.keys().filter(|id| !new.contains_key(*id)).copied().collect();
        Ok(change_set)
    }
}

pub fn write_snapshot(root: &Path, timestamp: i64, contents: &str) -> PathBuf {
    let dir = root.join(format!("csv_{timestamp}"));
    std::fs::create_dir_all(&dir).expect("create snapshot dir");
    let file = dir.join("objects.csv");
    std::fs::write(&file, contents).expect("write snapshot");
    file
}

#[allow(dead_code)]
pub struct TestContext {
    pub temp_dir: TempDir,
    pub config: SyncConfig,
    pub index: Arc<MemoryIndex>,
    pub sync: IndexSync,
}

impl TestContext {
    pub fn snapshot_root(&self) -> &Path {
        &self.config.snapshot_root
    }
}

#[allow(dead_code)]
pub async fn init_test_context() -> anyhow::Result<TestContext> {
    let temp_dir = tempfile::tempdir()?;
    let config = SyncConfig::new(temp_dir.path());

    let index = Arc::new(MemoryIndex::new());
    let sync = IndexSync::with_components(
        config.clone(),
        Arc::clone(&index) as Arc<dyn DocumentIndex>,
        Arc::new(RecordDiff::default()),
    )
    .await?;
    sync.initialize().await?;

    Ok(TestContext {
        temp_dir,
        config,
        index,
        sync,
    })
}
