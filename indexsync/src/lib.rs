pub mod applier;
pub mod catalog;
pub mod config;
pub mod diff;
pub mod elastic;
pub mod errors;
pub mod index;
pub mod metadata;
pub mod models;
pub mod reader;
pub mod snapshot;
pub mod sync;

use crate::catalog::Catalog;
use crate::config::SyncConfig;
use crate::diff::{CommandDiffProvider, SnapshotDiffProvider};
use crate::elastic::ElasticsearchIndex;
use crate::errors::Result;
use crate::index::DocumentIndex;
use crate::models::{IndexStatus, PassLog, SyncReport};
use crate::sync::{IncrementalSynchronizer, IndexSynchronizer};
use std::path::Path;
use std::sync::Arc;

/// The main entry point for the `indexsync` library.
///
/// `IndexSync` wires together everything needed to keep a search index in step with a
/// directory of `csv_<timestamp>` snapshots:
/// - A document index (`DocumentIndex`), Elasticsearch by default.
/// - An external diff tool (`SnapshotDiffProvider`) producing change-sets between snapshots.
/// - A local SQLite catalog (`Catalog`) recording every synchronization pass.
/// - The synchronizer (`IncrementalSynchronizer`) deciding between full loads and diffs.
///
/// Passes must not run concurrently against the same index.
///
/// # Example
///
/// ```rust,no_run
/// use indexsync::{IndexSync, config::SyncConfig};
///
/// #[tokio::main]
/// async fn main() -> indexsync::errors::Result<()> {
///     let config = SyncConfig::from_env("/var/lib/indexsync")?;
///     let sync = IndexSync::new(config).await?;
///     sync.initialize().await?;
///
///     let report = sync.synchronize_latest().await?;
///     println!("{:?}: {} created", report.mode, report.created);
///     Ok(())
/// }
/// ```
pub struct IndexSync {
    pub config: SyncConfig,
    pub catalog: Arc<Catalog>,
    pub index: Arc<dyn DocumentIndex>,
    pub synchronizer: Arc<IncrementalSynchronizer>,
}

impl IndexSync {
    /// Creates an instance backed by Elasticsearch and the configured diff command.
    ///
    /// The catalog schema is created here; the index is not contacted until
    /// [`IndexSync::initialize`].
    pub async fn new(config: SyncConfig) -> Result<Self> {
        let index: Arc<dyn DocumentIndex> = Arc::new(ElasticsearchIndex::from_config(&config)?);
        let diff: Arc<dyn SnapshotDiffProvider> = Arc::new(CommandDiffProvider::from_command_line(
            &config.diff_command,
            config.id_field.clone(),
        )?);
        Self::with_components(config, index, diff).await
    }

    pub async fn with_components(
        config: SyncConfig,
        index: Arc<dyn DocumentIndex>,
        diff: Arc<dyn SnapshotDiffProvider>,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(&config.snapshot_root).await?;

        let catalog = Arc::new(Catalog::new(&config)?);
        catalog.initialize_schema()?;

        let synchronizer = Arc::new(
            IncrementalSynchronizer::new(&config, Arc::clone(&index), diff)?
                .with_catalog(Arc::clone(&catalog)),
        );

        Ok(Self {
            config,
            catalog,
            index,
            synchronizer,
        })
    }

    pub async fn initialize(&self) -> Result<()> {
        self.synchronizer.initialize().await
    }

    pub async fn synchronize(&self, snapshot_path: &Path) -> Result<SyncReport> {
        self.synchronizer.synchronize(snapshot_path).await
    }

    pub async fn synchronize_latest(&self) -> Result<SyncReport> {
        self.synchronizer.synchronize_latest().await
    }

    pub async fn reset_index(&self) -> Result<u64> {
        self.synchronizer.reset_index().await
    }

    pub async fn status(&self) -> Result<IndexStatus> {
        self.synchronizer.status().await
    }

    pub fn passes(&self, limit: usize) -> Result<Vec<PassLog>> {
        self.catalog.list_passes(limit)
    }

    pub async fn close(&self) -> Result<()> {
        self.index.close().await
    }
}
