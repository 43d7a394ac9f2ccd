use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use indexsync::models::{Record, SnapshotReference};
use indexsync::reader::RecordReader;
use indexsync::snapshot::{SnapshotLayout, SNAPSHOT_FILE_NAME};
use serde::Serialize;

use crate::error::{FetcherError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub snapshot: SnapshotReference,
    pub records: usize,
    /// Objects that could not be fetched and were left out.
    pub skipped: usize,
}

/// Writes records as a new `csv_<timestamp>/objects.csv` snapshot.
///
/// The snapshot is assembled in a hidden staging directory and renamed into place, so readers
/// never see a partially written export.
pub struct SnapshotExporter {
    layout: SnapshotLayout,
    id_field: String,
    delimiter: u8,
}

impl SnapshotExporter {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            layout: SnapshotLayout::new(output_root),
            id_field: "id".to_string(),
            delimiter: b',',
        }
    }

    pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub async fn export(
        &self,
        reader: &mut dyn RecordReader,
        timestamp: i64,
    ) -> Result<ExportSummary> {
        let snapshot = self.layout.reference(timestamp);
        let final_dir = self.layout.root().join(snapshot.dir_name());
        if tokio::fs::try_exists(&final_dir).await? {
            return Err(FetcherError::InvalidParam(format!(
                "snapshot directory {} already exists",
                final_dir.display()
            )));
        }

        let mut records = Vec::new();
        let mut skipped = 0usize;
        while reader.has_next().await? {
            match reader.next().await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => break,
                Err(e) => {
                    log::warn!("Skipping object that could not be fetched: {}", e);
                    skipped += 1;
                }
            }
        }

        let staging_dir = self
            .layout
            .root()
            .join(format!(".{}.partial", snapshot.dir_name()));
        if tokio::fs::try_exists(&staging_dir).await? {
            tokio::fs::remove_dir_all(&staging_dir).await?;
        }
        tokio::fs::create_dir_all(&staging_dir).await?;

        if let Err(e) = self.write_csv(&staging_dir.join(SNAPSHOT_FILE_NAME), &records) {
            let _ = tokio::fs::remove_dir_all(&staging_dir).await;
            return Err(e);
        }
        tokio::fs::rename(&staging_dir, &final_dir).await?;

        log::info!(
            "Exported {} records to {} ({} skipped)",
            records.len(),
            snapshot.path.display(),
            skipped
        );
        Ok(ExportSummary {
            snapshot,
            records: records.len(),
            skipped,
        })
    }

    /// Header is the id field followed by every other field name in sorted order.
    pub fn header(&self, records: &[Record]) -> Vec<String> {
        let others: BTreeSet<&str> = records
            .iter()
            .flat_map(|record| record.field_names())
            .filter(|name| *name != self.id_field)
            .collect();
        std::iter::once(self.id_field.clone())
            .chain(others.into_iter().map(str::to_string))
            .collect()
    }

    fn write_csv(&self, path: &Path, records: &[Record]) -> Result<()> {
        let header = self.header(records);
        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.delimiter)
            .from_path(path)?;
        writer.write_record(&header)?;
        for record in records {
            writer.write_record(header.iter().map(|name| record.get(name).unwrap_or("")))?;
        }
        writer.flush()?;
        Ok(())
    }
}
