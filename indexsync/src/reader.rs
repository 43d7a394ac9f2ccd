use std::fs::File;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::errors::{Result, SyncError};
use crate::models::Record;

/// A source of catalog records, consumed one at a time.
#[async_trait]
pub trait RecordReader: Send {
    async fn has_next(&mut self) -> Result<bool>;

    /// Returns `None` once the source is exhausted.
    async fn next(&mut self) -> Result<Option<Record>>;
}

/// Streams the rows of one snapshot's `objects.csv` as records keyed by the header row.
pub struct CsvSnapshotReader {
    path: PathBuf,
    reader: csv::Reader<File>,
    headers: Vec<String>,
    row: csv::StringRecord,
    peeked: Option<Record>,
    rows_read: usize,
}

impl CsvSnapshotReader {
    pub fn open(path: impl AsRef<Path>, delimiter: u8) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .from_path(&path)
            .map_err(|e| SyncError::unreadable(&path, e))?;
        let headers = reader
            .headers()
            .map_err(|e| SyncError::unreadable(&path, e))?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').to_string())
            .collect();
        Ok(Self {
            path,
            reader,
            headers,
            row: csv::StringRecord::new(),
            peeked: None,
            rows_read: 0,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows_read(&self) -> usize {
        self.rows_read
    }

    fn read_row(&mut self) -> Result<Option<Record>> {
        let more = self
            .reader
            .read_record(&mut self.row)
            .map_err(|e| SyncError::unreadable(&self.path, e))?;
        if !more {
            return Ok(None);
        }
        self.rows_read += 1;
        // Short rows leave trailing fields empty, which normalizes them to null.
        let record = Record::from_raw(
            self.headers
                .iter()
                .enumerate()
                .map(|(i, h)| (h.clone(), self.row.get(i).unwrap_or(""))),
        );
        Ok(Some(record))
    }
}

#[async_trait]
impl RecordReader for CsvSnapshotReader {
    async fn has_next(&mut self) -> Result<bool> {
        if self.peeked.is_none() {
            self.peeked = self.read_row()?;
        }
        Ok(self.peeked.is_some())
    }

    async fn next(&mut self) -> Result<Option<Record>> {
        match self.peeked.take() {
            Some(record) => Ok(Some(record)),
            None => self.read_row(),
        }
    }
}
