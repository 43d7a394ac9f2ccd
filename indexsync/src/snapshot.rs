//! Snapshot storage layout and the header pre-flight check.
//!
//! Snapshots live in sibling directories named `csv_<timestamp>`, each holding one
//! `objects.csv` whose first line is the header row.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};

use crate::errors::{Result, SyncError};
use crate::models::SnapshotReference;

pub const SNAPSHOT_DIR_PREFIX: &str = "csv_";
pub const SNAPSHOT_FILE_NAME: &str = "objects.csv";
/// Upper bound on the header row read by the key pre-flight.
pub const MAX_HEADER_BYTES: u64 = 64 * 1024;

impl SnapshotReference {
    /// Resolves a snapshot from either its `objects.csv` or its `csv_<timestamp>` directory.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = if path.is_dir() {
            path.join(SNAPSHOT_FILE_NAME)
        } else {
            path.to_path_buf()
        };
        let dir_name = file
            .parent()
            .and_then(Path::file_name)
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                SyncError::InvalidSnapshot(format!(
                    "{} is not inside a snapshot directory",
                    file.display()
                ))
            })?;
        let timestamp = parse_snapshot_dir_name(dir_name).ok_or_else(|| {
            SyncError::InvalidSnapshot(format!(
                "directory '{}' does not match {}<timestamp>",
                dir_name, SNAPSHOT_DIR_PREFIX
            ))
        })?;
        Ok(Self {
            timestamp,
            path: file,
        })
    }

    /// The directory holding this snapshot and its siblings.
    pub fn root(&self) -> Option<&Path> {
        self.path.parent().and_then(Path::parent)
    }

    pub fn dir_name(&self) -> String {
        format!("{}{}", SNAPSHOT_DIR_PREFIX, self.timestamp)
    }
}

fn parse_snapshot_dir_name(name: &str) -> Option<i64> {
    name.strip_prefix(SNAPSHOT_DIR_PREFIX)?.parse().ok()
}

/// A directory of `csv_<timestamp>` snapshots.
#[derive(Debug, Clone)]
pub struct SnapshotLayout {
    root: PathBuf,
}

impl SnapshotLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn reference(&self, timestamp: i64) -> SnapshotReference {
        SnapshotReference {
            timestamp,
            path: self
                .root
                .join(format!("{}{}", SNAPSHOT_DIR_PREFIX, timestamp))
                .join(SNAPSHOT_FILE_NAME),
        }
    }

    /// All snapshots under the root that contain an `objects.csv`, oldest first.
    pub async fn list(&self) -> Result<Vec<SnapshotReference>> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut snapshots = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(timestamp) = entry.file_name().to_str().and_then(parse_snapshot_dir_name)
            else {
                continue;
            };
            let reference = self.reference(timestamp);
            if tokio::fs::try_exists(&reference.path).await? {
                snapshots.push(reference);
            }
        }
        snapshots.sort_by_key(|s| s.timestamp);
        Ok(snapshots)
    }

    pub async fn latest(&self) -> Result<Option<SnapshotReference>> {
        Ok(self.list().await?.pop())
    }
}

/// Decides whether two snapshots share a header, reading only their first lines.
#[derive(Debug, Clone, Copy)]
pub struct KeyCompatibilityChecker {
    delimiter: char,
}

impl Default for KeyCompatibilityChecker {
    fn default() -> Self {
        Self { delimiter: ',' }
    }
}

impl KeyCompatibilityChecker {
    pub fn new(delimiter: char) -> Self {
        Self { delimiter }
    }

    pub async fn keys_match(&self, a: &Path, b: &Path) -> Result<bool> {
        let (keys_a, keys_b) = tokio::try_join!(self.header_keys(a), self.header_keys(b))?;
        Ok(keys_a == keys_b)
    }

    /// Header keys as the CSV reader sees them, so quoted and bare names compare equal.
    pub async fn header_keys(&self, path: &Path) -> Result<HashSet<String>> {
        let delimiter = u8::try_from(self.delimiter).map_err(|_| {
            SyncError::Config(format!("delimiter {:?} is not a single byte", self.delimiter))
        })?;
        let line = read_first_line(path).await?;

        let mut header = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .from_reader(line.as_bytes());
        let mut keys = HashSet::new();
        if let Some(row) = header.records().next() {
            let row = row.map_err(|e| SyncError::unreadable(path, e))?;
            keys.extend(row.iter().map(str::to_string));
        }
        Ok(keys)
    }
}

async fn read_first_line(path: &Path) -> Result<String> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| SyncError::unreadable(path, e))?;
    let mut reader = BufReader::new(file).take(MAX_HEADER_BYTES);
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .await
        .map_err(|e| SyncError::unreadable(path, e))?;
    if read as u64 == MAX_HEADER_BYTES && !line.ends_with('\n') {
        return Err(SyncError::unreadable(
            path,
            format!("header row exceeds {MAX_HEADER_BYTES} bytes"),
        ));
    }

    let line = line.trim_end_matches(['\n', '\r']);
    Ok(line.strip_prefix('\u{feff}').unwrap_or(line).to_string())
}
