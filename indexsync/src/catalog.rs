use crate::config::SyncConfig;
use crate::errors::{Result, SyncError};
use crate::models::{PassLog, SnapshotReference, SyncMode};
use rusqlite::{Connection, params};
use std::sync::{Arc, Mutex, MutexGuard};

pub const STATUS_RUNNING: &str = "RUNNING";
pub const STATUS_SUCCEEDED: &str = "SUCCESS";
pub const STATUS_FAILED: &str = "FAILED";

/// Local history of synchronization passes.
pub struct Catalog {
    conn: Arc<Mutex<Connection>>,
}

impl Catalog {
    pub fn new(config: &SyncConfig) -> Result<Self> {
        if let Some(parent) = config.catalog_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&config.catalog_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn initialize_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS sync_passes (
                pass_id INTEGER PRIMARY KEY AUTOINCREMENT,
                snapshot_path TEXT NOT NULL,
                snapshot_timestamp INTEGER,
                mode TEXT,
                start_time INTEGER NOT NULL,
                end_time INTEGER,
                status TEXT NOT NULL,
                details TEXT NOT NULL DEFAULT ''
            );
            COMMIT;",
        )?;
        Ok(())
    }

    /// Opens a pass in the `RUNNING` state. The timestamp is unknown when the requested
    /// path could not be resolved to a snapshot.
    pub fn create_pass_log(&self, snapshot_path: &str, snapshot: Option<&SnapshotReference>) -> Result<i64> {
        let conn = self.lock()?;
        let start_time = chrono::Utc::now().timestamp();
        conn.execute(
            "INSERT INTO sync_passes (snapshot_path, snapshot_timestamp, start_time, status)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                snapshot_path,
                snapshot.map(|s| s.timestamp),
                start_time,
                STATUS_RUNNING
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn finish_pass_log(
        &self,
        pass_id: i64,
        status: &str,
        mode: Option<SyncMode>,
        details: &str,
    ) -> Result<()> {
        let conn = self.lock()?;
        let end_time = chrono::Utc::now().timestamp();
        conn.execute(
            "UPDATE sync_passes SET status = ?1, mode = ?2, details = ?3, end_time = ?4 WHERE pass_id = ?5",
            params![status, mode.map(|m| m.as_str()), details, end_time, pass_id],
        )?;
        Ok(())
    }

    /// Most recent passes first.
    pub fn list_passes(&self, limit: usize) -> Result<Vec<PassLog>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT pass_id, snapshot_path, snapshot_timestamp, mode, start_time, end_time, status, details
             FROM sync_passes ORDER BY pass_id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(PassLog {
                pass_id: row.get(0)?,
                snapshot_path: row.get(1)?,
                snapshot_timestamp: row.get(2)?,
                mode: row.get(3)?,
                start_time: row.get(4)?,
                end_time: row.get(5)?,
                status: row.get(6)?,
                details: row.get(7)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| SyncError::Other(anyhow::anyhow!("catalog connection mutex poisoned")))
    }
}
