//! Change-set computation between two snapshots.
//!
//! The diff itself is delegated to an external tool that writes a JSON document of the form
//! `{"added": [{..}], "changed": [{"key": [id], "fields": {f: {"from", "to"}}}], "removed": [{"id"}]}`.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map as JsonMap, Value as JsonValue};
use tokio::process::Command;

use crate::errors::{Result, SyncError};
use crate::models::{
    ChangeSet, ChangedRecord, FieldChange, Record, coerce_document_id, json_to_field_value,
};

#[async_trait]
pub trait SnapshotDiffProvider: Send + Sync {
    /// Computes what changed from `old` to `new`. Both paths point at `objects.csv` files.
    async fn diff(&self, old: &Path, new: &Path) -> Result<ChangeSet>;
}

#[derive(Deserialize)]
struct DiffDocument {
    #[serde(default)]
    added: Vec<JsonMap<String, JsonValue>>,
    #[serde(default)]
    changed: Vec<ChangedEntry>,
    #[serde(default)]
    removed: Vec<JsonMap<String, JsonValue>>,
}

#[derive(Deserialize)]
struct ChangedEntry {
    key: ChangedKey,
    #[serde(default)]
    fields: BTreeMap<String, FieldChangeEntry>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ChangedKey {
    Composite(Vec<JsonValue>),
    Single(JsonValue),
}

#[derive(Deserialize)]
struct FieldChangeEntry {
    #[serde(default)]
    from: JsonValue,
    #[serde(default)]
    to: JsonValue,
}

impl ChangeSet {
    /// Parses the diff tool's JSON output. Ids of changed and removed entries must coerce to
    /// integers; added records are validated later, one operation at a time.
    pub fn from_diff_json(raw: &[u8], id_field: &str) -> Result<Self> {
        let doc: DiffDocument = serde_json::from_slice(raw)
            .map_err(|e| SyncError::DiffToolFailure(format!("malformed diff output: {}", e)))?;

        let added = doc.added.iter().map(Record::from_json_map).collect();

        let mut changed = Vec::with_capacity(doc.changed.len());
        for entry in doc.changed {
            let key = match &entry.key {
                ChangedKey::Composite(parts) => parts.first(),
                ChangedKey::Single(value) => Some(value),
            }
            .ok_or_else(|| SyncError::DiffToolFailure("changed entry with empty key".into()))?;
            let id = coerce_document_id(key).map_err(|e| SyncError::DiffToolFailure(e.to_string()))?;
            let fields = entry
                .fields
                .into_iter()
                .map(|(name, change)| {
                    let change = FieldChange {
                        from: json_to_field_value(&change.from),
                        to: json_to_field_value(&change.to),
                    };
                    (name, change)
                })
                .collect();
            changed.push(ChangedRecord { id, fields });
        }

        let mut removed = Vec::with_capacity(doc.removed.len());
        for entry in &doc.removed {
            let value = entry.get(id_field).ok_or_else(|| {
                SyncError::DiffToolFailure(format!("removed entry without '{}'", id_field))
            })?;
            removed.push(coerce_document_id(value).map_err(|e| SyncError::DiffToolFailure(e.to_string()))?);
        }

        Ok(ChangeSet {
            added,
            changed,
            removed,
        })
    }
}

/// Runs an external diff program as `<program> <args..> <old> <new> <output.json>`.
pub struct CommandDiffProvider {
    program: String,
    args: Vec<String>,
    id_field: String,
}

impl CommandDiffProvider {
    pub fn new(program: impl Into<String>, args: Vec<String>, id_field: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args,
            id_field: id_field.into(),
        }
    }

    /// Builds a provider from a command line such as `["python", "py_csv_diff.py"]`.
    pub fn from_command_line(command: &[String], id_field: impl Into<String>) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| SyncError::Config("diff command must not be empty".into()))?;
        Ok(Self::new(program.clone(), args.to_vec(), id_field))
    }
}

#[async_trait]
impl SnapshotDiffProvider for CommandDiffProvider {
    async fn diff(&self, old: &Path, new: &Path) -> Result<ChangeSet> {
        let workdir = tempfile::tempdir()?;
        let output_path = workdir.path().join("diff.json");

        log::info!(
            "Running diff tool {} on {} and {}",
            self.program,
            old.display(),
            new.display()
        );
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(old)
            .arg(new)
            .arg(&output_path)
            .output()
            .await
            .map_err(|e| SyncError::DiffToolFailure(format!("could not start {}: {}", self.program, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            log::info!("diff tool stdout: {}", stdout.trim());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            log::warn!("diff tool stderr: {}", stderr.trim());
        }

        if !output.status.success() {
            return Err(SyncError::DiffToolFailure(format!(
                "{} exited with {}",
                self.program, output.status
            )));
        }

        let raw = tokio::fs::read(&output_path).await.map_err(|e| {
            SyncError::DiffToolFailure(format!("no output at {}: {}", output_path.display(), e))
        })?;
        ChangeSet::from_diff_json(&raw, &self.id_field)
    }
}
