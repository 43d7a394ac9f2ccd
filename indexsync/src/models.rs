use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::errors::{Result, SyncError};

/// Integer identifier shared by a catalog record and its indexed document.
pub type DocumentId = i64;

/// A single field value as stored in the index. Empty strings never survive as `Some("")`.
pub type FieldValue = Option<String>;

/// Identifies one exported snapshot on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotReference {
    /// Taken from the `csv_<timestamp>` directory name.
    pub timestamp: i64,
    /// Path of the snapshot's `objects.csv`.
    pub path: PathBuf,
}

// --- Index metadata (stored as the `meta` document) ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct IndexMetadata {
    #[serde(rename = "hasImportedCSV")]
    pub has_imported_snapshot: bool,
    #[serde(rename = "lastCSVImportTimestamp")]
    pub last_import_timestamp: i64,
}

impl IndexMetadata {
    pub fn imported(timestamp: i64) -> Self {
        Self {
            has_imported_snapshot: true,
            last_import_timestamp: timestamp,
        }
    }
}

/// One catalog entity: field name to optional scalar.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Record {
    fields: BTreeMap<String, FieldValue>,
}

impl Record {
    /// Builds a record from raw strings, normalizing empty values to `None`.
    pub fn from_raw<K, V, I>(fields: I) -> Self
    where
        K: Into<String>,
        V: AsRef<str>,
        I: IntoIterator<Item = (K, V)>,
    {
        let fields = fields
            .into_iter()
            .map(|(k, v)| (k.into(), normalize(v.as_ref())))
            .collect();
        Self { fields }
    }

    /// Builds a record from a JSON object whose values are scalars.
    pub fn from_json_map(map: &JsonMap<String, JsonValue>) -> Self {
        let fields = map
            .iter()
            .map(|(k, v)| (k.clone(), json_to_field_value(v)))
            .collect();
        Self { fields }
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(|v| v.as_deref())
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl AsRef<str>) {
        self.fields.insert(field.into(), normalize(value.as_ref()));
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Extracts and coerces the primary key.
    pub fn id(&self, id_field: &str) -> Result<DocumentId> {
        let raw = self.get(id_field).ok_or_else(|| {
            SyncError::InvalidRecord(format!("missing primary key field '{}'", id_field))
        })?;
        parse_document_id(raw)
    }

    /// Produces the index body for this record. The primary key is written as a JSON integer,
    /// absent values as null.
    pub fn to_document(&self, id_field: &str) -> Result<(DocumentId, JsonValue)> {
        let id = self.id(id_field)?;
        let mut body = JsonMap::with_capacity(self.fields.len());
        for (key, value) in &self.fields {
            let json = if key == id_field {
                JsonValue::from(id)
            } else {
                field_value_to_json(value)
            };
            body.insert(key.clone(), json);
        }
        Ok((id, JsonValue::Object(body)))
    }
}

fn normalize(value: &str) -> FieldValue {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

pub fn field_value_to_json(value: &FieldValue) -> JsonValue {
    match value {
        Some(s) => JsonValue::String(s.clone()),
        None => JsonValue::Null,
    }
}

/// Converts a JSON scalar to a field value. Nested values are kept as their JSON text.
pub fn json_to_field_value(value: &JsonValue) -> FieldValue {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => normalize(s),
        JsonValue::Bool(b) => Some(b.to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

pub fn parse_document_id(raw: &str) -> Result<DocumentId> {
    raw.trim()
        .parse::<DocumentId>()
        .map_err(|_| SyncError::InvalidRecord(format!("primary key '{}' is not an integer", raw)))
}

/// Coerces a JSON id (number or numeric string) to a document id.
pub fn coerce_document_id(value: &JsonValue) -> Result<DocumentId> {
    match value {
        JsonValue::Number(n) => n
            .as_i64()
            .ok_or_else(|| SyncError::InvalidRecord(format!("primary key {} is not an integer", n))),
        JsonValue::String(s) => parse_document_id(s),
        other => Err(SyncError::InvalidRecord(format!(
            "primary key {} is not an integer",
            other
        ))),
    }
}

// --- Change sets ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldChange {
    pub from: FieldValue,
    pub to: FieldValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangedRecord {
    pub id: DocumentId,
    pub fields: BTreeMap<String, FieldChange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ChangeSet {
    pub added: Vec<Record>,
    pub changed: Vec<ChangedRecord>,
    pub removed: Vec<DocumentId>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

// --- Pass results ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Nothing had been imported; full load.
    Bootstrap,
    /// Header keys changed since the last import; full load.
    SchemaReload,
    /// Change-set applied on top of the last import.
    Incremental,
    /// The requested snapshot is already the last import.
    AlreadyCurrent,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Bootstrap => "bootstrap",
            SyncMode::SchemaReload => "schema_reload",
            SyncMode::Incremental => "incremental",
            SyncMode::AlreadyCurrent => "already_current",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

/// A document operation that did not resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationFailure {
    pub kind: OperationKind,
    /// `None` when the record's primary key could not be coerced.
    pub id: Option<DocumentId>,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub snapshot: SnapshotReference,
    pub mode: SyncMode,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Deletes that found nothing to delete.
    pub missing_deletes: usize,
}

impl SyncReport {
    pub fn unchanged(snapshot: SnapshotReference) -> Self {
        Self {
            snapshot,
            mode: SyncMode::AlreadyCurrent,
            created: 0,
            updated: 0,
            deleted: 0,
            missing_deletes: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub metadata: IndexMetadata,
    pub document_count: u64,
}

// --- Pass catalog (SQLite) models ---

#[derive(Debug, Clone, Serialize)]
pub struct PassLog {
    pub pass_id: i64,
    pub snapshot_path: String,
    pub snapshot_timestamp: Option<i64>,
    pub mode: Option<String>,
    pub start_time: i64, // Unix timestamp
    pub end_time: Option<i64>,
    pub status: String,
    pub details: String,
}
