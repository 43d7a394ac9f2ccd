use std::path::PathBuf;

use thiserror::Error;

use crate::models::{DocumentId, OperationFailure};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("index synchronizer used before initialize() was called")]
    NotInitialized,

    #[error("search backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("snapshot unreadable at {}: {reason}", path.display())]
    SnapshotUnreadable { path: PathBuf, reason: String },

    #[error("invalid snapshot location: {0}")]
    InvalidSnapshot(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("diff tool failed: {0}")]
    DiffToolFailure(String),

    #[error("document {0} already exists")]
    DuplicateId(DocumentId),

    #[error("document {0} not found")]
    NotFound(DocumentId),

    #[error("{} of {attempted} document operations failed", failures.len())]
    PartialApply {
        attempted: usize,
        failures: Vec<OperationFailure>,
    },

    #[error("SQLite operation failed: {0}")]
    SQLite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::BackendUnavailable(err.to_string())
    }
}

impl SyncError {
    pub(crate) fn unreadable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        SyncError::SnapshotUnreadable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
