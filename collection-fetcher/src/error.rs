use indexsync::errors::SyncError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetcherError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("collection API error: {0}")]
    Api(String),

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

pub type Result<T> = std::result::Result<T, FetcherError>;

impl From<FetcherError> for SyncError {
    fn from(err: FetcherError) -> Self {
        match err {
            FetcherError::Sync(inner) => inner,
            FetcherError::Request(e) => SyncError::BackendUnavailable(e.to_string()),
            FetcherError::Api(message) => SyncError::BackendUnavailable(message),
            FetcherError::Json(e) => SyncError::InvalidRecord(e.to_string()),
            other => SyncError::Other(anyhow::Error::new(other)),
        }
    }
}
