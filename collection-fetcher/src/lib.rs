//! Pulls a catalog out of a remote collection-management service and writes it as
//! `csv_<timestamp>/objects.csv` snapshots that `indexsync` can load.

pub mod client;
pub mod error;
pub mod export;
pub mod models;
pub mod reader;

pub use client::{CollectionService, HttpCollectionService};
pub use error::{FetcherError, Result};
pub use export::{ExportSummary, SnapshotExporter};
pub use reader::UrlCollectionReader;
