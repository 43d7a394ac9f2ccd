use serde::Deserialize;
use std::path::PathBuf;

use crate::errors::{Result, SyncError};

const ENV_PREFIX: &str = "INDEXSYNC_";

#[derive(Deserialize, Debug, Clone)]
pub struct SyncConfig {
    pub elasticsearch_url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Directory holding the `csv_<timestamp>` snapshot directories.
    pub snapshot_root: PathBuf,
    /// Local SQLite file recording synchronization passes.
    pub catalog_path: PathBuf,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default = "default_id_field")]
    pub id_field: String,
    /// Program and leading arguments; the old, new and output paths are appended.
    #[serde(default = "default_diff_command")]
    pub diff_command: Vec<String>,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default = "default_bootstrap_batch_size")]
    pub bootstrap_batch_size: usize,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_collection() -> String {
    "collection".to_string()
}

fn default_delimiter() -> char {
    ','
}

fn default_id_field() -> String {
    "id".to_string()
}

fn default_diff_command() -> Vec<String> {
    vec!["python".to_string(), "py_csv_diff/py_csv_diff.py".to_string()]
}

fn default_max_in_flight() -> usize {
    64
}

fn default_bootstrap_batch_size() -> usize {
    500
}

impl SyncConfig {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        let base_path = base_path.into();
        Self {
            elasticsearch_url: "http://localhost:9200".to_string(),
            collection: default_collection(),
            snapshot_root: base_path.join("snapshots"),
            catalog_path: base_path.join("catalog.sqlite"),
            delimiter: default_delimiter(),
            id_field: default_id_field(),
            diff_command: default_diff_command(),
            max_in_flight: default_max_in_flight(),
            bootstrap_batch_size: default_bootstrap_batch_size(),
            username: None,
            password: None,
        }
    }

    /// Loads `.env` if present, then reads `INDEXSYNC_*` variables on top of the defaults
    /// for `base_path`.
    pub fn from_env(base_path: impl Into<PathBuf>) -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(base_path, |key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(base_path: impl Into<PathBuf>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let mut config = Self::new(base_path);

        if let Some(url) = get("ELASTICSEARCH_URL") {
            config.elasticsearch_url = url;
        }
        if let Some(collection) = get("COLLECTION") {
            config.collection = collection;
        }
        if let Some(root) = get("SNAPSHOT_ROOT") {
            config.snapshot_root = PathBuf::from(root);
        }
        if let Some(path) = get("CATALOG_PATH") {
            config.catalog_path = PathBuf::from(path);
        }
        if let Some(delimiter) = get("DELIMITER") {
            let mut chars = delimiter.chars();
            config.delimiter = match (chars.next(), chars.next()) {
                (Some(c), None) => c,
                _ => {
                    return Err(SyncError::Config(format!(
                        "delimiter must be a single character, got '{}'",
                        delimiter
                    )));
                }
            };
        }
        if let Some(field) = get("ID_FIELD") {
            config.id_field = field;
        }
        if let Some(command) = get("DIFF_COMMAND") {
            config.diff_command = command.split_whitespace().map(str::to_string).collect();
        }
        if let Some(n) = get("MAX_IN_FLIGHT") {
            config.max_in_flight = parse_count("MAX_IN_FLIGHT", &n)?;
        }
        if let Some(n) = get("BOOTSTRAP_BATCH_SIZE") {
            config.bootstrap_batch_size = parse_count("BOOTSTRAP_BATCH_SIZE", &n)?;
        }
        config.username = get("USERNAME");
        config.password = get("PASSWORD");

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.delimiter_byte()?;
        if self.diff_command.is_empty() {
            return Err(SyncError::Config("diff command must not be empty".into()));
        }
        if self.max_in_flight == 0 || self.bootstrap_batch_size == 0 {
            return Err(SyncError::Config(
                "max_in_flight and bootstrap_batch_size must be positive".into(),
            ));
        }
        if self.id_field.is_empty() {
            return Err(SyncError::Config("id field must not be empty".into()));
        }
        Ok(())
    }

    /// The delimiter as the single byte the CSV reader expects.
    pub fn delimiter_byte(&self) -> Result<u8> {
        if self.delimiter.is_ascii() {
            Ok(self.delimiter as u8)
        } else {
            Err(SyncError::Config(format!(
                "delimiter '{}' is not a single-byte character",
                self.delimiter
            )))
        }
    }
}

fn parse_count(name: &str, raw: &str) -> Result<usize> {
    raw.trim()
        .parse()
        .map_err(|_| SyncError::Config(format!("{ENV_PREFIX}{name} must be a number, got '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_live_under_base_path() {
        let config = SyncConfig::new("/data/sync");
        assert_eq!(config.snapshot_root, PathBuf::from("/data/sync/snapshots"));
        assert_eq!(config.catalog_path, PathBuf::from("/data/sync/catalog.sqlite"));
        assert_eq!(config.delimiter_byte().unwrap(), b',');
        assert!(config.validate().is_ok());
    }

    #[test]
    fn lookup_overrides_defaults() {
        let vars: HashMap<&str, &str> = [
            ("INDEXSYNC_ELASTICSEARCH_URL", "http://es:9200"),
            ("INDEXSYNC_DELIMITER", "|"),
            ("INDEXSYNC_DIFF_COMMAND", "csv-diff --format json"),
            ("INDEXSYNC_MAX_IN_FLIGHT", "8"),
        ]
        .into_iter()
        .collect();
        let config =
            SyncConfig::from_lookup("/tmp/x", |k| vars.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.elasticsearch_url, "http://es:9200");
        assert_eq!(config.delimiter, '|');
        assert_eq!(config.diff_command, vec!["csv-diff", "--format", "json"]);
        assert_eq!(config.max_in_flight, 8);
        assert_eq!(config.collection, "collection");
    }

    #[test]
    fn rejects_bad_values() {
        let multi = SyncConfig::from_lookup("/tmp/x", |k| {
            (k == "INDEXSYNC_DELIMITER").then(|| ";;".to_string())
        });
        assert!(matches!(multi, Err(SyncError::Config(_))));

        let zero = SyncConfig::from_lookup("/tmp/x", |k| {
            (k == "INDEXSYNC_MAX_IN_FLIGHT").then(|| "0".to_string())
        });
        assert!(matches!(zero, Err(SyncError::Config(_))));

        let mut config = SyncConfig::new("/tmp/x");
        config.delimiter = '§';
        assert!(config.delimiter_byte().is_err());
    }
}
