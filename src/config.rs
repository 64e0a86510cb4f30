//! Configuration for the indexer.
//!
//! The host hands over a TOML file; only a handful of options matter here.
//! Missing files and missing keys fall back to defaults, in which case the
//! indexer stays disabled.
//!
//! ## Example Configuration File
//!
//! ```toml
//! storage_directory = "/var/lib/orthanc/db"
//! log_level = "info"
//!
//! [indexer]
//! enable = true
//! folders = ["/data/dicom", "/mnt/archive"]
//! interval = 10
//! ```

use crate::error::{IndexerError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_STORAGE_DIRECTORY: &str = "OrthancStorage";
pub const DEFAULT_INTERVAL_SECONDS: u64 = 10;
pub const DATABASE_FILE_NAME: &str = "indexer-plugin.db";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the internal physical storage
    pub storage_directory: PathBuf,

    /// Folder for the index database (None = storage directory)
    pub index_directory: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    pub indexer: IndexerSection,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage_directory: PathBuf::from(DEFAULT_STORAGE_DIRECTORY),
            index_directory: None,
            log_level: "info".to_string(),
            indexer: IndexerSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerSection {
    pub enable: bool,

    /// Directories to watch; required when enabled
    pub folders: Vec<PathBuf>,

    /// Seconds between two scan passes
    pub interval: u64,

    /// Explicit database path, overriding the directory-based default
    pub database: Option<PathBuf>,
}

impl Default for IndexerSection {
    fn default() -> Self {
        IndexerSection {
            enable: false,
            folders: Vec::new(),
            interval: DEFAULT_INTERVAL_SECONDS,
            database: None,
        }
    }
}

/// Options after validation and defaulting, ready for startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub folders: Vec<PathBuf>,
    pub interval: Duration,
    pub database_path: PathBuf,
    pub storage_root: PathBuf,
}

impl Config {
    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("[Config] {} not found, using defaults", path.display());
            return Ok(Config::default());
        }

        tracing::info!("[Config] Loading configuration from {}", path.display());
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| IndexerError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate the indexer options and derive the database path. Creates
    /// the database folder when it comes from a directory option.
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        if self.indexer.folders.is_empty() {
            return Err(IndexerError::Config(
                "Missing configuration option for the indexer: folders".to_string(),
            ));
        }

        let database_path = match &self.indexer.database {
            Some(path) => path.clone(),
            None => {
                let folder = self.index_directory.as_ref().unwrap_or(&self.storage_directory);
                fs::create_dir_all(folder)?;
                folder.join(DATABASE_FILE_NAME)
            }
        };

        Ok(ResolvedConfig {
            folders: self.indexer.folders.clone(),
            interval: Duration::from_secs(self.indexer.interval),
            database_path,
            storage_root: self.storage_directory.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(!config.indexer.enable);
        assert_eq!(config.indexer.interval, 10);
        assert_eq!(config.storage_directory, PathBuf::from("OrthancStorage"));
    }

    #[test]
    fn test_load_nonexistent() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load_from(&temp_dir.path().join("nonexistent.toml")).unwrap();
        assert!(!config.indexer.enable);
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("indexer.toml");
        fs::write(&path, "log_level = \"debug\"\n[indexer]\nenable = true\ninterval = 5\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert!(config.indexer.enable);
        assert_eq!(config.indexer.interval, 5);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_parse_and_resolve() {
        let temp_dir = TempDir::new().unwrap();
        let storage = temp_dir.path().join("storage");
        let contents = format!(
            "storage_directory = {:?}\n[indexer]\nenable = true\nfolders = [\"/data/a\", \"/data/b\"]\n",
            storage.display().to_string()
        );

        let config = Config::parse(&contents).unwrap();
        assert!(config.indexer.enable);
        let resolved = config.resolve().unwrap();
        assert_eq!(resolved.folders.len(), 2);
        assert_eq!(resolved.interval, Duration::from_secs(10));
        assert_eq!(resolved.database_path, storage.join("indexer-plugin.db"));
        assert_eq!(resolved.storage_root, storage);
        assert!(storage.is_dir());
    }

    #[test]
    fn test_index_directory_and_database_override() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.indexer.folders = vec![PathBuf::from("/data")];
        config.storage_directory = temp_dir.path().join("storage");
        config.index_directory = Some(temp_dir.path().join("index"));
        config.indexer.interval = 3;

        let resolved = config.resolve().unwrap();
        assert_eq!(resolved.database_path, temp_dir.path().join("index").join("indexer-plugin.db"));
        assert_eq!(resolved.interval, Duration::from_secs(3));

        config.indexer.database = Some(temp_dir.path().join("custom.db"));
        assert_eq!(config.resolve().unwrap().database_path, temp_dir.path().join("custom.db"));
    }

    #[test]
    fn test_empty_folders_rejected() {
        let mut config = Config::default();
        config.indexer.enable = true;
        assert!(matches!(config.resolve(), Err(IndexerError::Config(_))));
    }

    #[test]
    fn test_malformed_file_rejected() {
        assert!(matches!(Config::parse("[indexer]\nfolders = 7"), Err(IndexerError::Config(_))));
    }
}
