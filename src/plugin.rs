// FILE: src/plugin.rs
//! Host-facing glue: lifecycle events and the storage-area callbacks.
//!
//! Errors never cross this boundary as Rust errors; each callback logs the
//! failure and hands the host a numeric code.

use std::sync::Arc;
use crate::config::Config;
use crate::core::DicomIdentifier;
use crate::engine::{ContentKind, InstanceSink, StoredBytes};
use crate::error::{IndexerError, Result};
use crate::monitor::Monitor;
use crate::state::IndexerContext;

/// Host lifecycle notifications the indexer reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    Started,
    Stopped,
    Other,
}

/// Status codes returned to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    InternalError = -1,
    Success = 0,
    Plugin = 1,
    ParameterOutOfRange = 3,
    InexistentItem = 7,
    Database = 11,
    InexistentFile = 13,
    CannotWriteFile = 14,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl From<&IndexerError> for ErrorCode {
    fn from(err: &IndexerError) -> Self {
        match err {
            IndexerError::Database(_) => ErrorCode::Database,
            IndexerError::NotFound(_) => ErrorCode::InexistentItem,
            IndexerError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => ErrorCode::InexistentFile,
            IndexerError::Io(_) => ErrorCode::CannotWriteFile,
            IndexerError::InvalidPath(_) => ErrorCode::ParameterOutOfRange,
            IndexerError::Config(_) | IndexerError::Other(_) => ErrorCode::Plugin,
            IndexerError::State(_) => ErrorCode::InternalError,
        }
    }
}

fn report(operation: &str, storage_key: &str, err: &IndexerError) -> ErrorCode {
    tracing::error!("[Plugin] {} failed for {}: {}", operation, storage_key, err);
    ErrorCode::from(err)
}

pub struct IndexerPlugin {
    context: IndexerContext,
    monitor: Monitor,
}

impl IndexerPlugin {
    /// Returns `None` when the indexer is disabled in the configuration.
    pub fn initialize(config: &Config, sink: Arc<dyn InstanceSink>) -> Result<Option<Self>> {
        if !config.indexer.enable {
            tracing::warn!("[Plugin] Indexer is disabled by the configuration");
            return Ok(None);
        }

        let resolved = config.resolve()?;
        for folder in &resolved.folders {
            tracing::warn!("[Plugin] Monitored folder: {}", folder.display());
        }
        tracing::warn!("[Plugin] Path to the database: {}", resolved.database_path.display());

        let context = IndexerContext::from_config(&resolved, Arc::new(DicomIdentifier), sink)?;
        let monitor = Monitor::new(Arc::clone(&context.scanner), context.interval);
        Ok(Some(Self { context, monitor }))
    }

    pub fn context(&self) -> &IndexerContext {
        &self.context
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor.is_running()
    }

    pub fn on_change(&mut self, event: HostEvent) -> ErrorCode {
        match event {
            HostEvent::Started => match self.monitor.start() {
                Ok(()) => ErrorCode::Success,
                Err(e) => report("Start", "monitor", &e),
            },
            HostEvent::Stopped => {
                self.monitor.stop();
                ErrorCode::Success
            }
            HostEvent::Other => ErrorCode::Success,
        }
    }

    pub fn storage_create(&self, storage_key: &str, bytes: &[u8], kind: ContentKind) -> ErrorCode {
        match self.context.router.create(storage_key, bytes, kind) {
            Ok(_) => ErrorCode::Success,
            Err(e) => report("Create", storage_key, &e),
        }
    }

    pub fn storage_read_whole(&self, storage_key: &str, kind: ContentKind) -> std::result::Result<StoredBytes, ErrorCode> {
        self.context
            .router
            .read_whole(storage_key, kind)
            .map_err(|e| report("Read", storage_key, &e))
    }

    pub fn storage_read_range(
        &self,
        storage_key: &str,
        kind: ContentKind,
        range_start: u64,
    ) -> std::result::Result<StoredBytes, ErrorCode> {
        self.context
            .router
            .read_range(storage_key, kind, range_start)
            .map_err(|e| report("Read range", storage_key, &e))
    }

    pub fn storage_remove(&self, storage_key: &str, kind: ContentKind) -> ErrorCode {
        match self.context.router.remove(storage_key, kind) {
            Ok(()) => ErrorCode::Success,
            Err(e) => report("Remove", storage_key, &e),
        }
    }

    /// Stop the worker, then release the index.
    pub fn finalize(mut self) {
        self.monitor.stop();
        tracing::info!("[Plugin] Finalized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dicom::testing::part10;
    use crate::engine::testing::RecordingSink;
    use std::path::PathBuf;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn config_for(dir: &TempDir) -> Config {
        let watched = dir.path().join("watched");
        std::fs::create_dir_all(&watched).unwrap();
        let mut config = Config::default();
        config.storage_directory = dir.path().join("storage");
        config.indexer.enable = true;
        config.indexer.folders = vec![watched];
        config.indexer.interval = 1;
        config
    }

    fn wait_for(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn test_disabled_returns_none() {
        let plugin = IndexerPlugin::initialize(&Config::default(), Arc::new(RecordingSink::default())).unwrap();
        assert!(plugin.is_none());
    }

    #[test]
    fn test_enabled_without_folders_fails() {
        let mut config = Config::default();
        config.indexer.enable = true;
        let result = IndexerPlugin::initialize(&config, Arc::new(RecordingSink::default()));
        assert!(matches!(result, Err(IndexerError::Config(_))));
    }

    #[test]
    fn test_lifecycle_links_scanned_instance() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir);
        let dicom = part10("P1", "1.2", "1.2.3", "1.2.3.4");
        let external: PathBuf = config.indexer.folders[0].join("a.dcm");
        std::fs::write(&external, &dicom).unwrap();

        let sink = Arc::new(RecordingSink::default());
        let mut plugin = IndexerPlugin::initialize(&config, sink.clone()).unwrap().unwrap();
        assert!(dir.path().join("storage").join("indexer-plugin.db").is_file());

        assert_eq!(plugin.on_change(HostEvent::Started), ErrorCode::Success);
        assert!(plugin.is_monitoring());
        wait_for(|| !sink.ingested().is_empty());
        assert_eq!(sink.ingested(), vec![external.clone()]);

        // The host stores what it just ingested: linked, not copied
        assert_eq!(plugin.storage_create("att-0001", &dicom, ContentKind::Dicom), ErrorCode::Success);
        let read = plugin.storage_read_whole("att-0001", ContentKind::Dicom).unwrap();
        assert!(read.is_linked());
        assert_eq!(&read[..], &dicom[..]);

        assert_eq!(plugin.on_change(HostEvent::Stopped), ErrorCode::Success);
        assert!(!plugin.is_monitoring());
        plugin.finalize();
        assert!(external.is_file());
    }

    #[test]
    fn test_physical_storage_round_trip() {
        let dir = TempDir::new().unwrap();
        let plugin = IndexerPlugin::initialize(&config_for(&dir), Arc::new(RecordingSink::default()))
            .unwrap()
            .unwrap();

        assert_eq!(plugin.storage_create("att-0002", b"0123456789", ContentKind::Unknown), ErrorCode::Success);
        let tail = plugin.storage_read_range("att-0002", ContentKind::Unknown, 4).unwrap();
        assert_eq!(&tail[..], b"456789");

        assert_eq!(plugin.storage_remove("att-0002", ContentKind::Unknown), ErrorCode::Success);
        let missing = plugin.storage_read_whole("att-0002", ContentKind::Unknown).unwrap_err();
        assert_eq!(missing, ErrorCode::InexistentItem);
        plugin.finalize();
    }

    #[test]
    fn test_error_codes() {
        let io = IndexerError::Io(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert_eq!(ErrorCode::from(&io), ErrorCode::InexistentFile);
        assert_eq!(ErrorCode::from(&IndexerError::InvalidPath("x".into())), ErrorCode::ParameterOutOfRange);
        assert_eq!(ErrorCode::InexistentFile.code(), 13);
        assert_eq!(ErrorCode::InternalError.code(), -1);
    }
}
