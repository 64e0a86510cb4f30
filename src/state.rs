// FILE: src/state.rs

use std::sync::Arc;
use std::time::Duration;
use crate::config::ResolvedConfig;
use crate::engine::{ContentIdentifier, DirectoryScanner, InstanceSink, StorageRouter};
use crate::error::Result;
use crate::storage::blob_store::BlobStore;
use crate::storage::{FilesystemBlobStore, PersistentIndex};

/// Everything the indexer shares between the scan worker and the host's
/// storage threads, built once at startup.
///
/// Dropping the context drops the last handle on the index and closes the
/// database connection.
pub struct IndexerContext {
    pub index: Arc<PersistentIndex>,
    pub scanner: Arc<DirectoryScanner>,
    pub router: Arc<StorageRouter>,
    pub interval: Duration,
}

impl IndexerContext {
    pub fn new(
        index: Arc<PersistentIndex>,
        identifier: Arc<dyn ContentIdentifier>,
        sink: Arc<dyn InstanceSink>,
        blobs: Arc<dyn BlobStore>,
        folders: Vec<std::path::PathBuf>,
        interval: Duration,
    ) -> Self {
        let scanner = DirectoryScanner::new(folders, Arc::clone(&index), Arc::clone(&identifier), sink);
        let router = StorageRouter::new(Arc::clone(&index), identifier, blobs);
        Self {
            index,
            scanner: Arc::new(scanner),
            router: Arc::new(router),
            interval,
        }
    }

    /// Open the on-disk index and blob store named by `config`.
    pub fn from_config(
        config: &ResolvedConfig,
        identifier: Arc<dyn ContentIdentifier>,
        sink: Arc<dyn InstanceSink>,
    ) -> Result<Self> {
        let index = Arc::new(PersistentIndex::open(&config.database_path)?);
        let blobs = Arc::new(FilesystemBlobStore::new(&config.storage_root));
        Ok(Self::new(index, identifier, sink, blobs, config.folders.clone(), config.interval))
    }
}
