//! DICOM folder indexer
//!
//! Keeps a persistent index of the files found under a set of watched
//! folders and lets the host's storage area point at those files instead
//! of copying them:
//! - Scanner (walks the folders, ingests new instances, retracts gone ones)
//! - Router (storage-area callbacks over linked files or internal blobs)
//! - Monitor (background worker running scan passes on an interval)

pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod monitor;
pub mod plugin;
pub mod state;
pub mod storage;

pub use config::{Config, ResolvedConfig};
pub use error::{IndexerError, Result};
pub use engine::{ContentIdentifier, ContentKind, DirectoryScanner, InstanceSink, LogSink, StorageRouter, StoredBytes};
pub use monitor::Monitor;
pub use plugin::{ErrorCode, HostEvent, IndexerPlugin};
pub use state::IndexerContext;
pub use storage::{BoundedFileView, FileRecord, PersistentIndex, Placement};
