// FILE: src/engine/mod.rs
pub mod scanner;
pub mod router;

pub use scanner::{DirectoryScanner, ScanStats};
pub use router::{StorageRouter, StoredBytes, ContentKind};

use std::path::Path;
use crate::error::Result;

/// Derives a stable identifier from the domain-significant fields of a
/// payload. Must not depend on file name, location or timestamps.
pub trait ContentIdentifier: Send + Sync {
    fn identify_bytes(&self, bytes: &[u8]) -> Option<String>;
}

/// Downstream consumer of recognized content. Both calls are best-effort:
/// callers log failures and never retry.
pub trait InstanceSink: Send + Sync {
    fn ingest(&self, source: &Path, bytes: &[u8]) -> Result<()>;

    fn retract(&self, content_id: &str) -> Result<()>;
}

/// Sink that only reports what it would have done.
#[derive(Debug, Default)]
pub struct LogSink;

impl InstanceSink for LogSink {
    fn ingest(&self, source: &Path, bytes: &[u8]) -> Result<()> {
        tracing::info!("[Sink] Ingest {} ({} bytes)", source.display(), bytes.len());
        Ok(())
    }

    fn retract(&self, content_id: &str) -> Result<()> {
        tracing::info!("[Sink] Retract {}", content_id);
        Ok(())
    }
}
