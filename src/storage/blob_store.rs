//! Internal physical storage for attachments that are not linked.
//!
//! Layout follows the host's filesystem storage: `<root>/ab/cd/abcd...`,
//! fanning out on the first two pairs of key characters.

use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use crate::error::{Result, IndexerError};

/// Key-addressed blob store. Implementations must tolerate concurrent
/// access to distinct keys.
pub trait BlobStore: Send + Sync {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;

    fn get_whole(&self, key: &str) -> Result<Vec<u8>>;

    /// Bytes from `start` to the end of the blob; empty if `start` is past it.
    fn get_range(&self, key: &str, start: u64) -> Result<Vec<u8>>;

    /// Idempotent.
    fn delete(&self, key: &str) -> Result<()>;
}

pub struct FilesystemBlobStore {
    root: PathBuf,
}

impl FilesystemBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, key: &str) -> Result<PathBuf> {
        let valid = key.len() >= 4 && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !valid {
            return Err(IndexerError::InvalidPath(format!("Invalid storage key: {:?}", key)));
        }
        Ok(self.root.join(&key[0..2]).join(&key[2..4]).join(key))
    }

    fn open_blob(&self, key: &str) -> Result<fs::File> {
        let path = self.blob_path(key)?;
        fs::File::open(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => IndexerError::NotFound(format!("Storage key {}", key)),
            _ => IndexerError::Io(e),
        })
    }

    fn prune_empty_parents(&self, blob: &Path) {
        let mut current = blob.parent();
        while let Some(dir) = current {
            if dir == self.root.as_path() || !dir.starts_with(&self.root) {
                break;
            }
            // Fails on non-empty directories, which is the stop condition
            if fs::remove_dir(dir).is_err() {
                break;
            }
            current = dir.parent();
        }
    }
}

impl BlobStore for FilesystemBlobStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.blob_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;

        tracing::debug!("[BlobStore] Stored {} ({} bytes)", key, bytes.len());
        Ok(())
    }

    fn get_whole(&self, key: &str) -> Result<Vec<u8>> {
        let mut file = self.open_blob(key)?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;
        Ok(buffer)
    }

    fn get_range(&self, key: &str, start: u64) -> Result<Vec<u8>> {
        let mut file = self.open_blob(key)?;
        let size = file.metadata()?.len();
        if start >= size {
            return Ok(Vec::new());
        }
        file.seek(SeekFrom::Start(start))?;
        let mut buffer = Vec::with_capacity((size - start) as usize);
        file.read_to_end(&mut buffer)?;
        Ok(buffer)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.blob_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!("[BlobStore] Deleted {}", key);
                self.prune_empty_parents(&path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("[BlobStore] Delete of absent key {}", key);
                Ok(())
            }
            Err(e) => Err(IndexerError::Io(e)),
        }
    }
}
