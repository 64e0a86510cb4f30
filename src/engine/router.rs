// FILE: src/engine/router.rs
//! Storage router: the host's storage-area contract over two backends.
//!
//! A DICOM attachment whose instance is already indexed from a watched
//! folder is stored as a link to that file. Everything else goes to the
//! internal blob store. Reads follow whichever placement the index reports.

use std::ops::Deref;
use std::sync::Arc;
use crate::engine::ContentIdentifier;
use crate::error::Result;
use crate::storage::blob_store::BlobStore;
use crate::storage::{BoundedFileView, PersistentIndex, Placement};

/// Declared type of a stored object, as announced by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Unknown,
    Dicom,
    DicomAsJson,
    DicomUntilPixelData,
}

impl ContentKind {
    /// Host wire value.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => ContentKind::Dicom,
            2 => ContentKind::DicomAsJson,
            3 => ContentKind::DicomUntilPixelData,
            _ => ContentKind::Unknown,
        }
    }

    fn may_link(self) -> bool {
        self == ContentKind::Dicom
    }
}

/// Bytes returned by a read, tagged by where they came from.
#[derive(Debug)]
pub enum StoredBytes {
    Linked(BoundedFileView),
    Physical(Vec<u8>),
}

impl StoredBytes {
    pub fn is_linked(&self) -> bool {
        matches!(self, StoredBytes::Linked(_))
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            StoredBytes::Linked(view) => view.as_slice(),
            StoredBytes::Physical(bytes) => bytes.as_slice(),
        }
    }

    pub fn into_vec(self) -> Vec<u8> {
        match self {
            StoredBytes::Linked(view) => view.to_vec(),
            StoredBytes::Physical(bytes) => bytes,
        }
    }
}

impl Deref for StoredBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

pub struct StorageRouter {
    index: Arc<PersistentIndex>,
    identifier: Arc<dyn ContentIdentifier>,
    blobs: Arc<dyn BlobStore>,
}

impl StorageRouter {
    pub fn new(
        index: Arc<PersistentIndex>,
        identifier: Arc<dyn ContentIdentifier>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self { index, identifier, blobs }
    }

    fn placement(&self, storage_key: &str, kind: ContentKind) -> Result<Placement> {
        if !kind.may_link() {
            return Ok(Placement::Physical);
        }
        self.index.resolve_attachment(storage_key)
    }

    pub fn create(&self, storage_key: &str, bytes: &[u8], kind: ContentKind) -> Result<Placement> {
        if kind.may_link() {
            if let Some(content_id) = self.identifier.identify_bytes(bytes) {
                let placement = self.index.link_attachment(storage_key, &content_id)?;
                if let Placement::Linked(path) = &placement {
                    tracing::debug!("[Router] {} links to external file {}", storage_key, path.display());
                    return Ok(placement);
                }
            }
        }

        self.blobs.put(storage_key, bytes)?;
        Ok(Placement::Physical)
    }

    pub fn read_whole(&self, storage_key: &str, kind: ContentKind) -> Result<StoredBytes> {
        match self.placement(storage_key, kind)? {
            Placement::Linked(path) => Ok(StoredBytes::Linked(BoundedFileView::open(&path, 0, 0)?)),
            Placement::Physical => Ok(StoredBytes::Physical(self.blobs.get_whole(storage_key)?)),
        }
    }

    pub fn read_range(&self, storage_key: &str, kind: ContentKind, range_start: u64) -> Result<StoredBytes> {
        match self.placement(storage_key, kind)? {
            Placement::Linked(path) => Ok(StoredBytes::Linked(BoundedFileView::open(&path, range_start, 0)?)),
            Placement::Physical => Ok(StoredBytes::Physical(self.blobs.get_range(storage_key, range_start)?)),
        }
    }

    /// Linked objects only lose their link; the external file belongs to
    /// the watched folder and is never touched.
    pub fn remove(&self, storage_key: &str, kind: ContentKind) -> Result<()> {
        if !kind.may_link() {
            return self.blobs.delete(storage_key);
        }

        let placement = self.index.resolve_attachment(storage_key)?;
        let had_link = self.index.unlink_attachment(storage_key)?;

        match placement {
            Placement::Linked(path) => {
                tracing::debug!("[Router] Unlinked {} from {}", storage_key, path.display());
                Ok(())
            }
            // A link whose file record vanished has nothing stored internally
            Placement::Physical if had_link => Ok(()),
            Placement::Physical => self.blobs.delete(storage_key),
        }
    }
}
