// FILE: src/storage/mod.rs
pub mod connection;
pub mod repository;
pub mod index;
pub mod file_view;
pub mod blob_store;

// Common exports
pub use index::PersistentIndex;
pub use file_view::BoundedFileView;
pub use blob_store::FilesystemBlobStore;

use std::path::{Path, PathBuf};

// Data Types
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub abs_path: String,
    pub mtime: u64,
    pub size: u64,
    pub is_recognized: bool,
    pub content_id: Option<String>,
}

impl FileRecord {
    pub fn path(&self) -> &Path {
        Path::new(&self.abs_path)
    }
}

impl std::fmt::Display for FileRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (mtime: {}, size: {}, content: {})",
            self.abs_path, self.mtime, self.size, self.content_id.as_deref().unwrap_or("-"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    New,
    Modified,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub status: FileStatus,
    /// Content id of the stored record, if it carried one.
    pub previous_content_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The oldest record carrying its content id.
    Primary,
    /// An older record already carries the content id.
    Duplicate,
}

/// Result of overwriting a file record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    /// `None` when the new content was not recognized.
    pub outcome: Option<UpsertOutcome>,
    /// Content id the path carried before that no record carries any more.
    pub orphaned_content_id: Option<String>,
}

/// Where the bytes of a storage key live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Aliases an indexed file; nothing is stored internally.
    Linked(PathBuf),
    /// Stored in the internal blob store.
    Physical,
}

impl Placement {
    pub fn is_linked(&self) -> bool {
        matches!(self, Placement::Linked(_))
    }
}
