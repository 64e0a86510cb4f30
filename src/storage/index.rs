//! The persistent index: file states plus attachment links.
//!
//! One SQLite connection behind one mutex. Every public operation takes the
//! lock for its whole duration, so a classification never interleaves with
//! a link lookup issued from a storage request thread.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use rusqlite::Connection;
use crate::error::{Result, IndexerError};
use crate::storage::connection::{open_connection, open_in_memory};
use crate::storage::repository::Repository;
use crate::storage::{Classification, FileRecord, FileStatus, Placement, Replacement, UpsertOutcome};

pub struct PersistentIndex {
    conn: Mutex<Connection>,
}

impl PersistentIndex {
    pub fn open(db_path: &Path) -> Result<Self> {
        Ok(Self { conn: Mutex::new(open_connection(db_path)?) })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Mutex::new(open_in_memory()?) })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| IndexerError::State("Poisoned lock".into()))
    }

    /// Compare the observed (mtime, size) against the stored record.
    pub fn classify_file(&self, abs_path: &str, mtime: u64, size: u64) -> Result<Classification> {
        let conn = self.lock()?;
        let repo = Repository::new(&conn);

        let classification = match repo.get_file(abs_path)? {
            None => Classification { status: FileStatus::New, previous_content_id: None },
            Some(record) => {
                let status = if record.mtime == mtime && record.size == size {
                    FileStatus::Unchanged
                } else {
                    FileStatus::Modified
                };
                Classification { status, previous_content_id: record.content_id }
            }
        };
        Ok(classification)
    }

    /// Record a recognized file. Every copy keeps the content id; the oldest
    /// surviving path carrying it is the primary, later ones are duplicate
    /// observations that must not trigger a second ingestion.
    pub fn upsert_recognized(&self, abs_path: &str, mtime: u64, size: u64, content_id: &str) -> Result<UpsertOutcome> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let outcome = store_recognized(&Repository::new(&tx), abs_path, mtime, size, content_id)?;
        tx.commit()?;
        Ok(outcome)
    }

    pub fn upsert_unrecognized(&self, abs_path: &str, mtime: u64, size: u64) -> Result<()> {
        let conn = self.lock()?;
        Repository::new(&conn).upsert_file(abs_path, mtime, size, false, None)
    }

    /// Overwrite the record for `abs_path` in one transaction and report the
    /// content id it used to carry if no record carries it any more. A failed
    /// write leaves the previous record in place.
    pub fn replace_file(&self, abs_path: &str, mtime: u64, size: u64, content_id: Option<&str>) -> Result<Replacement> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let replacement = {
            let repo = Repository::new(&tx);
            let previous = repo.get_file(abs_path)?.and_then(|record| record.content_id);

            let outcome = match content_id {
                Some(id) => Some(store_recognized(&repo, abs_path, mtime, size, id)?),
                None => {
                    repo.upsert_file(abs_path, mtime, size, false, None)?;
                    None
                }
            };

            let orphaned_content_id = match previous {
                Some(old) if Some(old.as_str()) != content_id && repo.count_by_content(&old)? == 0 => Some(old),
                Some(old) => {
                    tracing::debug!("[Index] Content {} still indexed", old);
                    None
                }
                None => None,
            };
            Replacement { outcome, orphaned_content_id }
        };
        tx.commit()?;
        Ok(replacement)
    }

    /// Delete the record for `abs_path`. Returns true only when the removed
    /// record carried a content id that no remaining record carries, i.e.
    /// when a retraction is warranted.
    pub fn remove_file(&self, abs_path: &str) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let last_reference = {
            let repo = Repository::new(&tx);
            match repo.get_file(abs_path)? {
                Some(record) => {
                    repo.delete_file(abs_path)?;
                    match record.content_id {
                        Some(id) if record.is_recognized => repo.count_by_content(&id)? == 0,
                        _ => false,
                    }
                }
                None => false,
            }
        };
        tx.commit()?;
        Ok(last_reference)
    }

    pub fn file(&self, abs_path: &str) -> Result<Option<FileRecord>> {
        let conn = self.lock()?;
        Repository::new(&conn).get_file(abs_path)
    }

    /// Snapshot of every record. Each call reads afresh; iteration happens
    /// after the lock is released.
    pub fn files(&self) -> Result<impl Iterator<Item = FileRecord>> {
        let conn = self.lock()?;
        let records = Repository::new(&conn).get_all_files()?;
        Ok(records.into_iter())
    }

    pub fn file_count(&self) -> Result<u64> {
        let conn = self.lock()?;
        Repository::new(&conn).count_files()
    }

    /// Alias `storage_key` to the recognized file carrying `content_id`.
    /// `Physical` means no such file is indexed and the caller must store
    /// the bytes itself.
    pub fn link_attachment(&self, storage_key: &str, content_id: &str) -> Result<Placement> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let placement = {
            let repo = Repository::new(&tx);
            match repo.find_path_by_content(content_id)? {
                Some(path) => {
                    repo.insert_link(storage_key, content_id)?;
                    Placement::Linked(PathBuf::from(path))
                }
                None => Placement::Physical,
            }
        };
        tx.commit()?;

        if let Placement::Linked(path) = &placement {
            tracing::debug!("[Index] Linked {} -> {}", storage_key, path.display());
        }
        Ok(placement)
    }

    pub fn resolve_attachment(&self, storage_key: &str) -> Result<Placement> {
        let conn = self.lock()?;
        Ok(match Repository::new(&conn).resolve_link(storage_key)? {
            Some(path) => Placement::Linked(PathBuf::from(path)),
            None => Placement::Physical,
        })
    }

    /// Idempotent. Reports whether a link row was present.
    pub fn unlink_attachment(&self, storage_key: &str) -> Result<bool> {
        let conn = self.lock()?;
        Repository::new(&conn).delete_link(storage_key)
    }

    pub fn attachment_count(&self) -> Result<u64> {
        let conn = self.lock()?;
        Repository::new(&conn).count_links()
    }
}

fn store_recognized(repo: &Repository<'_>, abs_path: &str, mtime: u64, size: u64, content_id: &str) -> Result<UpsertOutcome> {
    let outcome = match repo.find_path_by_content(content_id)? {
        Some(owner) if owner != abs_path => {
            tracing::debug!("[Index] {} duplicates {} (content {})", abs_path, owner, content_id);
            UpsertOutcome::Duplicate
        }
        _ => UpsertOutcome::Primary,
    };
    repo.upsert_file(abs_path, mtime, size, true, Some(content_id))?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_classify_new_unchanged_modified() {
        let index = PersistentIndex::open_in_memory().unwrap();

        let c = index.classify_file("/data/a.dcm", 100, 42).unwrap();
        assert_eq!(c.status, FileStatus::New);
        assert!(c.previous_content_id.is_none());

        index.upsert_recognized("/data/a.dcm", 100, 42, "X1").unwrap();
        let c = index.classify_file("/data/a.dcm", 100, 42).unwrap();
        assert_eq!(c.status, FileStatus::Unchanged);
        assert_eq!(c.previous_content_id.as_deref(), Some("X1"));

        assert_eq!(index.classify_file("/data/a.dcm", 101, 42).unwrap().status, FileStatus::Modified);
        assert_eq!(index.classify_file("/data/a.dcm", 100, 43).unwrap().status, FileStatus::Modified);

        index.upsert_unrecognized("/data/b.txt", 5, 6).unwrap();
        let c = index.classify_file("/data/b.txt", 5, 6).unwrap();
        assert_eq!(c.status, FileStatus::Unchanged);
        assert!(c.previous_content_id.is_none());
    }

    #[test]
    fn test_remove_file_reports_content_once() {
        let index = PersistentIndex::open_in_memory().unwrap();
        assert!(!index.remove_file("/nowhere").unwrap());

        index.upsert_recognized("/data/a.dcm", 1, 2, "X1").unwrap();
        index.upsert_unrecognized("/data/b.txt", 1, 2).unwrap();

        assert!(index.remove_file("/data/a.dcm").unwrap());
        assert!(!index.remove_file("/data/a.dcm").unwrap());
        assert!(!index.remove_file("/data/b.txt").unwrap());
        assert_eq!(index.file_count().unwrap(), 0);
    }

    #[test]
    fn test_duplicate_content_first_writer_wins() {
        let index = PersistentIndex::open_in_memory().unwrap();
        assert_eq!(index.upsert_recognized("/a/one.dcm", 1, 10, "X1").unwrap(), UpsertOutcome::Primary);
        assert_eq!(index.upsert_recognized("/b/two.dcm", 1, 10, "X1").unwrap(), UpsertOutcome::Duplicate);

        let dup = index.file("/b/two.dcm").unwrap().unwrap();
        assert!(dup.is_recognized);
        assert_eq!(dup.content_id.as_deref(), Some("X1"));

        // Re-upserting either copy keeps the roles
        assert_eq!(index.upsert_recognized("/a/one.dcm", 2, 10, "X1").unwrap(), UpsertOutcome::Primary);
        assert_eq!(index.upsert_recognized("/b/two.dcm", 2, 10, "X1").unwrap(), UpsertOutcome::Duplicate);
        assert!(!index.remove_file("/b/two.dcm").unwrap());
        assert!(index.remove_file("/a/one.dcm").unwrap());
    }

    #[test]
    fn test_removing_primary_keeps_content_alive_in_copy() {
        let index = PersistentIndex::open_in_memory().unwrap();
        index.upsert_recognized("/a/one.dcm", 1, 10, "X1").unwrap();
        index.upsert_recognized("/b/two.dcm", 1, 10, "X1").unwrap();
        assert!(index.link_attachment("key-1", "X1").unwrap().is_linked());

        assert!(!index.remove_file("/a/one.dcm").unwrap());
        assert_eq!(index.resolve_attachment("key-1").unwrap(), Placement::Linked(PathBuf::from("/b/two.dcm")));

        // The surviving copy is now the primary
        assert_eq!(index.upsert_recognized("/b/two.dcm", 2, 10, "X1").unwrap(), UpsertOutcome::Primary);
        assert!(index.remove_file("/b/two.dcm").unwrap());
        assert_eq!(index.resolve_attachment("key-1").unwrap(), Placement::Physical);
    }

    #[test]
    fn test_replace_file_reports_orphaned_content() {
        let index = PersistentIndex::open_in_memory().unwrap();

        let r = index.replace_file("/a.dcm", 1, 1, Some("X1")).unwrap();
        assert_eq!(r, Replacement { outcome: Some(UpsertOutcome::Primary), orphaned_content_id: None });

        // Same content, new timestamp: nothing to retract
        let r = index.replace_file("/a.dcm", 2, 1, Some("X1")).unwrap();
        assert_eq!(r.orphaned_content_id, None);

        let r = index.replace_file("/a.dcm", 3, 1, Some("X2")).unwrap();
        assert_eq!(r.orphaned_content_id.as_deref(), Some("X1"));

        let r = index.replace_file("/a.dcm", 4, 1, None).unwrap();
        assert_eq!(r, Replacement { outcome: None, orphaned_content_id: Some("X2".to_string()) });
        assert!(!index.file("/a.dcm").unwrap().unwrap().is_recognized);
    }

    #[test]
    fn test_replace_file_keeps_content_held_by_copy() {
        let index = PersistentIndex::open_in_memory().unwrap();
        index.upsert_recognized("/a/one.dcm", 1, 10, "X1").unwrap();
        index.upsert_recognized("/b/two.dcm", 1, 10, "X1").unwrap();

        let r = index.replace_file("/a/one.dcm", 2, 12, Some("X2")).unwrap();
        assert_eq!(r.outcome, Some(UpsertOutcome::Primary));
        assert_eq!(r.orphaned_content_id, None);
        assert_eq!(index.file("/b/two.dcm").unwrap().unwrap().content_id.as_deref(), Some("X1"));
    }

    #[test]
    fn test_link_resolve_unlink() {
        let index = PersistentIndex::open_in_memory().unwrap();
        assert_eq!(index.link_attachment("key-1", "X1").unwrap(), Placement::Physical);
        assert_eq!(index.resolve_attachment("key-1").unwrap(), Placement::Physical);

        index.upsert_unrecognized("/data/x.bin", 1, 1).unwrap();
        index.upsert_recognized("/data/a.dcm", 1, 1, "X1").unwrap();

        let linked = index.link_attachment("key-1", "X1").unwrap();
        assert_eq!(linked, Placement::Linked(PathBuf::from("/data/a.dcm")));
        assert_eq!(index.resolve_attachment("key-1").unwrap(), linked);

        assert!(index.unlink_attachment("key-1").unwrap());
        assert!(!index.unlink_attachment("key-1").unwrap());
        assert_eq!(index.resolve_attachment("key-1").unwrap(), Placement::Physical);
    }

    #[test]
    fn test_dangling_link_resolves_to_nothing() {
        let index = PersistentIndex::open_in_memory().unwrap();
        index.upsert_recognized("/data/a.dcm", 1, 1, "X1").unwrap();
        assert!(index.link_attachment("key-1", "X1").unwrap().is_linked());

        index.remove_file("/data/a.dcm").unwrap();
        assert_eq!(index.resolve_attachment("key-1").unwrap(), Placement::Physical);
        assert_eq!(index.attachment_count().unwrap(), 1);
    }

    #[test]
    fn test_files_snapshot_is_restartable() {
        let index = PersistentIndex::open_in_memory().unwrap();
        index.upsert_recognized("/b.dcm", 1, 1, "X2").unwrap();
        index.upsert_unrecognized("/a.txt", 1, 1).unwrap();

        let first: Vec<String> = index.files().unwrap().map(|r| r.abs_path).collect();
        assert_eq!(first, vec!["/a.txt".to_string(), "/b.dcm".to_string()]);

        // Mutating while a snapshot is held must not deadlock
        let snapshot = index.files().unwrap();
        index.remove_file("/a.txt").unwrap();
        assert_eq!(snapshot.count(), 2);
        assert_eq!(index.files().unwrap().count(), 1);
    }

    #[test]
    fn test_state_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("indexer-plugin.db");
        {
            let index = PersistentIndex::open(&db_path).unwrap();
            index.upsert_recognized("/data/a.dcm", 7, 8, "X1").unwrap();
            index.link_attachment("key-1", "X1").unwrap();
        }
        let index = PersistentIndex::open(&db_path).unwrap();
        assert_eq!(index.classify_file("/data/a.dcm", 7, 8).unwrap().status, FileStatus::Unchanged);
        assert!(index.resolve_attachment("key-1").unwrap().is_linked());
    }
}
