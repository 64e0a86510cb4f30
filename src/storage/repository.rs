// FILE: src/storage/repository.rs
use rusqlite::{Connection, OptionalExtension, params};
use crate::error::{Result, IndexerError};
use crate::storage::FileRecord;

/// Raw SQL access to the two index tables.
///
/// Borrows a connection (or a transaction, which derefs to one); locking and
/// transaction boundaries belong to `PersistentIndex`.
pub struct Repository<'a> {
    conn: &'a Connection,
}

impl<'a> Repository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn get_file(&self, abs_path: &str) -> Result<Option<FileRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT abs_path, mtime, size, is_recognized, content_id FROM file_registry WHERE abs_path = ?1"
        )?;
        let result = stmt.query_row(params![abs_path], Self::map_file);
        match result {
            Ok(r) => Ok(Some(r)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(IndexerError::Database(e)),
        }
    }

    pub fn get_all_files(&self) -> Result<Vec<FileRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT abs_path, mtime, size, is_recognized, content_id FROM file_registry ORDER BY abs_path"
        )?;
        let rows = stmt.query_map([], Self::map_file)?;
        let mut results = Vec::new();
        for r in rows { results.push(r?); }
        Ok(results)
    }

    /// Oldest recognized file carrying `content_id`, if any. Rows keep
    /// their rowid across upserts, so this is the first writer still alive.
    pub fn find_path_by_content(&self, content_id: &str) -> Result<Option<String>> {
        Ok(self.conn.query_row(
            "SELECT abs_path FROM file_registry WHERE content_id = ?1 AND is_recognized = 1
             ORDER BY rowid LIMIT 1",
            params![content_id],
            |r| r.get(0),
        ).optional()?)
    }

    /// Number of recognized files carrying `content_id`.
    pub fn count_by_content(&self, content_id: &str) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM file_registry WHERE content_id = ?1 AND is_recognized = 1",
            params![content_id],
            |r| r.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn upsert_file(&self, abs_path: &str, mtime: u64, size: u64, is_recognized: bool, content_id: Option<&str>) -> Result<()> {
        self.conn.execute(
            "INSERT INTO file_registry (abs_path, mtime, size, is_recognized, content_id)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(abs_path) DO UPDATE SET
                 mtime = excluded.mtime,
                 size = excluded.size,
                 is_recognized = excluded.is_recognized,
                 content_id = excluded.content_id,
                 updated_at = CURRENT_TIMESTAMP",
            params![abs_path, mtime as i64, size as i64, if is_recognized { 1 } else { 0 }, content_id],
        )?;
        Ok(())
    }

    pub fn delete_file(&self, abs_path: &str) -> Result<bool> {
        let rows = self.conn.execute("DELETE FROM file_registry WHERE abs_path = ?1", params![abs_path])
            .map_err(IndexerError::Database)?;
        Ok(rows > 0)
    }

    pub fn count_files(&self) -> Result<u64> {
        let count: i64 = self.conn.query_row("SELECT COUNT(*) FROM file_registry", [], |r| r.get(0))?;
        Ok(count as u64)
    }

    pub fn insert_link(&self, storage_key: &str, content_id: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO attachment_links (storage_key, content_id) VALUES (?1, ?2)
             ON CONFLICT(storage_key) DO UPDATE SET content_id = excluded.content_id",
            params![storage_key, content_id],
        )?;
        Ok(())
    }

    /// Backing path of a linked key. `None` when unlinked or when the
    /// record the link points to has disappeared.
    pub fn resolve_link(&self, storage_key: &str) -> Result<Option<String>> {
        Ok(self.conn.query_row(
            "SELECT fr.abs_path FROM attachment_links al
             JOIN file_registry fr ON fr.content_id = al.content_id AND fr.is_recognized = 1
             WHERE al.storage_key = ?1
             ORDER BY fr.rowid LIMIT 1",
            params![storage_key],
            |r| r.get(0),
        ).optional()?)
    }

    pub fn delete_link(&self, storage_key: &str) -> Result<bool> {
        let rows = self.conn.execute("DELETE FROM attachment_links WHERE storage_key = ?1", params![storage_key])?;
        Ok(rows > 0)
    }

    pub fn count_links(&self) -> Result<u64> {
        let count: i64 = self.conn.query_row("SELECT COUNT(*) FROM attachment_links", [], |r| r.get(0))?;
        Ok(count as u64)
    }

    fn map_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRecord> {
        Ok(FileRecord {
            abs_path: row.get(0)?,
            mtime: row.get::<_, i64>(1)? as u64,
            size: row.get::<_, i64>(2)? as u64,
            is_recognized: row.get::<_, i32>(3)? != 0,
            content_id: row.get(4)?,
        })
    }
}
