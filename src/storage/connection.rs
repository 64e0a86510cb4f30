//! Database connection management
//!
//! Opens the SQLite file backing the index, applies the pragmas and makes
//! sure both tables exist. The returned connection is owned by
//! `PersistentIndex` for the rest of its life.

use std::path::Path;
use rusqlite::Connection;
use crate::error::{Result, IndexerError};

/// Open (or create) the index database at `db_path`.
pub fn open_connection(db_path: &Path) -> Result<Connection> {
    let db_dir = db_path.parent()
        .ok_or_else(|| IndexerError::InvalidPath(format!("Invalid database path: {}", db_path.display())))?;

    if !db_dir.as_os_str().is_empty() {
        std::fs::create_dir_all(db_dir)
            .map_err(IndexerError::Io)?;
    }

    let conn = Connection::open(db_path)
        .map_err(IndexerError::Database)?;

    // Enable WAL mode for better concurrent access. The pragma answers with
    // the resulting mode, which may differ on filesystems without WAL support
    let mode: String = conn.pragma_update_and_check(None, "journal_mode", WAL, |row| row.get(0))?;
    tracing::debug!("[Index] Journal mode: {}", mode);

    // Optimize for performance
    conn.pragma_update(None, "synchronous", NORMAL)?;

    create_tables(&conn)?;
    tracing::info!("[Index] Database opened: {}", db_path.display());

    Ok(conn)
}

/// Private in-memory database, used by tests and dry runs.
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    create_tables(&conn)?;
    Ok(conn)
}

fn create_tables(conn: &Connection) -> Result<()> {
    let initialized_db = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='file_registry'",
        [],
        |row| row.get::<_, i32>(0),
    )? == 0;

    conn.execute_batch(r#"
        CREATE TABLE IF NOT EXISTS file_registry (
            abs_path TEXT NOT NULL PRIMARY KEY,
            mtime INTEGER NOT NULL,
            size INTEGER NOT NULL DEFAULT 0,
            is_recognized INTEGER NOT NULL DEFAULT 0,
            content_id TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        CREATE INDEX IF NOT EXISTS file_registry_by_content
            ON file_registry(content_id);

        CREATE TABLE IF NOT EXISTS attachment_links (
            storage_key TEXT NOT NULL PRIMARY KEY,
            content_id TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );
    "#)?;

    if initialized_db {
        tracing::info!("[Index] Initialized new database with all tables");
    } else {
        tracing::debug!("[Index] Loaded existing database");
    }
    Ok(())
}

// SQL pragma constants
const WAL: &str = "WAL";
const NORMAL: &str = "NORMAL";
