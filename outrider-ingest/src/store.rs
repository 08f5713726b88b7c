//! SQLite metadata store.
//!
//! Two tables drive ingestion: `templates` maps an instance name to its
//! payload file and algorithm, and `user_tables` maps a user table name to
//! its alias, priority level, and algorithm. The schema is created on open
//! so a fresh database is immediately usable.

use crate::IngestResult;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::debug;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS templates (
        name      TEXT PRIMARY KEY,
        file_id   TEXT NOT NULL,
        algorithm TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS user_tables (
        name      TEXT PRIMARY KEY,
        alias     TEXT NOT NULL,
        priority  INTEGER NOT NULL,
        algorithm TEXT NOT NULL
    );
";

/// A row of the `templates` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateRow {
    /// Instance name.
    pub name: String,
    /// Payload file name inside the template data directory.
    pub file_id: String,
    /// Processing algorithm tag.
    pub algorithm: String,
}

/// A row of the `user_tables` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserTableRow {
    /// User table name; also the payload file name.
    pub name: String,
    /// User-visible record alias.
    pub alias: String,
    /// Producer priority level (0 high, 1 medium, otherwise low).
    pub priority: u8,
    /// Processing algorithm tag.
    pub algorithm: String,
}

/// Connection wrapper with the ingest query surface.
pub struct MetadataStore {
    conn: Connection,
}

impl MetadataStore {
    /// Open a store at the given path, creating the schema if needed.
    ///
    /// # Errors
    /// Returns [`crate::IngestError::Database`] on any SQLite failure.
    pub fn open<P: AsRef<Path>>(path: P) -> IngestResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        conn.execute_batch(SCHEMA)?;
        debug!(path = %path.as_ref().display(), "metadata store opened");
        Ok(Self { conn })
    }

    /// Open an in-memory store for testing.
    ///
    /// # Errors
    /// Returns [`crate::IngestError::Database`] on any SQLite failure.
    pub fn open_in_memory() -> IngestResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Insert or replace a template row.
    pub fn upsert_template(&self, row: &TemplateRow) -> IngestResult<()> {
        self.conn.execute(
            "INSERT INTO templates (name, file_id, algorithm) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET file_id = ?2, algorithm = ?3",
            params![row.name, row.file_id, row.algorithm],
        )?;
        Ok(())
    }

    /// Insert or replace a user-table row.
    pub fn upsert_user_table(&self, row: &UserTableRow) -> IngestResult<()> {
        self.conn.execute(
            "INSERT INTO user_tables (name, alias, priority, algorithm) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name) DO UPDATE SET alias = ?2, priority = ?3, algorithm = ?4",
            params![row.name, row.alias, row.priority, row.algorithm],
        )?;
        Ok(())
    }

    /// Fetch a template row by instance name.
    pub fn template(&self, name: &str) -> IngestResult<Option<TemplateRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT name, file_id, algorithm FROM templates WHERE name = ?1",
                params![name],
                |row| {
                    Ok(TemplateRow {
                        name: row.get(0)?,
                        file_id: row.get(1)?,
                        algorithm: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Fetch a user-table row by name.
    pub fn user_table(&self, name: &str) -> IngestResult<Option<UserTableRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT name, alias, priority, algorithm FROM user_tables WHERE name = ?1",
                params![name],
                |row| {
                    let priority: i64 = row.get(2)?;
                    Ok(UserTableRow {
                        name: row.get(0)?,
                        alias: row.get(1)?,
                        priority: u8::try_from(priority).unwrap_or(u8::MAX),
                        algorithm: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// List every user-table name in insertion order.
    pub fn user_table_names(&self) -> IngestResult<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT name FROM user_tables ORDER BY rowid")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }
}

impl std::fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataStore").finish_non_exhaustive()
    }
}
