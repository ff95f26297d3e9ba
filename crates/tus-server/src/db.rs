//! Database module for persisting upload session records.
//!
//! Uses SQLite so that declared lengths, offsets and display names survive a
//! restart. The in-memory [`SessionStore`](crate::session::SessionStore) is
//! the authority at runtime; this is its write-through backing.

use std::path::Path;

use rusqlite::{Connection, params};
use thiserror::Error;
use uuid::Uuid;

use crate::session::SessionRecord;

/// Database error type.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),
}

/// Database handle for session records.
pub struct SessionDb {
    conn: Connection,
}

impl SessionDb {
    /// Open or create the session database.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), DbError> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id BLOB PRIMARY KEY,
                declared_length INTEGER NOT NULL,
                received_offset INTEGER NOT NULL DEFAULT 0,
                completed INTEGER NOT NULL DEFAULT 0,
                display_name TEXT,
                created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            );
            "#,
        )?;
        Ok(())
    }

    /// Insert a freshly created session.
    pub fn insert_session(&self, record: &SessionRecord) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO sessions (id, declared_length, received_offset, completed, display_name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.id.as_bytes().as_slice(),
                record.declared_length as i64,
                record.received_offset as i64,
                record.completed,
                record.display_name,
                record.created_at,
            ],
        )?;
        Ok(())
    }

    /// Persist the mutable fields of a session.
    pub fn update_session(&self, record: &SessionRecord) -> Result<(), DbError> {
        let rows = self.conn.execute(
            "UPDATE sessions SET received_offset = ?1, completed = ?2 WHERE id = ?3",
            params![
                record.received_offset as i64,
                record.completed,
                record.id.as_bytes().as_slice(),
            ],
        )?;
        if rows == 0 {
            return Err(DbError::SessionNotFound(record.id));
        }
        Ok(())
    }

    /// Load every stored session.
    pub fn load_sessions(&self) -> Result<Vec<SessionRecord>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, declared_length, received_offset, completed, display_name, created_at
             FROM sessions",
        )?;

        let rows = stmt.query_map([], |row| {
            let id_bytes: Vec<u8> = row.get(0)?;
            let declared_length: i64 = row.get(1)?;
            let received_offset: i64 = row.get(2)?;
            let completed: bool = row.get(3)?;
            let display_name: Option<String> = row.get(4)?;
            let created_at: i64 = row.get(5)?;

            let id = Uuid::from_slice(&id_bytes).map_err(|_| {
                rusqlite::Error::InvalidColumnType(0, "id".into(), rusqlite::types::Type::Blob)
            })?;

            Ok(SessionRecord {
                id,
                declared_length: declared_length.max(0) as u64,
                received_offset: received_offset.max(0) as u64,
                completed,
                display_name,
                created_at,
            })
        })?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }
        Ok(sessions)
    }
}
