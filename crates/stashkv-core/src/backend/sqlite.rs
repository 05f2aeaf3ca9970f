//! SQLite backend over a single `keyval` table.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use super::{Backend, BackendError};
use crate::config::SqliteConfig;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS keyval (
    key       TEXT NOT NULL,
    namespace TEXT NOT NULL,
    value     BLOB NOT NULL,
    PRIMARY KEY (key, namespace)
)";

/// SQLite-backed [`Backend`].
///
/// Auto-commit is disabled: the first mutation after a commit opens a
/// transaction that stays open until [`Backend::commit`].
pub struct SqliteBackend {
    conn: Connection,
    in_transaction: bool,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("conn", &"<sqlite>")
            .field("in_transaction", &self.in_transaction)
            .finish()
    }
}

impl SqliteBackend {
    /// Open (or create) the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the schema created.
    pub fn open<P: AsRef<Path>>(path: P, config: &SqliteConfig) -> Result<Self, BackendError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| BackendError::Open(format!("{}: {e}", path.display())))?;
        Self::from_connection(conn, config)
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite cannot allocate the database.
    pub fn open_in_memory() -> Result<Self, BackendError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, &SqliteConfig::default())
    }

    fn from_connection(conn: Connection, config: &SqliteConfig) -> Result<Self, BackendError> {
        conn.pragma_update(None, "journal_mode", config.journal_mode.as_str())?;
        conn.pragma_update(None, "synchronous", config.synchronous.as_str())?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            in_transaction: false,
        })
    }

    fn begin_if_needed(&mut self) -> Result<(), BackendError> {
        if !self.in_transaction {
            self.conn.execute_batch("BEGIN")?;
            self.in_transaction = true;
        }
        Ok(())
    }
}

impl Backend for SqliteBackend {
    fn upsert(&mut self, key: &str, namespace: &str, value: &[u8]) -> Result<(), BackendError> {
        self.begin_if_needed()?;
        self.conn
            .prepare_cached("INSERT OR REPLACE INTO keyval (key, namespace, value) VALUES (?1, ?2, ?3)")?
            .execute(params![key, namespace, value])
            .map_err(|e| BackendError::Rejected(e.to_string()))?;
        Ok(())
    }

    fn delete(&mut self, key: &str, namespace: &str) -> Result<(), BackendError> {
        self.begin_if_needed()?;
        self.conn
            .prepare_cached("DELETE FROM keyval WHERE key = ?1 AND namespace = ?2")?
            .execute(params![key, namespace])
            .map_err(|e| BackendError::Rejected(e.to_string()))?;
        Ok(())
    }

    fn get_one(&mut self, key: &str, namespace: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let value = self
            .conn
            .prepare_cached("SELECT value FROM keyval WHERE key = ?1 AND namespace = ?2")?
            .query_row(params![key, namespace], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn get_all_in_namespace(
        &mut self,
        namespace: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, BackendError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT key, value FROM keyval WHERE namespace = ?1")?;
        let rows = stmt.query_map(params![namespace], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let entries = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn get_all_keys_in_namespace(&mut self, namespace: &str) -> Result<Vec<String>, BackendError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT key FROM keyval WHERE namespace = ?1")?;
        let rows = stmt.query_map(params![namespace], |row| row.get(0))?;
        let keys = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    fn commit(&mut self) -> Result<(), BackendError> {
        if self.in_transaction {
            self.conn
                .execute_batch("COMMIT")
                .map_err(|e| BackendError::Commit(e.to_string()))?;
            self.in_transaction = false;
        }
        Ok(())
    }
}
