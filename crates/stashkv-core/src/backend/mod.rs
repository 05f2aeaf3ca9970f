//! Durable backend adapters.
//!
//! The cache engine consumes a backend only through [`Backend`]: row upsert,
//! row delete, point and namespace queries, and an explicit commit boundary.
//! Every mutation joins the current transaction; nothing is durable until
//! [`Backend::commit`] returns.
//!
//! # Public Types
//!
//! - [`SqliteBackend`]: `rusqlite` table `keyval(key, namespace, value)`
//! - [`MemoryBackend`]: transactional in-memory backend with fault injection

mod memory;
mod sqlite;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

use thiserror::Error;

/// Errors reported by a backend adapter.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The backend refused a single action (constraint, bad input).
    #[error("action rejected: {0}")]
    Rejected(String),

    /// The backend could not be opened.
    #[error("cannot open backend: {0}")]
    Open(String),

    /// Commit failed; the open transaction state is unknown.
    #[error("commit failed: {0}")]
    Commit(String),

    /// SQLite error.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// A transactional key/value table partitioned by namespace.
///
/// Implementations are driven from a single writer thread plus occasional
/// reads, always under the owning backing store's lock, so `&mut self` is
/// enough. Reads must observe writes of the still-open transaction.
pub trait Backend: Send {
    /// Insert or replace the row `(key, namespace)`.
    fn upsert(&mut self, key: &str, namespace: &str, value: &[u8]) -> Result<(), BackendError>;

    /// Delete the row `(key, namespace)`. Deleting a missing row is not an error.
    fn delete(&mut self, key: &str, namespace: &str) -> Result<(), BackendError>;

    /// Fetch one row's value.
    fn get_one(&mut self, key: &str, namespace: &str) -> Result<Option<Vec<u8>>, BackendError>;

    /// Fetch every `(key, value)` of a namespace.
    fn get_all_in_namespace(
        &mut self,
        namespace: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, BackendError>;

    /// Fetch every key of a namespace.
    fn get_all_keys_in_namespace(&mut self, namespace: &str) -> Result<Vec<String>, BackendError>;

    /// Commit the open transaction, if any.
    fn commit(&mut self) -> Result<(), BackendError>;
}

impl<B: Backend + ?Sized> Backend for Box<B> {
    fn upsert(&mut self, key: &str, namespace: &str, value: &[u8]) -> Result<(), BackendError> {
        (**self).upsert(key, namespace, value)
    }

    fn delete(&mut self, key: &str, namespace: &str) -> Result<(), BackendError> {
        (**self).delete(key, namespace)
    }

    fn get_one(&mut self, key: &str, namespace: &str) -> Result<Option<Vec<u8>>, BackendError> {
        (**self).get_one(key, namespace)
    }

    fn get_all_in_namespace(
        &mut self,
        namespace: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, BackendError> {
        (**self).get_all_in_namespace(namespace)
    }

    fn get_all_keys_in_namespace(&mut self, namespace: &str) -> Result<Vec<String>, BackendError> {
        (**self).get_all_keys_in_namespace(namespace)
    }

    fn commit(&mut self) -> Result<(), BackendError> {
        (**self).commit()
    }
}
