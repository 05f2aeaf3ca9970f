//! Transactional in-memory backend.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{Backend, BackendError};

type RowKey = (String, String);

#[derive(Default)]
struct MemoryState {
    /// Durable rows keyed by (namespace, key).
    committed: BTreeMap<RowKey, Vec<u8>>,
    /// Open transaction: `None` marks a pending delete.
    staged: BTreeMap<RowKey, Option<Vec<u8>>>,
    rejected_keys: HashSet<String>,
    fail_commit: bool,
    write_delay: Duration,
    commits: u64,
}

/// In-memory [`Backend`] with transaction semantics.
///
/// Clones share the same tables, so a test can hand one clone to a backing
/// store and inspect committed state through another, or reopen a store
/// against the same "file" to simulate a restart. Uncommitted writes are
/// visible to reads through any clone, and lost on [`discard_uncommitted`].
///
/// [`discard_uncommitted`]: MemoryBackend::discard_uncommitted
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryBackend")
            .field("committed", &state.committed.len())
            .field("staged", &state.staged.len())
            .field("commits", &state.commits)
            .finish()
    }
}

impl MemoryBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed value of `(key, namespace)`.
    #[must_use]
    pub fn committed_value(&self, key: &str, namespace: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .committed
            .get(&(namespace.to_string(), key.to_string()))
            .cloned()
    }

    /// Committed rows of a namespace, ordered by key.
    #[must_use]
    pub fn committed_namespace(&self, namespace: &str) -> Vec<(String, Vec<u8>)> {
        self.state
            .lock()
            .committed
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|((_, key), value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Number of successful commits that flushed at least one change.
    #[must_use]
    pub fn commit_count(&self) -> u64 {
        self.state.lock().commits
    }

    /// Number of changes in the open transaction.
    #[must_use]
    pub fn staged_len(&self) -> usize {
        self.state.lock().staged.len()
    }

    /// Reject every future upsert or delete of `key`.
    pub fn reject_key(&self, key: &str) {
        self.state.lock().rejected_keys.insert(key.to_string());
    }

    /// Make every future commit fail.
    pub fn fail_commits(&self, fail: bool) {
        self.state.lock().fail_commit = fail;
    }

    /// Sleep for `delay` in every future upsert or delete, like a slow disk.
    pub fn delay_writes(&self, delay: Duration) {
        self.state.lock().write_delay = delay;
    }

    /// Drop the open transaction, as a crash would.
    pub fn discard_uncommitted(&self) {
        self.state.lock().staged.clear();
    }

    fn stage(&self, key: &str, namespace: &str, value: Option<&[u8]>) -> Result<(), BackendError> {
        let delay = self.state.lock().write_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let mut state = self.state.lock();
        if state.rejected_keys.contains(key) {
            return Err(BackendError::Rejected(format!("key '{key}' is rejected")));
        }
        state.staged.insert(
            (namespace.to_string(), key.to_string()),
            value.map(<[u8]>::to_vec),
        );
        Ok(())
    }
}

impl Backend for MemoryBackend {
    fn upsert(&mut self, key: &str, namespace: &str, value: &[u8]) -> Result<(), BackendError> {
        self.stage(key, namespace, Some(value))
    }

    fn delete(&mut self, key: &str, namespace: &str) -> Result<(), BackendError> {
        self.stage(key, namespace, None)
    }

    fn get_one(&mut self, key: &str, namespace: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let state = self.state.lock();
        let row = (namespace.to_string(), key.to_string());
        Ok(match state.staged.get(&row) {
            Some(staged) => staged.clone(),
            None => state.committed.get(&row).cloned(),
        })
    }

    fn get_all_in_namespace(
        &mut self,
        namespace: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, BackendError> {
        let state = self.state.lock();
        let mut rows: BTreeMap<String, Vec<u8>> = state
            .committed
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|((_, key), value)| (key.clone(), value.clone()))
            .collect();
        for ((ns, key), staged) in &state.staged {
            if ns != namespace {
                continue;
            }
            match staged {
                Some(value) => {
                    rows.insert(key.clone(), value.clone());
                }
                None => {
                    rows.remove(key);
                }
            }
        }
        Ok(rows.into_iter().collect())
    }

    fn get_all_keys_in_namespace(&mut self, namespace: &str) -> Result<Vec<String>, BackendError> {
        Ok(self
            .get_all_in_namespace(namespace)?
            .into_iter()
            .map(|(key, _)| key)
            .collect())
    }

    fn commit(&mut self) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        if state.fail_commit {
            return Err(BackendError::Commit("injected commit failure".to_string()));
        }
        if state.staged.is_empty() {
            return Ok(());
        }
        let staged = std::mem::take(&mut state.staged);
        for (row, change) in staged {
            match change {
                Some(value) => {
                    state.committed.insert(row, value);
                }
                None => {
                    state.committed.remove(&row);
                }
            }
        }
        state.commits += 1;
        Ok(())
    }
}
