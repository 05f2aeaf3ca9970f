//! Cache store that keeps every entry of its namespace in memory.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error, info};

use super::{new_handle, CacheStats, Handle, StatCounters};
use crate::backing::{BackingStore, NamespaceClaim, PendingAction};
use crate::bloom::BloomFilter;
use crate::codec;
use crate::error::{Error, Result};

struct StrongInner<V> {
    map: FxHashMap<String, Handle<V>>,
    filter: BloomFilter,
}

impl<V> StrongInner<V> {
    fn rebuild_filter(&mut self) {
        let Self { map, filter } = self;
        filter.rebuild(map.keys());
    }
}

/// Strongly held cache over one namespace of a backing store.
///
/// Every value of the namespace is loaded when the store opens and stays in
/// memory; the backing store is never read again. Misses are answered by a
/// bloom filter that a background thread rebuilds from the live key set
/// every `strong.rebuild_interval_secs`, since removals leave stale bits.
///
/// Mutations return once they are visible in memory. Persistence happens on
/// the backing store's writer; call [`flush`](Self::flush) for a durability
/// checkpoint.
pub struct StrongStore<V> {
    inner: Arc<RwLock<StrongInner<V>>>,
    claim: NamespaceClaim,
    stats: StatCounters,
    rebuild: RebuildTask,
}

impl<V> StrongStore<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Claims `namespace` on `backing` and loads all of its values.
    ///
    /// # Errors
    ///
    /// - [`Error::NamespaceInUse`] if another store serves the namespace.
    /// - [`Error::Backend`] or [`Error::Serialization`] if loading fails.
    pub fn open(backing: &Arc<BackingStore>, namespace: &str) -> Result<Self> {
        let claim = backing.claim(namespace)?;
        let config = backing.config();

        let rows = backing.load_namespace(namespace)?;
        let mut map = FxHashMap::default();
        for (key, bytes) in rows {
            let value: V = codec::decode(&bytes)?;
            map.insert(key, new_handle(value));
        }

        let mut filter = BloomFilter::new(config.bloom.strong_capacity, config.bloom.strong_fpr);
        filter.rebuild(map.keys());
        info!(
            identifier = %backing.identifier(),
            namespace,
            entries = map.len(),
            "strong store opened"
        );

        let inner = Arc::new(RwLock::new(StrongInner { map, filter }));
        let rebuild = RebuildTask::spawn(
            Arc::clone(&inner),
            config.strong.rebuild_interval(),
            namespace.to_string(),
        )?;

        Ok(Self {
            inner,
            claim,
            stats: StatCounters::default(),
            rebuild,
        })
    }

    /// Cached value of `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Handle<V>> {
        let inner = self.inner.read();
        let found = if inner.filter.contains(key) {
            inner.map.get(key).cloned()
        } else {
            None
        };
        drop(inner);

        if found.is_some() {
            self.stats.hit();
        } else {
            self.stats.miss();
        }
        found
    }

    /// Inserts or replaces `key` and queues its persistence.
    ///
    /// Returns the handle now cached for `key`.
    ///
    /// # Errors
    ///
    /// [`Error::Serialization`] if the value cannot be encoded. The value is
    /// cached anyway but nothing is queued, so memory and disk disagree until
    /// the next successful `put` or `update` of the key.
    pub fn put(&self, key: &str, value: V) -> Result<Handle<V>> {
        let mut inner = self.inner.write();
        let handle = new_handle(value);
        inner.filter.insert(key);
        inner.map.insert(key.to_string(), Arc::clone(&handle));

        let bytes = codec::encode(&*handle.read())?;
        self.backing().enqueue(PendingAction::put(key, self.namespace(), bytes));
        Ok(handle)
    }

    /// Removes `key` and queues the delete. Returns the removed handle.
    ///
    /// The key stays in the filter until the next rebuild.
    pub fn remove(&self, key: &str) -> Option<Handle<V>> {
        let mut inner = self.inner.write();
        let removed = inner.map.remove(key);
        self.backing().enqueue(PendingAction::remove(key, self.namespace()));
        removed
    }

    /// Queues the current in-memory value of `key` for persistence.
    ///
    /// Call after mutating a value through its [`Handle`]. Returns `false`,
    /// queuing nothing, when `key` is not cached.
    ///
    /// # Errors
    ///
    /// [`Error::Serialization`] if the value cannot be encoded.
    pub fn update(&self, key: &str) -> Result<bool> {
        let inner = self.inner.write();
        let Some(handle) = inner.map.get(key) else {
            return Ok(false);
        };
        let bytes = codec::encode(&*handle.read())?;
        self.backing().enqueue(PendingAction::put(key, self.namespace(), bytes));
        Ok(true)
    }

    /// Snapshot of every cached `(key, handle)` pair.
    ///
    /// Mutating a value through its handle is not persisted until
    /// [`update`](Self::update) is called for its key.
    #[must_use]
    pub fn get_all_entries(&self) -> Vec<(String, Handle<V>)> {
        self.inner
            .read()
            .map
            .iter()
            .map(|(key, handle)| (key.clone(), Arc::clone(handle)))
            .collect()
    }
}

impl<V> StrongStore<V> {
    /// Waits until everything queued on the backing store is committed.
    ///
    /// # Errors
    ///
    /// See [`BackingStore::flush`].
    pub fn flush(&self) -> Result<()> {
        self.backing().flush()
    }

    /// Clears the filter and repopulates it from the cached keys.
    pub fn rebuild_filter(&self) {
        self.inner.write().rebuild_filter();
        debug!(namespace = %self.namespace(), "filter rebuilt on demand");
    }

    /// Estimated false-positive rate of the filter.
    #[must_use]
    pub fn filter_fpr(&self) -> f64 {
        self.inner.read().filter.estimated_fpr()
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().map.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().map.is_empty()
    }

    /// Namespace served by this store.
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.claim.namespace()
    }

    /// The backing store persisting this namespace.
    #[must_use]
    pub fn backing(&self) -> &Arc<BackingStore> {
        self.claim.backing()
    }

    /// Cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }
}

impl<V> Drop for StrongStore<V> {
    fn drop(&mut self) {
        self.rebuild.stop();
    }
}

impl<V> std::fmt::Debug for StrongStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrongStore")
            .field("identifier", &self.backing().identifier())
            .field("namespace", &self.namespace())
            .field("len", &self.len())
            .finish()
    }
}

/// Periodic filter rebuild thread owned by a strong store.
struct RebuildTask {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl RebuildTask {
    fn spawn<V: Send + Sync + 'static>(
        inner: Arc<RwLock<StrongInner<V>>>,
        interval: Duration,
        namespace: String,
    ) -> Result<Self> {
        let (stop, stopped) = crossbeam_channel::bounded::<()>(0);
        let handle = std::thread::Builder::new()
            .name("stashkv-rebuild".to_string())
            .spawn(move || loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        inner.write().rebuild_filter();
                        debug!(namespace = %namespace, "filter rebuilt");
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|e| Error::Internal(format!("cannot spawn rebuild thread: {e}")))?;

        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    fn stop(&mut self) {
        // Disconnecting the channel wakes the thread immediately.
        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("filter rebuild thread panicked");
            }
        }
    }
}
