//! Cache store whose values can be reclaimed and reloaded on demand.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{info, trace, warn};

use super::lru::LruCache;
use super::{new_handle, CacheStats, Handle, StatCounters};
use crate::backing::{BackingStore, KeepAlive, NamespaceClaim, PendingAction};
use crate::bloom::CountingBloomFilter;
use crate::codec;
use crate::error::{Error, Result};

/// Dead references tolerated beyond twice the live set before a sweep.
const SWEEP_SLACK: usize = 64;

struct WeakInner<V> {
    /// Values handed out. Dead entries linger until the next sweep.
    refs: FxHashMap<String, Weak<RwLock<V>>>,
    /// Strong holds on recently used values.
    retained: LruCache<String, Handle<V>>,
    /// Counts each key present in the namespace exactly once.
    filter: CountingBloomFilter,
    /// `refs` size that triggers the next sweep.
    sweep_at: usize,
}

impl<V> WeakInner<V> {
    fn live(&self, key: &str) -> Option<Handle<V>> {
        self.refs.get(key).and_then(Weak::upgrade)
    }

    /// Forget `key` if nothing holds its value anymore.
    fn prune(&mut self, key: &str) {
        if self.refs.get(key).is_some_and(|r| r.strong_count() == 0) {
            self.refs.remove(key);
        }
    }

    /// Forget every value nothing holds anymore.
    ///
    /// A dead entry only marks its key as counted. Its last write has been
    /// applied (queued writes hold their value), so the backing store still
    /// answers for it.
    fn sweep(&mut self) -> usize {
        let before = self.refs.len();
        self.refs.retain(|_, r| r.strong_count() > 0);
        self.sweep_at = (self.refs.len() * 2).max(self.retained.capacity() * 2 + SWEEP_SLACK);
        before - self.refs.len()
    }
}

/// Cache over one namespace of a backing store that keeps only recently
/// used values alive.
///
/// Opening loads keys, not values. Values enter memory on `put` or on a
/// `get` that the counting filter cannot rule out, and stay there while a
/// caller, a queued write, or the store's bounded LRU of retained values
/// holds them. Once reclaimed, the next `get` reloads from the backing store
/// and every later `get` returns that same handle until it is reclaimed again.
///
/// The filter counts each present key exactly once, so `remove` can delete
/// it without hiding other keys.
pub struct WeakStore<V> {
    inner: Mutex<WeakInner<V>>,
    claim: NamespaceClaim,
    stats: StatCounters,
}

impl<V> WeakStore<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Claims `namespace` on `backing` and loads its keys into the filter.
    ///
    /// # Errors
    ///
    /// - [`Error::NamespaceInUse`] if another store serves the namespace.
    /// - [`Error::Backend`] if the keys cannot be loaded.
    pub fn open(backing: &Arc<BackingStore>, namespace: &str) -> Result<Self> {
        let claim = backing.claim(namespace)?;
        let config = backing.config();

        let keys = backing.load_keys(namespace)?;
        let mut filter =
            CountingBloomFilter::new(config.bloom.counting_capacity, config.bloom.counting_fpr);
        for key in &keys {
            filter.insert(key.as_str());
        }
        info!(
            identifier = %backing.identifier(),
            namespace,
            keys = keys.len(),
            "weak store opened"
        );

        let capacity = config.weak.retained_capacity;
        Ok(Self {
            inner: Mutex::new(WeakInner {
                refs: FxHashMap::default(),
                retained: LruCache::new(capacity),
                filter,
                sweep_at: capacity * 2 + SWEEP_SLACK,
            }),
            claim,
            stats: StatCounters::default(),
        })
    }

    /// Value of `key`, reloading it from the backing store if it was reclaimed.
    ///
    /// # Errors
    ///
    /// [`Error::Backend`] or [`Error::Serialization`] if a reload fails.
    pub fn get(&self, key: &str) -> Result<Option<Handle<V>>> {
        let mut inner = self.inner.lock();
        if let Some(handle) = inner.live(key) {
            if !inner.retained.touch(&key.to_string()) {
                self.retain(&mut inner, key, Arc::clone(&handle));
            }
            self.stats.hit();
            return Ok(Some(handle));
        }

        self.stats.miss();
        inner.prune(key);
        if !inner.filter.contains(key) {
            return Ok(None);
        }

        self.stats.backend_loads.fetch_add(1, Ordering::Relaxed);
        let Some(bytes) = self.backing().load_one(key, self.namespace())? else {
            // Filter false positive; the key was never counted.
            inner.refs.remove(key);
            return Ok(None);
        };
        let handle = new_handle(codec::decode::<V>(&bytes)?);
        inner.refs.insert(key.to_string(), Arc::downgrade(&handle));
        self.retain(&mut inner, key, Arc::clone(&handle));
        trace!(namespace = %self.namespace(), key, "reloaded");
        Ok(Some(handle))
    }

    /// Inserts or replaces `key` and queues its persistence.
    ///
    /// Returns the handle now cached for `key`. The queued write holds the
    /// value until it is applied, so it cannot be reclaimed before then.
    ///
    /// # Errors
    ///
    /// [`Error::Serialization`] if the value cannot be encoded. The value is
    /// cached anyway but nothing is queued, so memory and disk disagree until
    /// the next successful `put` or `update` of the key.
    pub fn put(&self, key: &str, value: V) -> Result<Handle<V>> {
        let mut inner = self.inner.lock();
        if !self.is_counted(&inner, key) {
            inner.filter.insert(key);
        }

        let handle = new_handle(value);
        inner.refs.insert(key.to_string(), Arc::downgrade(&handle));
        self.retain(&mut inner, key, Arc::clone(&handle));

        let bytes = codec::encode(&*handle.read())?;
        let keep_alive: KeepAlive = handle.clone();
        self.backing().enqueue(
            PendingAction::put(key, self.namespace(), bytes).with_keep_alive(keep_alive),
        );
        Ok(handle)
    }

    /// Removes `key` and queues the delete. Returns the handle if it was live.
    pub fn remove(&self, key: &str) -> Option<Handle<V>> {
        let mut inner = self.inner.lock();
        let counted = self.is_counted(&inner, key);
        let removed = inner.refs.remove(key).and_then(|r| r.upgrade());
        inner.retained.remove(&key.to_string());
        if counted {
            inner.filter.delete(key);
        }
        self.backing().enqueue(PendingAction::remove(key, self.namespace()));
        removed
    }

    /// Queues the current in-memory value of `key` for persistence.
    ///
    /// Call after mutating a value through its [`Handle`], while still
    /// holding that handle.
    ///
    /// # Errors
    ///
    /// - [`Error::Reclaimed`] if no live value is cached for `key`.
    /// - [`Error::Serialization`] if the value cannot be encoded.
    pub fn update(&self, key: &str) -> Result<()> {
        let inner = self.inner.lock();
        let handle = inner
            .live(key)
            .ok_or_else(|| Error::Reclaimed(key.to_string()))?;
        let bytes = codec::encode(&*handle.read())?;
        let keep_alive: KeepAlive = handle;
        self.backing().enqueue(
            PendingAction::put(key, self.namespace(), bytes).with_keep_alive(keep_alive),
        );
        Ok(())
    }

    /// Every `(key, handle)` pair of the namespace.
    ///
    /// Loads the whole namespace. Keys with a live cached value yield that
    /// same handle; the others are decoded and cached, but not retained.
    ///
    /// # Errors
    ///
    /// [`Error::Backend`] or [`Error::Serialization`] if loading fails.
    pub fn get_all_entries(&self) -> Result<Vec<(String, Handle<V>)>> {
        let mut inner = self.inner.lock();
        let rows = self.backing().load_namespace(self.namespace())?;

        let mut entries = Vec::with_capacity(rows.len());
        for (key, bytes) in rows {
            let handle = match inner.live(&key) {
                Some(handle) => handle,
                None => {
                    self.stats.backend_loads.fetch_add(1, Ordering::Relaxed);
                    let handle = new_handle(codec::decode::<V>(&bytes)?);
                    inner.refs.insert(key.clone(), Arc::downgrade(&handle));
                    if !inner.filter.contains(key.as_str()) {
                        inner.filter.insert(key.as_str());
                    }
                    handle
                }
            };
            entries.push((key, handle));
        }
        Ok(entries)
    }

    /// Whether the filter already counts `key`.
    ///
    /// Any cached entry is counted. Otherwise a key is counted iff it is
    /// present in the backing store. When that cannot be read the key is
    /// reported uncounted, which errs toward a false positive.
    fn is_counted(&self, inner: &WeakInner<V>, key: &str) -> bool {
        if inner.refs.contains_key(key) {
            return true;
        }
        if !inner.filter.contains(key) {
            return false;
        }
        match self.backing().load_one(key, self.namespace()) {
            Ok(row) => row.is_some(),
            Err(e) => {
                warn!(namespace = %self.namespace(), key, error = %e, "cannot check key presence");
                false
            }
        }
    }
}

impl<V> WeakStore<V> {
    fn retain(&self, inner: &mut WeakInner<V>, key: &str, handle: Handle<V>) {
        if let Some((evicted_key, evicted)) = inner.retained.insert(key.to_string(), handle) {
            drop(evicted);
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            inner.prune(&evicted_key);
        }
        if inner.refs.len() > inner.sweep_at {
            let swept = inner.sweep();
            trace!(namespace = %self.namespace(), swept, "dead references swept");
        }
    }

    /// Drops the store's hold on `key`. Returns whether it was retained.
    ///
    /// The value is reclaimed once callers and queued writes release it too.
    pub fn reclaim(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        let released = inner.retained.remove(&key.to_string()).is_some();
        inner.prune(key);
        released
    }

    /// Drops every hold the store has.
    pub fn reclaim_all(&self) {
        let mut inner = self.inner.lock();
        inner.retained.clear();
        inner.sweep();
    }

    /// Whether the store currently holds `key` in its LRU.
    #[must_use]
    pub fn is_retained(&self, key: &str) -> bool {
        self.inner.lock().retained.contains(&key.to_string())
    }

    /// Number of values held by the store's LRU.
    #[must_use]
    pub fn retained(&self) -> usize {
        self.inner.lock().retained.len()
    }

    /// Maximum number of values the store holds itself.
    #[must_use]
    pub fn retained_capacity(&self) -> usize {
        self.inner.lock().retained.capacity()
    }

    /// Waits until everything queued on the backing store is committed.
    ///
    /// Applied writes release their values, so references nothing else
    /// holds are forgotten afterwards.
    ///
    /// # Errors
    ///
    /// See [`BackingStore::flush`].
    pub fn flush(&self) -> Result<()> {
        self.backing().flush()?;
        self.inner.lock().sweep();
        Ok(())
    }

    #[cfg(test)]
    pub(super) fn tracked(&self) -> usize {
        self.inner.lock().refs.len()
    }

    /// Estimated false-positive rate of the filter.
    #[must_use]
    pub fn filter_fpr(&self) -> f64 {
        self.inner.lock().filter.estimated_fpr()
    }

    /// Number of live cached values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .refs
            .values()
            .filter(|r| r.strong_count() > 0)
            .count()
    }

    /// Whether no value is live in memory.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
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

impl<V> std::fmt::Debug for WeakStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakStore")
            .field("identifier", &self.backing().identifier())
            .field("namespace", &self.namespace())
            .field("retained", &self.retained())
            .finish()
    }
}
