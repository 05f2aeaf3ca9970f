//! Recency list holding the weak store's strong references.
//!
//! Not synchronized: the owning store's lock covers it.

use std::collections::BTreeMap;
use std::hash::Hash;

use rustc_hash::FxHashMap;

/// Bounded LRU map with O(log n) touch and eviction.
///
/// Recency is a monotonic tick per entry; `order` maps ticks back to keys
/// so the least recently used entry is always the first one.
pub(crate) struct LruCache<K, V>
where
    K: Hash + Eq + Clone,
{
    capacity: usize,
    map: FxHashMap<K, (V, u64)>,
    order: BTreeMap<u64, K>,
    tick: u64,
}

impl<K, V> LruCache<K, V>
where
    K: Hash + Eq + Clone,
{
    /// Create an empty cache holding at most `capacity` entries.
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            map: FxHashMap::default(),
            order: BTreeMap::new(),
            tick: 0,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    pub(crate) fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Insert or replace `key` as most recently used.
    ///
    /// Returns the entry evicted to make room, if any. With a zero capacity
    /// the new entry itself is returned.
    pub(crate) fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if self.capacity == 0 {
            return Some((key, value));
        }

        let tick = self.next_tick();
        if let Some((old_value, old_tick)) = self.map.get_mut(&key) {
            *old_value = value;
            let previous = std::mem::replace(old_tick, tick);
            self.order.remove(&previous);
            self.order.insert(tick, key);
            return None;
        }

        let evicted = if self.map.len() >= self.capacity {
            self.pop_lru()
        } else {
            None
        };
        self.map.insert(key.clone(), (value, tick));
        self.order.insert(tick, key);
        evicted
    }

    /// Mark `key` as most recently used. Returns false if absent.
    pub(crate) fn touch(&mut self, key: &K) -> bool {
        let tick = self.next_tick();
        let Some((_, entry_tick)) = self.map.get_mut(key) else {
            return false;
        };
        let previous = std::mem::replace(entry_tick, tick);
        self.order.remove(&previous);
        self.order.insert(tick, key.clone());
        true
    }

    pub(crate) fn remove(&mut self, key: &K) -> Option<V> {
        let (value, tick) = self.map.remove(key)?;
        self.order.remove(&tick);
        Some(value)
    }

    fn pop_lru(&mut self) -> Option<(K, V)> {
        let (_, key) = self.order.pop_first()?;
        let (value, _) = self.map.remove(&key)?;
        Some((key, value))
    }

    pub(crate) fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }
}
