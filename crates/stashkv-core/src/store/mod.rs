//! Namespace-scoped cache stores.
//!
//! [`StrongStore`] keeps every entry of its namespace in memory.
//! [`WeakStore`] keeps keys only, plus values that are still referenced.
//! Both answer most misses from a bloom filter and hand mutations to their
//! [`BackingStore`](crate::BackingStore) for write-behind persistence.
//!
//! # Lock Ordering
//!
//! Each store has a single lock over its map and filter, taken before any
//! backing store lock. Value locks ([`Handle`]) are independent: a store may
//! read-lock a value while holding its own lock, so never call into a store
//! while write-locking one of its values.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

mod lru;
mod strong;
#[cfg(test)]
mod strong_tests;
mod weak;

pub use strong::StrongStore;
pub use weak::WeakStore;

/// Shared, mutable cached value.
///
/// Mutate through the lock, then call `update(key)` on the owning store to
/// persist the change.
pub type Handle<V> = Arc<RwLock<V>>;

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from memory.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Strong holds dropped to stay within the retained capacity.
    pub evictions: u64,
    /// Values loaded from the backing store.
    pub backend_loads: u64,
}

impl CacheStats {
    /// Calculate hit rate (0.0 to 1.0).
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct StatCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    backend_loads: AtomicU64,
}

impl StatCounters {
    fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            backend_loads: self.backend_loads.load(Ordering::Relaxed),
        }
    }
}

fn new_handle<V>(value: V) -> Handle<V> {
    Arc::new(RwLock::new(value))
}
