//! Bloom filters for negative lookups.
//!
//! - [`BloomFilter`]: plain bit-array filter, no deletion. Staleness is
//!   recovered by clearing and repopulating it from ground truth.
//! - [`CountingBloomFilter`]: per-slot counters, supports deletion.
//!
//! Neither filter is internally synchronized; each cache store keeps its
//! filter under the same lock as its map so both change atomically.

mod counting;
#[cfg(test)]
mod counting_tests;
mod rebuildable;

pub use counting::CountingBloomFilter;
pub use rebuildable::BloomFilter;

use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};

/// Optimal number of slots: m = -n * ln(p) / (ln(2)^2).
pub(crate) fn optimal_slots(capacity: usize, fpr: f64) -> usize {
    let capacity = capacity.max(1);
    let fpr = fpr.clamp(f64::MIN_POSITIVE, 0.5);
    let ln2_sq = std::f64::consts::LN_2 * std::f64::consts::LN_2;
    ((-(capacity as f64) * fpr.ln() / ln2_sq).ceil() as usize).max(64)
}

/// Optimal number of hash functions: k = (m/n) * ln(2).
pub(crate) fn optimal_hashes(num_slots: usize, capacity: usize) -> u32 {
    let k = (num_slots as f64 / capacity.max(1) as f64) * std::f64::consts::LN_2;
    (k.ceil() as u32).max(1)
}

/// Slot index of `item` for the `seed`-th hash function.
#[inline]
pub(crate) fn slot_index<T: Hash + ?Sized>(item: &T, seed: u32, num_slots: usize) -> usize {
    let mut hasher = FxHasher::default();
    seed.hash(&mut hasher);
    item.hash(&mut hasher);
    (hasher.finish() % num_slots as u64) as usize
}
