//! Counting bloom filter with deletion support.

use std::hash::Hash;

use super::{optimal_hashes, optimal_slots, slot_index};

/// Bloom filter with 8-bit per-slot counters.
///
/// `delete` decrements the counters of a key so that it can go back to
/// "definitely absent". Counters never underflow, and a counter that reached
/// `u8::MAX` is pinned there: its true value is unknown, so decrementing it
/// could produce a false negative for another key sharing the slot.
#[derive(Debug, Clone)]
pub struct CountingBloomFilter {
    counters: Vec<u8>,
    num_hashes: u32,
    /// Live insertions (insertions minus effective deletions).
    count: usize,
}

impl CountingBloomFilter {
    /// Create a counting filter optimized for the given capacity and FPR.
    #[must_use]
    pub fn new(capacity: usize, false_positive_rate: f64) -> Self {
        let num_slots = optimal_slots(capacity, false_positive_rate);
        let num_hashes = optimal_hashes(num_slots, capacity);
        Self::with_params(num_slots, num_hashes)
    }

    /// Create with explicit slot count and hash count.
    #[must_use]
    pub fn with_params(num_slots: usize, num_hashes: u32) -> Self {
        Self {
            counters: vec![0; num_slots.max(1)],
            num_hashes: num_hashes.max(1),
            count: 0,
        }
    }

    /// Insert an item. Every call adds one count; callers avoid inserting a
    /// key that is already counted.
    pub fn insert<T: Hash + ?Sized>(&mut self, item: &T) {
        let num_slots = self.counters.len();
        for seed in 0..self.num_hashes {
            let slot = &mut self.counters[slot_index(item, seed, num_slots)];
            *slot = slot.saturating_add(1);
        }
        self.count += 1;
    }

    /// Check if an item might be in the filter.
    #[must_use]
    pub fn contains<T: Hash + ?Sized>(&self, item: &T) -> bool {
        let num_slots = self.counters.len();
        (0..self.num_hashes).all(|seed| self.counters[slot_index(item, seed, num_slots)] > 0)
    }

    /// Remove one count of `item`.
    ///
    /// No-op when the filter already rules the item out. Returns whether
    /// counters were decremented.
    pub fn delete<T: Hash + ?Sized>(&mut self, item: &T) -> bool {
        if !self.contains(item) {
            return false;
        }
        let num_slots = self.counters.len();
        for seed in 0..self.num_hashes {
            let slot = &mut self.counters[slot_index(item, seed, num_slots)];
            if *slot != u8::MAX {
                *slot = slot.saturating_sub(1);
            }
        }
        self.count = self.count.saturating_sub(1);
        true
    }

    /// Live insertions.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Number of counter slots.
    #[must_use]
    pub fn num_slots(&self) -> usize {
        self.counters.len()
    }

    /// Number of hash functions (k).
    #[must_use]
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Reset every counter.
    pub fn clear(&mut self) {
        self.counters.iter_mut().for_each(|c| *c = 0);
        self.count = 0;
    }

    /// Estimated false positive rate from the share of non-zero slots.
    #[must_use]
    pub fn estimated_fpr(&self) -> f64 {
        let occupied = self.counters.iter().filter(|c| **c > 0).count();
        let fill_ratio = occupied as f64 / self.counters.len() as f64;
        fill_ratio.powi(self.num_hashes as i32)
    }
}

impl Default for CountingBloomFilter {
    fn default() -> Self {
        Self::new(10_000, 0.01)
    }
}
