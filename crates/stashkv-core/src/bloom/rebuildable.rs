//! Plain bloom filter, rebuilt periodically from the live key set.

use std::hash::Hash;

use super::{optimal_hashes, optimal_slots, slot_index};

/// Bloom filter for probabilistic existence checks.
///
/// False negatives are impossible - if `contains()` returns false,
/// the element is definitely not in the set. There is no deletion; the
/// false positive rate only recovers after [`clear`](Self::clear) and a
/// repopulation.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    /// Bit array.
    bits: Vec<u64>,
    /// Number of bits (m).
    num_bits: usize,
    /// Number of hash functions (k).
    num_hashes: u32,
    /// Number of insertions since the last clear.
    count: usize,
}

impl BloomFilter {
    /// Create a new Bloom filter optimized for the given capacity and FPR.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Expected number of items
    /// * `false_positive_rate` - Target FPR (e.g., 0.01 for 1%)
    #[must_use]
    pub fn new(capacity: usize, false_positive_rate: f64) -> Self {
        let num_bits = optimal_slots(capacity, false_positive_rate);
        let num_hashes = optimal_hashes(num_bits, capacity);
        Self::with_params(num_bits, num_hashes)
    }

    /// Create with explicit parameters.
    #[must_use]
    pub fn with_params(num_bits: usize, num_hashes: u32) -> Self {
        let num_bits = num_bits.max(1);
        Self {
            bits: vec![0u64; num_bits.div_ceil(64)],
            num_bits,
            num_hashes: num_hashes.max(1),
            count: 0,
        }
    }

    /// Insert an item into the filter.
    pub fn insert<T: Hash + ?Sized>(&mut self, item: &T) {
        for seed in 0..self.num_hashes {
            let bit_index = slot_index(item, seed, self.num_bits);
            self.bits[bit_index / 64] |= 1u64 << (bit_index % 64);
        }
        self.count += 1;
    }

    /// Check if an item might be in the filter.
    ///
    /// Returns `true` if the item might be present (possible false positive).
    /// Returns `false` if the item is definitely not present.
    #[must_use]
    pub fn contains<T: Hash + ?Sized>(&self, item: &T) -> bool {
        (0..self.num_hashes).all(|seed| {
            let bit_index = slot_index(item, seed, self.num_bits);
            self.bits[bit_index / 64] & (1u64 << (bit_index % 64)) != 0
        })
    }

    /// Get the number of insertions since the last clear.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Number of bits (m).
    #[must_use]
    pub fn num_bits(&self) -> usize {
        self.num_bits
    }

    /// Number of hash functions (k).
    #[must_use]
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Clear all bits.
    pub fn clear(&mut self) {
        self.bits.iter_mut().for_each(|word| *word = 0);
        self.count = 0;
    }

    /// Clear and repopulate from `keys`.
    pub fn rebuild<'a, I>(&mut self, keys: I)
    where
        I: IntoIterator<Item = &'a String>,
    {
        self.clear();
        for key in keys {
            self.insert(key.as_str());
        }
    }

    /// Get the estimated false positive rate based on current fill.
    #[must_use]
    pub fn estimated_fpr(&self) -> f64 {
        let set_bits: usize = self.bits.iter().map(|w| w.count_ones() as usize).sum();
        let fill_ratio = set_bits as f64 / self.num_bits as f64;
        fill_ratio.powi(self.num_hashes as i32)
    }
}

impl Default for BloomFilter {
    fn default() -> Self {
        // 10K capacity, 1% FPR
        Self::new(10_000, 0.01)
    }
}
