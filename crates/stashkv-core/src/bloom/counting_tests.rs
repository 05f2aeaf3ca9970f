//! Tests for the counting bloom filter.

use super::CountingBloomFilter;
use proptest::prelude::*;

#[test]
fn test_counting_insert_and_delete() {
    let mut bloom = CountingBloomFilter::new(1000, 0.01);

    bloom.insert("k1");
    assert!(bloom.contains("k1"));

    assert!(bloom.delete("k1"));
    assert!(!bloom.contains("k1"));
    assert_eq!(bloom.count(), 0);
}

#[test]
fn test_counting_delete_keeps_other_keys() {
    let mut bloom = CountingBloomFilter::new(1000, 0.01);
    for i in 1..=50 {
        bloom.insert(&format!("k{i}"));
    }

    bloom.delete("k1");

    for i in 2..=50 {
        assert!(bloom.contains(&format!("k{i}")), "k{i} must survive deletion of k1");
    }
}

#[test]
fn test_counting_delete_of_absent_key_is_noop() {
    let mut bloom = CountingBloomFilter::new(1000, 0.01);
    bloom.insert("present");

    assert!(!bloom.delete("absent"));

    assert!(bloom.contains("present"));
    assert_eq!(bloom.count(), 1);
}

#[test]
fn test_counting_never_underflows() {
    let mut bloom = CountingBloomFilter::with_params(8, 2);
    bloom.insert("a");

    assert!(bloom.delete("a"));
    assert!(!bloom.delete("a"));
    assert!(!bloom.delete("a"));

    assert!(!bloom.contains("a"));
    bloom.insert("a");
    assert!(bloom.contains("a"));
}

#[test]
fn test_counting_double_insert_needs_double_delete() {
    let mut bloom = CountingBloomFilter::new(1000, 0.01);
    bloom.insert("dup");
    bloom.insert("dup");

    bloom.delete("dup");
    assert!(bloom.contains("dup"));

    bloom.delete("dup");
    assert!(!bloom.contains("dup"));
}

#[test]
fn test_counting_saturated_slots_are_pinned() {
    // One slot, one hash: every key shares the slot.
    let mut bloom = CountingBloomFilter::with_params(1, 1);
    for i in 0..300 {
        bloom.insert(&i);
    }

    for i in 0..299 {
        bloom.delete(&i);
    }

    // Key 299 is still present and must not become a false negative.
    assert!(bloom.contains(&299));
}

#[test]
fn test_counting_clear() {
    let mut bloom = CountingBloomFilter::default();
    bloom.insert("x");

    bloom.clear();

    assert!(!bloom.contains("x"));
    assert_eq!(bloom.count(), 0);
}

proptest! {
    #[test]
    fn prop_deleting_some_keys_never_hides_the_rest(
        keys in proptest::collection::hash_set("[a-z]{1,8}", 2..100),
        split in 0usize..100,
    ) {
        let keys: Vec<String> = keys.into_iter().collect();
        let split = split % keys.len();
        let mut bloom = CountingBloomFilter::with_params(128, 3);
        for key in &keys {
            bloom.insert(key.as_str());
        }
        for key in &keys[..split] {
            bloom.delete(key.as_str());
        }
        for key in &keys[split..] {
            prop_assert!(bloom.contains(key.as_str()));
        }
    }
}
