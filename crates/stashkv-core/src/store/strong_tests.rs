//! Tests for the strong cache store.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::StrongStore;
use crate::backend::{Backend, MemoryBackend};
use crate::backing::BackingStore;
use crate::codec;
use crate::config::StashConfig;
use crate::error::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Session {
    user: String,
    hits: u32,
}

impl Session {
    fn new(user: &str) -> Self {
        Self {
            user: user.to_string(),
            hits: 0,
        }
    }
}

/// Refuses to serialize while `poisoned` is set.
#[derive(Debug)]
struct Flaky {
    poisoned: bool,
    n: u32,
}

impl Serialize for Flaky {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.poisoned {
            return Err(serde::ser::Error::custom("poisoned"));
        }
        (self.poisoned, self.n).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Flaky {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (poisoned, n) = <(bool, u32)>::deserialize(deserializer)?;
        Ok(Self { poisoned, n })
    }
}

fn config() -> StashConfig {
    let mut config = StashConfig::default();
    config.writer.poll_interval_ms = 5;
    config.writer.flush_poll_interval_ms = 1;
    config
}

fn backing_with(backend: &MemoryBackend, config: StashConfig) -> Arc<BackingStore> {
    Arc::new(
        BackingStore::start("mem".to_string(), Box::new(backend.clone()), Arc::new(config))
            .expect("start backing store"),
    )
}

fn backing(backend: &MemoryBackend) -> Arc<BackingStore> {
    backing_with(backend, config())
}

fn seed(backend: &MemoryBackend, namespace: &str, key: &str, session: &Session) {
    let mut backend = backend.clone();
    backend
        .upsert(key, namespace, &codec::encode(session).expect("encode"))
        .expect("upsert");
    backend.commit().expect("commit");
}

#[test]
fn test_open_loads_every_value_of_the_namespace() {
    // Arrange
    let backend = MemoryBackend::new();
    seed(&backend, "sessions", "ada", &Session::new("ada"));
    seed(&backend, "sessions", "bob", &Session::new("bob"));
    seed(&backend, "other", "eve", &Session::new("eve"));

    // Act
    let store: StrongStore<Session> =
        StrongStore::open(&backing(&backend), "sessions").expect("open");

    // Assert
    assert_eq!(store.len(), 2);
    assert_eq!(store.namespace(), "sessions");
    let ada = store.get("ada").expect("ada cached");
    assert_eq!(ada.read().user, "ada");
    assert!(store.get("eve").is_none());
}

#[test]
fn test_put_is_visible_immediately_and_durable_after_flush() {
    let backend = MemoryBackend::new();
    let store: StrongStore<Session> = StrongStore::open(&backing(&backend), "s").expect("open");

    let handle = store.put("ada", Session::new("ada")).expect("put");
    let fetched = store.get("ada").expect("visible");
    assert!(Arc::ptr_eq(&handle, &fetched));

    store.flush().expect("flush");
    let persisted: Session =
        codec::decode(&backend.committed_value("ada", "s").expect("row")).expect("decode");
    assert_eq!(persisted, Session::new("ada"));
}

#[test]
fn test_put_replaces_existing_value() {
    let backend = MemoryBackend::new();
    let store: StrongStore<Session> = StrongStore::open(&backing(&backend), "s").expect("open");

    let first = store.put("k", Session::new("first")).expect("put");
    let second = store.put("k", Session::new("second")).expect("put");

    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(store.get("k").expect("cached").read().user, "second");
    assert_eq!(store.len(), 1);
}

#[test]
fn test_filtered_miss_counts_as_miss() {
    let backend = MemoryBackend::new();
    let store: StrongStore<Session> = StrongStore::open(&backing(&backend), "s").expect("open");
    store.put("present", Session::new("p")).expect("put");

    assert!(store.get("absent").is_none());
    assert!(store.get("present").is_some());

    let stats = store.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.backend_loads, 0);
}

#[test]
fn test_remove_then_get_returns_none_and_deletes_row() {
    let backend = MemoryBackend::new();
    seed(&backend, "s", "k", &Session::new("k"));
    let store: StrongStore<Session> = StrongStore::open(&backing(&backend), "s").expect("open");

    let removed = store.remove("k").expect("was cached");
    assert_eq!(removed.read().user, "k");
    assert!(store.get("k").is_none());
    assert!(store.is_empty());

    store.flush().expect("flush");
    assert_eq!(backend.committed_value("k", "s"), None);
}

#[test]
fn test_update_persists_in_place_mutation() {
    let backend = MemoryBackend::new();
    let store: StrongStore<Session> = StrongStore::open(&backing(&backend), "s").expect("open");
    let handle = store.put("ada", Session::new("ada")).expect("put");

    handle.write().hits = 7;
    assert!(store.update("ada").expect("update"));
    store.flush().expect("flush");

    let persisted: Session =
        codec::decode(&backend.committed_value("ada", "s").expect("row")).expect("decode");
    assert_eq!(persisted.hits, 7);
}

#[test]
fn test_update_of_absent_key_is_a_noop() {
    let backend = MemoryBackend::new();
    let store: StrongStore<Session> = StrongStore::open(&backing(&backend), "s").expect("open");
    let enqueued_before = store.backing().stats().enqueued;

    assert!(!store.update("ghost").expect("update"));

    assert_eq!(store.backing().stats().enqueued, enqueued_before);
    assert!(store.get("ghost").is_none());
}

#[test]
fn test_serialization_failure_keeps_value_cached_but_unqueued() {
    let backend = MemoryBackend::new();
    let store: StrongStore<Flaky> = StrongStore::open(&backing(&backend), "s").expect("open");

    let result = store.put(
        "k",
        Flaky {
            poisoned: true,
            n: 1,
        },
    );

    assert!(matches!(result, Err(Error::Serialization(_))));
    assert_eq!(store.get("k").expect("cached").read().n, 1);
    assert_eq!(store.backing().stats().enqueued, 0);

    // Fixing the value in place and updating persists it.
    store.get("k").expect("cached").write().poisoned = false;
    assert!(store.update("k").expect("update"));
    store.flush().expect("flush");
    assert!(backend.committed_value("k", "s").is_some());
}

#[test]
fn test_get_all_entries_shares_cached_handles() {
    let backend = MemoryBackend::new();
    let store: StrongStore<Session> = StrongStore::open(&backing(&backend), "s").expect("open");
    let ada = store.put("ada", Session::new("ada")).expect("put");
    store.put("bob", Session::new("bob")).expect("put");

    let mut entries = store.get_all_entries();
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].0, "ada");
    assert!(Arc::ptr_eq(&entries[0].1, &ada));
}

#[test]
fn test_second_store_on_same_namespace_is_refused() {
    let backing = backing(&MemoryBackend::new());
    let first: StrongStore<Session> = StrongStore::open(&backing, "s").expect("open");

    let second = StrongStore::<Session>::open(&backing, "s");
    assert!(matches!(second, Err(Error::NamespaceInUse { .. })));

    drop(first);
    assert!(StrongStore::<Session>::open(&backing, "s").is_ok());
}

#[test]
fn test_undecodable_row_fails_open_and_releases_claim() {
    let mut backend = MemoryBackend::new();
    backend.upsert("k", "s", b"\x01").expect("upsert");
    backend.commit().expect("commit");
    let backing = backing(&backend);

    let result = StrongStore::<Session>::open(&backing, "s");

    assert!(matches!(result, Err(Error::Serialization(_))));
    assert!(backing.claimed_namespaces().is_empty());
}

#[test]
fn test_rebuild_filter_recovers_accuracy() {
    let mut config = config();
    config.bloom.strong_capacity = 64;
    let backend = MemoryBackend::new();
    let store: StrongStore<u32> =
        StrongStore::open(&backing_with(&backend, config), "s").expect("open");

    for i in 0..500 {
        store.put(&format!("key-{i}"), i).expect("put");
    }
    for i in 0..500 {
        store.remove(&format!("key-{i}"));
    }
    let stale_fpr = store.filter_fpr();

    store.rebuild_filter();

    assert!(stale_fpr > 0.5, "overfilled filter should be saturated, got {stale_fpr}");
    assert!(store.filter_fpr() < f64::EPSILON);
    assert!(store.get("key-1").is_none());
}

#[test]
fn test_background_rebuild_runs_on_interval() {
    let mut config = config();
    config.bloom.strong_capacity = 64;
    config.strong.rebuild_interval_secs = 1;
    let backend = MemoryBackend::new();
    let store: StrongStore<u32> =
        StrongStore::open(&backing_with(&backend, config), "s").expect("open");

    for i in 0..200 {
        store.put(&format!("key-{i}"), i).expect("put");
        store.remove(&format!("key-{i}"));
    }
    assert!(store.filter_fpr() > 0.0);

    let start = Instant::now();
    while store.filter_fpr() > 0.0 {
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "background rebuild did not run"
        );
        std::thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn test_drop_stops_rebuild_thread_promptly() {
    let backend = MemoryBackend::new();
    let store: StrongStore<u32> = StrongStore::open(&backing(&backend), "s").expect("open");

    let start = Instant::now();
    drop(store);

    // The default interval is an hour; dropping must not wait for it.
    assert!(start.elapsed() < Duration::from_secs(5));
}
