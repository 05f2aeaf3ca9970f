//! Tests for the backing store and its writer.

use std::sync::Arc;
use std::time::Duration;

use super::{BackingStore, PendingAction, WriterHealth};
use crate::backend::{Backend, BackendError, MemoryBackend};
use crate::config::StashConfig;
use crate::error::Error;

fn fast_config() -> Arc<StashConfig> {
    let mut config = StashConfig::default();
    config.writer.poll_interval_ms = 5;
    config.writer.flush_poll_interval_ms = 1;
    Arc::new(config)
}

fn start(backend: &MemoryBackend) -> Arc<BackingStore> {
    Arc::new(
        BackingStore::start("mem".to_string(), Box::new(backend.clone()), fast_config())
            .expect("start backing store"),
    )
}

#[test]
fn test_flush_commits_queued_actions() {
    // Arrange
    let backend = MemoryBackend::new();
    let backing = start(&backend);

    // Act
    backing.enqueue(PendingAction::put("a", "ns", b"1".to_vec()));
    backing.enqueue(PendingAction::put("b", "ns", b"2".to_vec()));
    backing.flush().expect("flush");

    // Assert
    assert_eq!(backend.committed_value("a", "ns"), Some(b"1".to_vec()));
    assert_eq!(backend.committed_value("b", "ns"), Some(b"2".to_vec()));
    assert_eq!(backing.pending(), 0);
    assert!(backend.commit_count() >= 1);
    assert_eq!(backend.staged_len(), 0);
}

#[test]
fn test_actions_apply_in_fifo_order() {
    let backend = MemoryBackend::new();
    let backing = start(&backend);

    backing.enqueue(PendingAction::put("k", "ns", b"a".to_vec()));
    backing.enqueue(PendingAction::remove("k", "ns"));
    backing.enqueue(PendingAction::put("k", "ns", b"b".to_vec()));
    backing.flush().expect("flush");

    assert_eq!(backend.committed_value("k", "ns"), Some(b"b".to_vec()));

    backing.enqueue(PendingAction::remove("k", "ns"));
    backing.flush().expect("flush");
    assert_eq!(backend.committed_value("k", "ns"), None);
}

#[test]
fn test_commits_are_batched_under_backlog() {
    let backend = MemoryBackend::new();
    backend.delay_writes(Duration::from_millis(2));
    let backing = start(&backend);

    for i in 0..50 {
        backing.enqueue(PendingAction::put(&format!("k{i}"), "ns", vec![i]));
    }
    backing.flush().expect("flush");

    let stats = backing.stats();
    assert_eq!(stats.enqueued, 50);
    assert_eq!(stats.applied, 50);
    assert!(stats.commits < 50, "expected batched commits, got {}", stats.commits);
    assert_eq!(backend.committed_namespace("ns").len(), 50);
}

#[test]
fn test_rejected_action_is_skipped_and_counted() {
    let backend = MemoryBackend::new();
    backend.reject_key("bad");
    let backing = start(&backend);

    backing.enqueue(PendingAction::put("bad", "ns", b"x".to_vec()));
    backing.enqueue(PendingAction::put("good", "ns", b"y".to_vec()));
    backing.flush().expect("flush");

    let stats = backing.stats();
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.applied, 1);
    assert_eq!(backing.health(), WriterHealth::Running);
    assert_eq!(backend.committed_value("bad", "ns"), None);
    assert_eq!(backend.committed_value("good", "ns"), Some(b"y".to_vec()));
}

#[test]
fn test_commit_failure_kills_writer_and_flush_reports_it() {
    let backend = MemoryBackend::new();
    backend.fail_commits(true);
    let backing = start(&backend);

    backing.enqueue(PendingAction::put("k", "ns", b"v".to_vec()));
    let result = backing.flush();

    assert!(matches!(result, Err(Error::WriterDead(ref id)) if id == "mem"));
    assert_eq!(backing.health(), WriterHealth::Dead);
    assert_eq!(backend.committed_value("k", "ns"), None);

    // Later enqueues are accepted but never applied.
    backing.enqueue(PendingAction::put("k2", "ns", b"v".to_vec()));
    assert!(matches!(backing.flush(), Err(Error::WriterDead(_))));
    assert_eq!(backing.pending(), 1);
}

/// Backend whose writes unwind the writer thread.
struct PanickingBackend;

impl Backend for PanickingBackend {
    fn upsert(&mut self, _key: &str, _namespace: &str, _value: &[u8]) -> Result<(), BackendError> {
        panic!("upsert exploded");
    }

    fn delete(&mut self, _key: &str, _namespace: &str) -> Result<(), BackendError> {
        Ok(())
    }

    fn get_one(&mut self, _key: &str, _namespace: &str) -> Result<Option<Vec<u8>>, BackendError> {
        Ok(None)
    }

    fn get_all_in_namespace(
        &mut self,
        _namespace: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, BackendError> {
        Ok(Vec::new())
    }

    fn get_all_keys_in_namespace(&mut self, _namespace: &str) -> Result<Vec<String>, BackendError> {
        Ok(Vec::new())
    }

    fn commit(&mut self) -> Result<(), BackendError> {
        Ok(())
    }
}

#[test]
fn test_writer_panic_kills_writer_and_flush_reports_it() {
    let backing =
        BackingStore::start("boom".to_string(), Box::new(PanickingBackend), fast_config())
            .expect("start backing store");

    backing.enqueue(PendingAction::put("k", "ns", b"v".to_vec()));
    let result = backing.flush();

    assert!(matches!(result, Err(Error::WriterDead(ref id)) if id == "boom"));
    assert_eq!(backing.health(), WriterHealth::Dead);

    // The backend lock was released by the unwinding writer.
    assert_eq!(backing.load_one("k", "ns").expect("load"), None);
    assert!(matches!(backing.shutdown(), Err(Error::WriterDead(_))));
}

#[test]
fn test_invalid_config_is_refused_before_the_writer_starts() {
    let mut config = StashConfig::default();
    config.writer.flush_poll_interval_ms = 0;

    let result = BackingStore::start(
        "mem".to_string(),
        Box::new(MemoryBackend::new()),
        Arc::new(config),
    );

    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn test_flush_timeout_leaves_backlog_queued() {
    let backend = MemoryBackend::new();
    backend.delay_writes(Duration::from_millis(50));
    let backing = start(&backend);

    for i in 0..10 {
        backing.enqueue(PendingAction::put(&format!("k{i}"), "ns", vec![i]));
    }
    let result = backing.flush_timeout(Duration::from_millis(10));

    match result {
        Err(Error::FlushTimeout { identifier, pending }) => {
            assert_eq!(identifier, "mem");
            assert!(pending > 0);
        }
        other => panic!("expected FlushTimeout, got {other:?}"),
    }

    backend.delay_writes(Duration::ZERO);
    backing.flush().expect("flush");
    assert_eq!(backend.committed_namespace("ns").len(), 10);
}

#[test]
fn test_reads_overlay_queued_actions() {
    let backend = MemoryBackend::new();
    let backing = start(&backend);
    backing.enqueue(PendingAction::put("gone", "ns", b"old".to_vec()));
    backing.enqueue(PendingAction::put("kept", "ns", b"old".to_vec()));
    backing.flush().expect("flush");

    backend.delay_writes(Duration::from_millis(20));
    backing.enqueue(PendingAction::put("slow", "other", b"x".to_vec()));
    backing.enqueue(PendingAction::remove("gone", "ns"));
    backing.enqueue(PendingAction::put("kept", "ns", b"new".to_vec()));
    backing.enqueue(PendingAction::put("fresh", "ns", b"new".to_vec()));

    // Whatever the writer has applied so far, reads see the latest action.
    assert_eq!(backing.load_one("gone", "ns").expect("load"), None);
    assert_eq!(backing.load_one("kept", "ns").expect("load"), Some(b"new".to_vec()));

    let mut rows = backing.load_namespace("ns").expect("load namespace");
    rows.sort();
    assert_eq!(
        rows,
        vec![
            ("fresh".to_string(), b"new".to_vec()),
            ("kept".to_string(), b"new".to_vec()),
        ]
    );

    let mut keys = backing.load_keys("ns").expect("load keys");
    keys.sort();
    assert_eq!(keys, vec!["fresh".to_string(), "kept".to_string()]);

    backing.flush().expect("flush");
}

#[test]
fn test_namespace_claims_are_exclusive() {
    let backing = start(&MemoryBackend::new());

    let claim = backing.claim("users").expect("first claim");
    let second = backing.claim("users");
    assert!(matches!(
        second,
        Err(Error::NamespaceInUse { ref namespace, .. }) if namespace == "users"
    ));

    // Other namespaces are independent.
    let _orders = backing.claim("orders").expect("other namespace");

    drop(claim);
    assert!(backing.claim("users").is_ok());
}

#[test]
fn test_shutdown_drains_then_stops_writer() {
    let backend = MemoryBackend::new();
    let backing = start(&backend);

    backing.enqueue(PendingAction::put("k", "ns", b"v".to_vec()));
    backing.shutdown().expect("shutdown");

    assert_eq!(backing.health(), WriterHealth::Stopped);
    assert_eq!(backend.committed_value("k", "ns"), Some(b"v".to_vec()));

    // Idempotent.
    backing.shutdown().expect("second shutdown");

    backing.enqueue(PendingAction::put("late", "ns", b"v".to_vec()));
    assert!(matches!(backing.flush(), Err(Error::ShutDown)));
    assert_eq!(backend.committed_value("late", "ns"), None);
}

#[test]
fn test_drop_flushes_pending_actions() {
    let backend = MemoryBackend::new();
    let backing = start(&backend);

    backing.enqueue(PendingAction::put("k", "ns", b"v".to_vec()));
    drop(backing);

    assert_eq!(backend.committed_value("k", "ns"), Some(b"v".to_vec()));
}

#[test]
fn test_keep_alive_is_released_once_applied() {
    let backend = MemoryBackend::new();
    let backing = start(&backend);
    let value = Arc::new(42_u32);
    let weak = Arc::downgrade(&value);

    backing.enqueue(PendingAction::put("k", "ns", b"v".to_vec()).with_keep_alive(value));
    backing.flush().expect("flush");

    assert!(weak.upgrade().is_none());
}
