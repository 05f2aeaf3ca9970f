//! The single writer thread of a backing store.
//!
//! The writer drains the queue in FIFO order and commits only when it has
//! caught up, so one physical commit covers every action applied since the
//! previous one. It holds the apply lock (the backend mutex) from dequeue
//! through commit; anyone who observes an empty queue while holding that
//! lock knows every earlier action is applied and committed.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use super::action::{ActionKind, PendingAction};
use crate::backend::Backend;

/// Liveness of a backing store's writer thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterHealth {
    /// Draining the queue.
    Running,
    /// Stopped after a clean shutdown; the queue was drained first.
    Stopped,
    /// Terminated by a fatal error. Queued actions will never be persisted.
    Dead,
}

impl WriterHealth {
    const RUNNING: u8 = 0;
    const STOPPED: u8 = 1;
    const DEAD: u8 = 2;

    fn from_u8(raw: u8) -> Self {
        match raw {
            Self::RUNNING => Self::Running,
            Self::STOPPED => Self::Stopped,
            _ => Self::Dead,
        }
    }
}

/// Writer statistics for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Actions enqueued since creation.
    pub enqueued: u64,
    /// Actions the backend accepted.
    pub applied: u64,
    /// Actions the backend rejected (logged and skipped).
    pub rejected: u64,
    /// Successful commits.
    pub commits: u64,
    /// Actions currently queued.
    pub pending: usize,
}

#[derive(Default)]
pub(super) struct Counters {
    pub(super) enqueued: AtomicU64,
    pub(super) applied: AtomicU64,
    pub(super) rejected: AtomicU64,
    pub(super) commits: AtomicU64,
}

/// State shared between a backing store, its writer, and readers.
pub(super) struct WriterShared {
    pub(super) identifier: String,
    /// Apply lock. Lock order: `backend` before `queue`.
    pub(super) backend: Mutex<Box<dyn Backend>>,
    pub(super) queue: Mutex<VecDeque<PendingAction>>,
    pub(super) enqueued: Condvar,
    pub(super) stop: AtomicBool,
    health: AtomicU8,
    pub(super) counters: Counters,
    poll_interval: Duration,
}

impl WriterShared {
    pub(super) fn new(identifier: String, backend: Box<dyn Backend>, poll_interval: Duration) -> Self {
        Self {
            identifier,
            backend: Mutex::new(backend),
            queue: Mutex::new(VecDeque::new()),
            enqueued: Condvar::new(),
            stop: AtomicBool::new(false),
            health: AtomicU8::new(WriterHealth::RUNNING),
            counters: Counters::default(),
            poll_interval,
        }
    }

    pub(super) fn health(&self) -> WriterHealth {
        WriterHealth::from_u8(self.health.load(Ordering::Acquire))
    }

    fn set_health(&self, health: WriterHealth) {
        let raw = match health {
            WriterHealth::Running => WriterHealth::RUNNING,
            WriterHealth::Stopped => WriterHealth::STOPPED,
            WriterHealth::Dead => WriterHealth::DEAD,
        };
        self.health.store(raw, Ordering::Release);
    }
}

/// Marks the writer dead if its thread unwinds.
///
/// The guard around each action is declared after the apply lock, so it
/// fires before the lock is released and a flush never sees the drained
/// queue of a dying writer that still reports `Running`.
struct PanicGuard<'a>(&'a WriterShared);

impl Drop for PanicGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() && self.0.health() != WriterHealth::Dead {
            self.0.set_health(WriterHealth::Dead);
            error!(
                identifier = %self.0.identifier,
                "writer panicked; queued mutations will not be persisted"
            );
        }
    }
}

/// Writer thread body.
pub(super) fn run(shared: Arc<WriterShared>) {
    let _guard = PanicGuard(&shared);
    info!(identifier = %shared.identifier, "writer started");

    loop {
        {
            let mut queue = shared.queue.lock();
            while queue.is_empty() {
                if shared.stop.load(Ordering::Acquire) {
                    shared.set_health(WriterHealth::Stopped);
                    info!(identifier = %shared.identifier, "writer stopped");
                    return;
                }
                shared.enqueued.wait_for(&mut queue, shared.poll_interval);
            }
        }

        let mut backend = shared.backend.lock();
        let _dying = PanicGuard(&shared);
        // Only this thread pops, so the queue is still non-empty.
        let Some(action) = shared.queue.lock().pop_front() else {
            continue;
        };
        apply(&shared, &mut **backend, &action);
        drop(action);

        let caught_up = shared.queue.lock().is_empty();
        if caught_up {
            if let Err(e) = backend.commit() {
                shared.set_health(WriterHealth::Dead);
                error!(
                    identifier = %shared.identifier,
                    error = %e,
                    "commit failed; writer died and no further mutations will be persisted"
                );
                return;
            }
            shared.counters.commits.fetch_add(1, Ordering::Relaxed);
            debug!(identifier = %shared.identifier, "caught up, committed");
        }
    }
}

fn apply(shared: &WriterShared, backend: &mut dyn Backend, action: &PendingAction) {
    let result = match &action.kind {
        ActionKind::Put(bytes) => backend.upsert(&action.key, &action.namespace, bytes),
        ActionKind::Remove => backend.delete(&action.key, &action.namespace),
    };
    match result {
        Ok(()) => {
            shared.counters.applied.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(
                identifier = %shared.identifier,
                key = %action.key,
                namespace = %action.namespace,
                error = %e,
                "backend rejected action; skipping"
            );
        }
    }
}
