//! One backing store per physical store identifier.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{error, info, warn};

use super::action::{ActionKind, PendingAction};
use super::writer::{self, WriterHealth, WriterShared, WriterStats};
use crate::backend::Backend;
use crate::config::StashConfig;
use crate::error::{Error, Result};

/// The write path shared by every cache store bound to one physical store.
///
/// Owns the backend, the FIFO queue of [`PendingAction`]s and the single
/// writer thread that drains it. Obtain one through
/// [`BackingRegistry`](crate::BackingRegistry); two backing stores against
/// the same physical identifier would race each other's transactions.
pub struct BackingStore {
    shared: Arc<WriterShared>,
    config: Arc<StashConfig>,
    claims: Mutex<FxHashSet<String>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl BackingStore {
    /// Starts the writer thread over `backend`.
    ///
    /// Fails with [`Error::Config`] before spawning anything if `config` is
    /// invalid.
    pub(crate) fn start(
        identifier: String,
        backend: Box<dyn Backend>,
        config: Arc<StashConfig>,
    ) -> Result<Self> {
        config.validate()?;
        let shared = Arc::new(WriterShared::new(
            identifier,
            backend,
            config.writer.poll_interval(),
        ));
        let writer_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("stashkv-writer".to_string())
            .spawn(move || writer::run(writer_shared))
            .map_err(|e| Error::Internal(format!("cannot spawn writer thread: {e}")))?;

        Ok(Self {
            shared,
            config,
            claims: Mutex::new(FxHashSet::default()),
            writer: Mutex::new(Some(handle)),
        })
    }

    /// Physical store identifier.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.shared.identifier
    }

    /// Configuration inherited from the registry.
    #[must_use]
    pub fn config(&self) -> &StashConfig {
        &self.config
    }

    /// Writer thread liveness.
    #[must_use]
    pub fn health(&self) -> WriterHealth {
        self.shared.health()
    }

    /// Actions currently queued.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Writer statistics.
    #[must_use]
    pub fn stats(&self) -> WriterStats {
        let counters = &self.shared.counters;
        WriterStats {
            enqueued: counters.enqueued.load(Ordering::Relaxed),
            applied: counters.applied.load(Ordering::Relaxed),
            rejected: counters.rejected.load(Ordering::Relaxed),
            commits: counters.commits.load(Ordering::Relaxed),
            pending: self.pending(),
        }
    }

    /// Append an action to the queue.
    ///
    /// Never fails: with a dead or stopped writer the action is queued and
    /// never applied, which [`flush`](Self::flush) reports.
    pub(crate) fn enqueue(&self, action: PendingAction) {
        self.shared.queue.lock().push_back(action);
        self.shared.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        self.shared.enqueued.notify_one();
    }

    /// Blocks until every action queued before the call is applied and committed.
    ///
    /// The queue is shared by every namespace on this store, so a flush may
    /// also wait for unrelated traffic. Actions enqueued concurrently with the
    /// call may or may not be covered.
    ///
    /// # Errors
    ///
    /// - [`Error::WriterDead`] if the writer died; queued actions are lost.
    /// - [`Error::ShutDown`] if the writer was stopped with actions still queued.
    pub fn flush(&self) -> Result<()> {
        self.wait_drained(None)
    }

    /// [`flush`](Self::flush) with an upper bound on the wait.
    ///
    /// # Errors
    ///
    /// Same as [`flush`](Self::flush), plus [`Error::FlushTimeout`] when the
    /// queue did not drain in time. A timeout says nothing about durability
    /// of the queued actions; they stay queued.
    pub fn flush_timeout(&self, timeout: Duration) -> Result<()> {
        self.wait_drained(Some(Instant::now() + timeout))
    }

    fn wait_drained(&self, deadline: Option<Instant>) -> Result<()> {
        info!(identifier = %self.identifier(), "flushing");
        loop {
            if self.health() == WriterHealth::Dead {
                return Err(Error::WriterDead(self.identifier().to_string()));
            }

            let pending = {
                // The writer holds the apply lock from dequeue through commit.
                let _apply = self.shared.backend.lock();
                self.shared.queue.lock().len()
            };

            if pending == 0 {
                // A failed final commit leaves the queue empty but the writer dead.
                if self.health() == WriterHealth::Dead {
                    return Err(Error::WriterDead(self.identifier().to_string()));
                }
                info!(identifier = %self.identifier(), "flushed");
                return Ok(());
            }

            if self.health() == WriterHealth::Stopped {
                return Err(Error::ShutDown);
            }

            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(Error::FlushTimeout {
                    identifier: self.identifier().to_string(),
                    pending,
                });
            }

            std::thread::sleep(self.config.writer.flush_poll_interval());
        }
    }

    /// Current value of a row, including queued actions not yet applied.
    pub(crate) fn load_one(&self, key: &str, namespace: &str) -> Result<Option<Vec<u8>>> {
        let mut backend = self.shared.backend.lock();
        let queued = {
            let queue = self.shared.queue.lock();
            queue
                .iter()
                .rev()
                .find(|action| action.targets(key, namespace))
                .map(|action| match &action.kind {
                    ActionKind::Put(bytes) => Some(bytes.clone()),
                    ActionKind::Remove => None,
                })
        };
        match queued {
            Some(latest) => Ok(latest),
            None => Ok(backend.get_one(key, namespace)?),
        }
    }

    /// Every row of `namespace`, including queued actions not yet applied.
    pub(crate) fn load_namespace(&self, namespace: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let mut backend = self.shared.backend.lock();
        let mut rows: FxHashMap<String, Vec<u8>> =
            backend.get_all_in_namespace(namespace)?.into_iter().collect();
        let queue = self.shared.queue.lock();
        for action in queue.iter().filter(|a| a.namespace == namespace) {
            match &action.kind {
                ActionKind::Put(bytes) => {
                    rows.insert(action.key.clone(), bytes.clone());
                }
                ActionKind::Remove => {
                    rows.remove(&action.key);
                }
            }
        }
        Ok(rows.into_iter().collect())
    }

    /// Every key of `namespace`, including queued actions not yet applied.
    pub(crate) fn load_keys(&self, namespace: &str) -> Result<Vec<String>> {
        let mut backend = self.shared.backend.lock();
        let mut keys: FxHashSet<String> = backend
            .get_all_keys_in_namespace(namespace)?
            .into_iter()
            .collect();
        let queue = self.shared.queue.lock();
        for action in queue.iter().filter(|a| a.namespace == namespace) {
            match action.kind {
                ActionKind::Put(_) => {
                    keys.insert(action.key.clone());
                }
                ActionKind::Remove => {
                    keys.remove(&action.key);
                }
            }
        }
        Ok(keys.into_iter().collect())
    }

    /// Reserve `namespace` for one cache store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NamespaceInUse`] while another claim on the same
    /// namespace is alive.
    pub fn claim(self: &Arc<Self>, namespace: &str) -> Result<NamespaceClaim> {
        if !self.claims.lock().insert(namespace.to_string()) {
            return Err(Error::NamespaceInUse {
                identifier: self.identifier().to_string(),
                namespace: namespace.to_string(),
            });
        }
        Ok(NamespaceClaim {
            backing: Arc::clone(self),
            namespace: namespace.to_string(),
        })
    }

    /// Namespaces currently claimed by live cache stores.
    #[must_use]
    pub fn claimed_namespaces(&self) -> Vec<String> {
        self.claims.lock().iter().cloned().collect()
    }

    /// Flushes, then stops and joins the writer. Idempotent.
    ///
    /// Actions enqueued after this call are never applied.
    ///
    /// # Errors
    ///
    /// Returns the flush error, if any; the writer is stopped regardless.
    pub fn shutdown(&self) -> Result<()> {
        let flushed = match self.health() {
            WriterHealth::Running => self.flush(),
            WriterHealth::Stopped => Ok(()),
            WriterHealth::Dead => Err(Error::WriterDead(self.identifier().to_string())),
        };

        self.shared.stop.store(true, Ordering::Release);
        self.shared.enqueued.notify_all();
        if let Some(handle) = self.writer.lock().take() {
            if handle.join().is_err() {
                error!(identifier = %self.identifier(), "writer thread panicked");
            }
        }
        flushed
    }
}

impl Drop for BackingStore {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(identifier = %self.identifier(), error = %e, "backing store dropped without a clean flush");
        }
    }
}

impl std::fmt::Debug for BackingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackingStore")
            .field("identifier", &self.identifier())
            .field("health", &self.health())
            .field("pending", &self.pending())
            .finish()
    }
}

/// Exclusive right to serve one namespace of a backing store.
///
/// Released when dropped.
pub struct NamespaceClaim {
    backing: Arc<BackingStore>,
    namespace: String,
}

impl NamespaceClaim {
    /// The claimed backing store.
    #[must_use]
    pub fn backing(&self) -> &Arc<BackingStore> {
        &self.backing
    }

    /// The claimed namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

impl Drop for NamespaceClaim {
    fn drop(&mut self) {
        self.backing.claims.lock().remove(&self.namespace);
    }
}

impl std::fmt::Debug for NamespaceClaim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamespaceClaim")
            .field("identifier", &self.backing.identifier())
            .field("namespace", &self.namespace)
            .finish()
    }
}
