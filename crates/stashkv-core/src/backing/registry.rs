//! Registry of backing stores keyed by physical store identifier.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{info, warn};

use super::store::BackingStore;
use crate::backend::{Backend, BackendError, SqliteBackend};
use crate::config::StashConfig;
use crate::error::{Error, Result};
use crate::store::{StrongStore, WeakStore};

/// Owns one [`BackingStore`] per physical store identifier.
///
/// Create one registry at startup and share it (by reference or `Arc`) with
/// everything that opens cache stores. Dropping the registry, or calling
/// [`shutdown`](Self::shutdown), flushes every backing store it created and
/// stops their writers; keep it alive until the process is done mutating.
///
/// # Example
///
/// ```rust,ignore
/// use stashkv_core::{BackingRegistry, StashConfig};
///
/// let registry = BackingRegistry::new(StashConfig::default());
/// let users = registry.open_strong::<User, _>("./data/app.db", "users")?;
/// users.put("ada", User::new("Ada"))?;
/// users.flush()?;
/// ```
pub struct BackingRegistry {
    config: Arc<StashConfig>,
    stores: Mutex<HashMap<String, Arc<BackingStore>>>,
    shut_down: AtomicBool,
}

impl BackingRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(config: StashConfig) -> Self {
        Self {
            config: Arc::new(config),
            stores: Mutex::new(HashMap::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Registry configuration.
    #[must_use]
    pub fn config(&self) -> &StashConfig {
        &self.config
    }

    /// Backing store of the SQLite file at `path`, opened on first use.
    ///
    /// The path string as given is the identifier: `./a.db` and `a.db` are
    /// different identifiers.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry is shut down, its configuration is
    /// invalid, or the file cannot be opened.
    pub fn get_or_create<P: AsRef<Path>>(&self, path: P) -> Result<Arc<BackingStore>> {
        let path = path.as_ref();
        let identifier = path.to_string_lossy().into_owned();
        let sqlite = self.config.sqlite.clone();
        self.get_or_create_with(&identifier, || {
            Ok(Box::new(SqliteBackend::open(path, &sqlite)?) as Box<dyn Backend>)
        })
    }

    /// Backing store of `identifier`, opening the backend with `open` on first use.
    ///
    /// `open` is not called when the identifier is already registered.
    ///
    /// # Errors
    ///
    /// - [`Error::ShutDown`] if the registry is shut down.
    /// - [`Error::Config`] if the registry configuration is invalid; `open`
    ///   is not called.
    /// - [`Error::Backend`] if `open` fails.
    pub fn get_or_create_with<F>(&self, identifier: &str, open: F) -> Result<Arc<BackingStore>>
    where
        F: FnOnce() -> std::result::Result<Box<dyn Backend>, BackendError>,
    {
        let mut stores = self.stores.lock();
        if self.shut_down.load(Ordering::Acquire) {
            return Err(Error::ShutDown);
        }
        if let Some(existing) = stores.get(identifier) {
            return Ok(Arc::clone(existing));
        }

        self.config.validate()?;
        let backend = open()?;
        let backing = Arc::new(BackingStore::start(
            identifier.to_string(),
            backend,
            Arc::clone(&self.config),
        )?);
        stores.insert(identifier.to_string(), Arc::clone(&backing));
        info!(identifier, "backing store opened");
        Ok(backing)
    }

    /// Registered backing store of `identifier`, if any.
    #[must_use]
    pub fn get(&self, identifier: &str) -> Option<Arc<BackingStore>> {
        self.stores.lock().get(identifier).cloned()
    }

    /// Identifiers of every registered backing store.
    #[must_use]
    pub fn identifiers(&self) -> Vec<String> {
        self.stores.lock().keys().cloned().collect()
    }

    /// Opens a [`StrongStore`] for `namespace` on the SQLite file at `path`.
    ///
    /// # Errors
    ///
    /// See [`get_or_create`](Self::get_or_create) and [`StrongStore::open`].
    pub fn open_strong<V, P>(&self, path: P, namespace: &str) -> Result<StrongStore<V>>
    where
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
        P: AsRef<Path>,
    {
        StrongStore::open(&self.get_or_create(path)?, namespace)
    }

    /// Opens a [`WeakStore`] for `namespace` on the SQLite file at `path`.
    ///
    /// # Errors
    ///
    /// See [`get_or_create`](Self::get_or_create) and [`WeakStore::open`].
    pub fn open_weak<V, P>(&self, path: P, namespace: &str) -> Result<WeakStore<V>>
    where
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
        P: AsRef<Path>,
    {
        WeakStore::open(&self.get_or_create(path)?, namespace)
    }

    /// Flushes every registered backing store.
    ///
    /// # Errors
    ///
    /// Returns the first flush error; every store is flushed regardless.
    pub fn flush_all(&self) -> Result<()> {
        let stores: Vec<Arc<BackingStore>> = self.stores.lock().values().cloned().collect();
        let mut first_error = None;
        for backing in stores {
            if let Err(e) = backing.flush() {
                warn!(identifier = %backing.identifier(), error = %e, "flush failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Flushes and stops every backing store, then refuses new ones.
    ///
    /// Cache stores still holding a backing store keep working in memory,
    /// but their later mutations are never persisted. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns the first shutdown error; every store is shut down regardless.
    pub fn shutdown(&self) -> Result<()> {
        let stores: Vec<Arc<BackingStore>> = {
            let mut stores = self.stores.lock();
            if self.shut_down.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
            stores.drain().map(|(_, backing)| backing).collect()
        };

        let mut first_error = None;
        for backing in stores {
            if let Err(e) = backing.shutdown() {
                warn!(identifier = %backing.identifier(), error = %e, "shutdown flush failed");
                first_error.get_or_insert(e);
            }
        }
        info!("registry shut down");
        first_error.map_or(Ok(()), Err)
    }
}

impl Default for BackingRegistry {
    fn default() -> Self {
        Self::new(StashConfig::default())
    }
}

impl Drop for BackingRegistry {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "registry dropped with unflushed mutations");
        }
    }
}

impl std::fmt::Debug for BackingRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackingRegistry")
            .field("identifiers", &self.identifiers())
            .field("shut_down", &self.shut_down.load(Ordering::Relaxed))
            .finish()
    }
}
