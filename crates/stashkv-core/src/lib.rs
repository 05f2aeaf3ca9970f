//! # `stashkv` Core
//!
//! Write-behind key/value cache over a durable local store.
//!
//! Reads are in-memory lookups, with misses answered by a bloom filter.
//! Writes are visible as soon as the call returns and are persisted
//! asynchronously by one writer thread per physical store, which commits
//! whenever it catches up with its queue. `flush` is the durability
//! checkpoint.
//!
//! ## Features
//!
//! - **Strong stores**: every value of a namespace kept in memory
//! - **Weak stores**: keys in memory, values reloaded once reclaimed
//! - **Namespace claims**: one cache store per `(store, namespace)`
//! - **Pluggable backends**: SQLite, or in-memory for tests
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stashkv_core::{BackingRegistry, StashConfig};
//!
//! let registry = BackingRegistry::new(StashConfig::load()?);
//! let sessions = registry.open_strong::<Session, _>("./data/app.db", "sessions")?;
//!
//! let handle = sessions.put("ada", Session::new("ada"))?;
//! handle.write().hits += 1;
//! sessions.update("ada")?;
//!
//! sessions.flush()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::redundant_pub_crate)]
#![allow(clippy::missing_const_for_fn)]

pub mod backend;
pub mod backing;
pub mod bloom;
pub mod codec;
pub mod config;
pub mod error;
pub mod logging;
pub mod store;

pub use backend::{Backend, BackendError, MemoryBackend, SqliteBackend};
pub use backing::{BackingRegistry, BackingStore, NamespaceClaim, WriterHealth, WriterStats};
pub use bloom::{BloomFilter, CountingBloomFilter};
pub use config::{
    BloomConfig, ConfigError, LoggingConfig, SqliteConfig, StashConfig, StrongConfig, WeakConfig,
    WriterConfig,
};
pub use error::{Error, Result};
pub use store::{CacheStats, Handle, StrongStore, WeakStore};
