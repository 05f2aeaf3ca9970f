//! Write-behind persistence: backing stores, their queue, and the registry.
//!
//! Every cache store enqueues pending actions on the [`BackingStore`] of
//! its physical store identifier. One writer thread per backing store applies
//! them in FIFO order and commits whenever it catches up with the queue.
//!
//! # Lock Ordering
//!
//! cache store lock → backend (apply) lock → queue lock. The writer never
//! takes a cache store lock.

mod action;
mod registry;
mod store;
#[cfg(test)]
mod store_tests;
mod writer;

pub(crate) use action::{KeepAlive, PendingAction};
pub use registry::BackingRegistry;
pub use store::{BackingStore, NamespaceClaim};
pub use writer::{WriterHealth, WriterStats};
