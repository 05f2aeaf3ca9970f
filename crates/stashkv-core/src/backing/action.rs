//! Queued persistence actions.

use std::any::Any;
use std::sync::Arc;

/// Strong hold on a value whose write is still queued.
pub(crate) type KeepAlive = Arc<dyn Any + Send + Sync>;

/// What the writer does with an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ActionKind {
    /// Upsert the serialized value.
    Put(Vec<u8>),
    /// Delete the row.
    Remove,
}

/// One mutation waiting in a backing store's queue.
pub(crate) struct PendingAction {
    pub(crate) key: String,
    pub(crate) namespace: String,
    pub(crate) kind: ActionKind,
    /// Keeps a weak-store value reachable until the write is applied; the writer ignores it.
    keep_alive: Option<KeepAlive>,
}

impl PendingAction {
    /// Upsert of `value` for `(key, namespace)`.
    #[must_use]
    pub(crate) fn put(key: &str, namespace: &str, value: Vec<u8>) -> Self {
        Self {
            key: key.to_string(),
            namespace: namespace.to_string(),
            kind: ActionKind::Put(value),
            keep_alive: None,
        }
    }

    /// Delete of `(key, namespace)`.
    #[must_use]
    pub(crate) fn remove(key: &str, namespace: &str) -> Self {
        Self {
            key: key.to_string(),
            namespace: namespace.to_string(),
            kind: ActionKind::Remove,
            keep_alive: None,
        }
    }

    /// Hold `value` alive until this action has been applied.
    #[must_use]
    pub(crate) fn with_keep_alive(mut self, value: KeepAlive) -> Self {
        self.keep_alive = Some(value);
        self
    }

    pub(crate) fn targets(&self, key: &str, namespace: &str) -> bool {
        self.key == key && self.namespace == namespace
    }
}

impl std::fmt::Debug for PendingAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.kind {
            ActionKind::Put(bytes) => format!("Put({} bytes)", bytes.len()),
            ActionKind::Remove => "Remove".to_string(),
        };
        f.debug_struct("PendingAction")
            .field("key", &self.key)
            .field("namespace", &self.namespace)
            .field("kind", &kind)
            .field("keep_alive", &self.keep_alive.is_some())
            .finish()
    }
}
