//! Error types for `stashkv`.
//!
//! Cache operations only fail for local reasons (serialization, contract
//! violations, registry conflicts). Backend failures on the write path are
//! reported asynchronously by the writer and never surface here.

use thiserror::Error;

use crate::backend::BackendError;
use crate::config::ConfigError;

/// Result type alias for `stashkv` operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in `stashkv` operations.
///
/// Error codes follow the pattern `STASH-XXX` for easy debugging.
#[derive(Error, Debug)]
pub enum Error {
    /// Value could not be encoded or decoded (STASH-001).
    #[error("[STASH-001] Serialization error: {0}")]
    Serialization(String),

    /// Backend read or open failure (STASH-002).
    #[error("[STASH-002] Backend error: {0}")]
    Backend(#[from] BackendError),

    /// A cache store already serves this namespace on this backing store (STASH-003).
    #[error("[STASH-003] Namespace '{namespace}' is already served on '{identifier}'")]
    NamespaceInUse {
        /// Physical store identifier.
        identifier: String,
        /// Namespace that is already claimed.
        namespace: String,
    },

    /// The cached reference was reclaimed before `update` (STASH-004).
    #[error("[STASH-004] Entry '{0}' was reclaimed; hold a live handle across in-place mutations")]
    Reclaimed(String),

    /// The writer thread is dead; queued mutations will never be persisted (STASH-005).
    #[error("[STASH-005] Writer for '{0}' is dead; pending mutations cannot be persisted")]
    WriterDead(String),

    /// `flush_timeout` elapsed before the queue drained (STASH-006).
    #[error("[STASH-006] Flush of '{identifier}' timed out with {pending} pending actions")]
    FlushTimeout {
        /// Physical store identifier.
        identifier: String,
        /// Actions still queued when the timeout elapsed.
        pending: usize,
    },

    /// The registry has been shut down (STASH-007).
    #[error("[STASH-007] Registry is shut down")]
    ShutDown,

    /// Configuration error (STASH-008).
    #[error("[STASH-008] Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Internal error (STASH-009).
    ///
    /// Indicates an unexpected internal error. Please report if encountered.
    #[error("[STASH-009] Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns the error code (e.g., "STASH-001").
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Serialization(_) => "STASH-001",
            Self::Backend(_) => "STASH-002",
            Self::NamespaceInUse { .. } => "STASH-003",
            Self::Reclaimed(_) => "STASH-004",
            Self::WriterDead(_) => "STASH-005",
            Self::FlushTimeout { .. } => "STASH-006",
            Self::ShutDown => "STASH-007",
            Self::Config(_) => "STASH-008",
            Self::Internal(_) => "STASH-009",
        }
    }

    /// Returns true if this error is recoverable.
    ///
    /// A dead writer and internal errors are not.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::WriterDead(_) | Self::Internal(_))
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
