//! Error taxonomy for the replication engine.

use thiserror::Error;
use zonesync_remote::{RemoteError, TransferError};
use zonesync_store::StoreError;

/// A specialized `Result` type for engine operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors surfaced by sync tasks.
///
/// Kinds map onto the retry policy: transient errors are retried by the
/// surrounding loop, not-found from the source counts as success at the
/// call site, parse and store errors are fatal for the affected worker.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Log-store failure.
    #[error("log store: {0}")]
    Store(#[from] StoreError),

    /// Source zone request failure.
    #[error("source zone: {0}")]
    Remote(#[from] RemoteError),

    /// Object transfer failure.
    #[error("object transfer: {0}")]
    Transfer(#[from] TransferError),

    /// A data-log entry carried a key that does not parse as a bucket
    /// shard.
    #[error("malformed bucket shard key: {0:?}")]
    BadShardKey(String),

    /// A persisted status object did not decode.
    #[error("corrupt sync status in {oid:?}: {reason}")]
    CorruptStatus {
        /// Object id holding the status.
        oid: String,
        /// Decode failure detail.
        reason: String,
    },

    /// The full-sync index build did not complete; the partial index must
    /// not be consumed.
    #[error("full-sync index build failed: {0}")]
    IndexBuild(String),

    /// The source zone answered with a configuration sync cannot run
    /// against.
    #[error("unusable source zone configuration: {0}")]
    InvalidSource(String),
}

impl SyncError {
    /// Whether a retry after a delay may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Remote(e) => e.is_transient(),
            Self::Transfer(e) => e.is_transient(),
            Self::Store(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Whether the affected worker must stop rather than continue past
    /// this entry.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Store(_)
                | Self::BadShardKey(_)
                | Self::CorruptStatus { .. }
                | Self::IndexBuild(_)
                | Self::InvalidSource(_)
        )
    }
}

impl From<zonesync_core::Error> for SyncError {
    fn from(err: zonesync_core::Error) -> Self {
        match err {
            zonesync_core::Error::InvalidShardKey(key) => Self::BadShardKey(key),
            other => Self::CorruptStatus { oid: String::new(), reason: other.to_string() },
        }
    }
}
