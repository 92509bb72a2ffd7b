//! Object transfer primitives.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;
use zonesync_core::{BucketShard, ObjectKey};

/// A specialized `Result` type for transfer operations.
pub type Result<T> = std::result::Result<T, TransferError>;

/// Errors copying or removing a single object replica.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// The object no longer exists at the source.
    #[error("object not found at source")]
    NotFound,

    /// The transfer failed and may succeed on retry.
    #[error("transfer failed: {0}")]
    Transient(String),

    /// The transfer failed permanently for this object.
    #[error("transfer rejected: {0}")]
    Permanent(String),
}

impl TransferError {
    /// Whether a retry after a delay may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Whether the source no longer has the object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// Copies single objects from the source zone into the local zone.
///
/// Both operations are idempotent: fetching an object whose local copy
/// already matches the versioned epoch is a no-op, and removing a missing
/// object succeeds.
#[async_trait]
pub trait ObjectTransfer: Send + Sync + 'static {
    /// Mirrors one object (or object version) from the source zone.
    async fn fetch_object(
        &self,
        source_zone: &str,
        bucket: &BucketShard,
        key: &ObjectKey,
        versioned_epoch: u64,
    ) -> Result<()>;

    /// Applies a deletion observed at the source zone.
    async fn remove_object(
        &self,
        source_zone: &str,
        bucket: &BucketShard,
        key: &ObjectKey,
        versioned_epoch: u64,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<()>;
}

/// Transfer primitive that only logs, for dry runs and tests.
#[derive(Debug, Default)]
pub struct NoOpTransfer;

#[async_trait]
impl ObjectTransfer for NoOpTransfer {
    async fn fetch_object(
        &self,
        source_zone: &str,
        bucket: &BucketShard,
        key: &ObjectKey,
        versioned_epoch: u64,
    ) -> Result<()> {
        debug!(%source_zone, %bucket, %key, versioned_epoch, "noop fetch");
        Ok(())
    }

    async fn remove_object(
        &self,
        source_zone: &str,
        bucket: &BucketShard,
        key: &ObjectKey,
        versioned_epoch: u64,
        _timestamp: Option<DateTime<Utc>>,
    ) -> Result<()> {
        debug!(%source_zone, %bucket, %key, versioned_epoch, "noop remove");
        Ok(())
    }
}
