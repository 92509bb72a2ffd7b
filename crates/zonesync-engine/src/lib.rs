//! Data-sync replication engine for ZoneSync.
//!
//! The engine mirrors a remote source zone into the local zone of a
//! geo-distributed object store through a two-tier state machine:
//!
//! 1. The **data log** — a partitioned change log across the source zone.
//!    The [`DataSync`] coordinator initializes per-zone status, builds the
//!    full-sync index once, and then runs one worker per data-log shard.
//! 2. **Bucket shards** — each data-log entry fans out to a bucket-shard
//!    sync ([`sync_bucket_shard`]) that bootstraps with a full listing and
//!    then follows the bucket-index log.
//!
//! Both tiers persist resume markers through the log store; markers only
//! advance over contiguous prefixes of completed work, so a crash never
//! skips entries and replication is at-least-once with idempotent
//! application.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bucket;
mod coordinator;
mod index;
mod shard;

pub mod error;
pub mod marker;
pub mod runtime;
pub mod tracker;

use std::sync::Arc;

pub use bucket::sync_bucket_shard;
pub use coordinator::DataSync;
pub use error::{Result, SyncError};
pub use index::FullSyncIndexBuilder;
pub use marker::MarkerStore;
pub use zonesync_core::SyncTuning;
use zonesync_remote::{ObjectTransfer, SourceZoneClient};
use zonesync_store::LogStore;

/// Shared dependencies of every sync task for one source zone.
pub struct SyncContext {
    /// Remote admin client for the source zone.
    pub remote: Arc<dyn SourceZoneClient>,
    /// Object copy/delete primitive.
    pub transfer: Arc<dyn ObjectTransfer>,
    /// Typed access to persisted sync status.
    pub markers: MarkerStore,
    /// Engine tuning.
    pub tuning: SyncTuning,
}

impl SyncContext {
    /// Builds a context for replicating `source_zone`.
    pub fn new(
        source_zone: impl Into<String>,
        store: Arc<dyn LogStore>,
        remote: Arc<dyn SourceZoneClient>,
        transfer: Arc<dyn ObjectTransfer>,
        tuning: SyncTuning,
    ) -> Self {
        let markers = MarkerStore::new(store, source_zone, tuning.lease_ttl());
        Self { remote, transfer, markers, tuning }
    }

    /// The source zone this context replicates from.
    pub fn source_zone(&self) -> &str {
        self.markers.source_zone()
    }
}
