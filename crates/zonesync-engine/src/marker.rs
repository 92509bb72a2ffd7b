//! Durable sync-status access.
//!
//! All replication progress lives in the log store under a fixed object-id
//! layout:
//!
//! - `datalog.sync-status.<source_zone>` — top-level [`SyncInfo`]
//! - `datalog.sync-status.shard.<source_zone>.<shard_id>` — per-shard
//!   [`DataShardMarker`]
//! - `data.full-sync.index.<source_zone>.<shard_id>` — full-sync index
//!   shard (omap)
//! - `bucket.sync-status.<source_zone>:<bucket>:<bucket_id>[:<shard_id>]`
//!   — [`BucketShardSyncInfo`] as an attribute bundle, so the state and
//!   the two markers can be written independently

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::trace;
use uuid::Uuid;
use zonesync_core::{
    BucketShard, BucketShardState, BucketShardSyncInfo, DataShardMarker, FullSyncMarker,
    IncSyncMarker, SyncInfo,
};
use zonesync_store::LogStore;

use crate::error::{Result, SyncError};

const LOCK_NAME: &str = "sync_lock";

const ATTR_STATE: &str = "state";
const ATTR_FULL_MARKER: &str = "full_marker";
const ATTR_INC_MARKER: &str = "inc_marker";

/// Typed access to persisted sync status for one source zone.
#[derive(Clone)]
pub struct MarkerStore {
    store: Arc<dyn LogStore>,
    source_zone: String,
    lease_ttl: Duration,
}

impl MarkerStore {
    /// Creates a marker store for `source_zone`.
    pub fn new(store: Arc<dyn LogStore>, source_zone: impl Into<String>, lease_ttl: Duration) -> Self {
        Self { store, source_zone: source_zone.into(), lease_ttl }
    }

    /// The underlying log store.
    pub fn store(&self) -> &Arc<dyn LogStore> {
        &self.store
    }

    /// The source zone this store tracks.
    pub fn source_zone(&self) -> &str {
        &self.source_zone
    }

    /// Object id of the top-level sync status.
    pub fn sync_status_oid(&self) -> String {
        format!("datalog.sync-status.{}", self.source_zone)
    }

    /// Object id of one data-log shard's marker.
    pub fn shard_marker_oid(&self, shard_id: u32) -> String {
        format!("datalog.sync-status.shard.{}.{}", self.source_zone, shard_id)
    }

    /// Object id of one full-sync index shard.
    pub fn full_sync_index_oid(&self, shard_id: u32) -> String {
        format!("data.full-sync.index.{}.{}", self.source_zone, shard_id)
    }

    /// Object id of one bucket shard's sync status.
    pub fn bucket_status_oid(&self, shard: &BucketShard) -> String {
        format!("bucket.sync-status.{}:{}", self.source_zone, shard.instance_key())
    }

    async fn read_json<T: DeserializeOwned>(&self, oid: &str) -> Result<Option<T>> {
        match self.store.get(oid).await? {
            None => Ok(None),
            Some(data) => serde_json::from_slice(&data)
                .map(Some)
                .map_err(|e| SyncError::CorruptStatus { oid: oid.to_string(), reason: e.to_string() }),
        }
    }

    async fn write_json<T: Serialize>(&self, oid: &str, value: &T) -> Result<()> {
        let data = serde_json::to_vec(value)
            .map_err(|e| SyncError::CorruptStatus { oid: oid.to_string(), reason: e.to_string() })?;
        trace!(%oid, "writing sync status");
        self.store.put(oid, Bytes::from(data)).await?;
        Ok(())
    }

    /// Reads the top-level sync status, `None` when never initialized.
    pub async fn read_sync_info(&self) -> Result<Option<SyncInfo>> {
        self.read_json(&self.sync_status_oid()).await
    }

    /// Writes the top-level sync status.
    pub async fn write_sync_info(&self, info: &SyncInfo) -> Result<()> {
        self.write_json(&self.sync_status_oid(), info).await
    }

    /// Reads one data-log shard's marker, `None` when never initialized.
    pub async fn read_shard_marker(&self, shard_id: u32) -> Result<Option<DataShardMarker>> {
        self.read_json(&self.shard_marker_oid(shard_id)).await
    }

    /// Writes one data-log shard's marker.
    pub async fn write_shard_marker(&self, shard_id: u32, marker: &DataShardMarker) -> Result<()> {
        self.write_json(&self.shard_marker_oid(shard_id), marker).await
    }

    /// Reads one bucket shard's sync status. An absent status decodes to
    /// the default (`Init`) so first contact needs no special casing.
    pub async fn read_bucket_status(&self, shard: &BucketShard) -> Result<BucketShardSyncInfo> {
        let oid = self.bucket_status_oid(shard);
        let Some(attrs) = self.store.get_attrs(&oid).await? else {
            return Ok(BucketShardSyncInfo::default());
        };
        Ok(BucketShardSyncInfo {
            state: decode_attr(&oid, &attrs, ATTR_STATE)?,
            full_marker: decode_attr(&oid, &attrs, ATTR_FULL_MARKER)?,
            inc_marker: decode_attr(&oid, &attrs, ATTR_INC_MARKER)?,
        })
    }

    /// Writes a bucket shard's full status bundle.
    pub async fn write_bucket_status(
        &self,
        shard: &BucketShard,
        status: &BucketShardSyncInfo,
    ) -> Result<()> {
        let oid = self.bucket_status_oid(shard);
        let attrs = HashMap::from([
            (ATTR_STATE.to_string(), encode_attr(&oid, &status.state)?),
            (ATTR_FULL_MARKER.to_string(), encode_attr(&oid, &status.full_marker)?),
            (ATTR_INC_MARKER.to_string(), encode_attr(&oid, &status.inc_marker)?),
        ]);
        self.store.put_attrs(&oid, attrs).await?;
        Ok(())
    }

    /// Writes only a bucket shard's state attribute.
    pub async fn write_bucket_state(
        &self,
        shard: &BucketShard,
        state: BucketShardState,
    ) -> Result<()> {
        let oid = self.bucket_status_oid(shard);
        let attrs = HashMap::from([(ATTR_STATE.to_string(), encode_attr(&oid, &state)?)]);
        self.store.put_attrs(&oid, attrs).await?;
        Ok(())
    }

    /// Writes only a bucket shard's full-sync marker attribute.
    pub async fn write_bucket_full_marker(
        &self,
        shard: &BucketShard,
        marker: &FullSyncMarker,
    ) -> Result<()> {
        let oid = self.bucket_status_oid(shard);
        let attrs = HashMap::from([(ATTR_FULL_MARKER.to_string(), encode_attr(&oid, marker)?)]);
        self.store.put_attrs(&oid, attrs).await?;
        Ok(())
    }

    /// Writes only a bucket shard's incremental-sync marker attribute.
    pub async fn write_bucket_inc_marker(
        &self,
        shard: &BucketShard,
        marker: &IncSyncMarker,
    ) -> Result<()> {
        let oid = self.bucket_status_oid(shard);
        let attrs = HashMap::from([(ATTR_INC_MARKER.to_string(), encode_attr(&oid, marker)?)]);
        self.store.put_attrs(&oid, attrs).await?;
        Ok(())
    }

    /// Generates a lease cookie for one initialization pass.
    pub fn lease_cookie() -> String {
        Uuid::new_v4().to_string()
    }

    /// Acquires (or re-acquires) the status lease on `oid`. The store may
    /// drop the lease when the object is rewritten, so initialization
    /// re-acquires after every status write it depends on.
    pub async fn acquire_lease(&self, oid: &str, cookie: &str) -> Result<()> {
        self.store.lock(oid, LOCK_NAME, cookie, self.lease_ttl).await?;
        Ok(())
    }

    /// Releases the status lease on `oid`.
    pub async fn release_lease(&self, oid: &str, cookie: &str) -> Result<()> {
        self.store.unlock(oid, LOCK_NAME, cookie).await?;
        Ok(())
    }
}

fn encode_attr<T: Serialize>(oid: &str, value: &T) -> Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| SyncError::CorruptStatus { oid: oid.to_string(), reason: e.to_string() })
}

fn decode_attr<T: DeserializeOwned + Default>(
    oid: &str,
    attrs: &HashMap<String, Bytes>,
    name: &str,
) -> Result<T> {
    match attrs.get(name) {
        None => Ok(T::default()),
        Some(raw) => serde_json::from_slice(raw).map_err(|e| SyncError::CorruptStatus {
            oid: oid.to_string(),
            reason: format!("attribute {name:?}: {e}"),
        }),
    }
}
