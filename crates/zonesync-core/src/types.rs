//! Sync-state data model shared across the ZoneSync crates.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// An object key at the source zone: name plus version instance.
///
/// An empty instance (or the literal `"null"`) denotes the unversioned
/// object; any other instance identifies a specific version.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ObjectKey {
    /// Object name.
    pub name: String,
    /// Version instance, `""` or `"null"` for the unversioned object.
    #[serde(default)]
    pub instance: String,
}

impl ObjectKey {
    /// Creates a key for the unversioned object `name`.
    pub fn plain(name: impl Into<String>) -> Self {
        Self { name: name.into(), instance: String::new() }
    }

    /// Creates a key for a specific version of `name`.
    pub fn versioned(name: impl Into<String>, instance: impl Into<String>) -> Self {
        Self { name: name.into(), instance: instance.into() }
    }

    /// Whether this key names a specific version rather than the
    /// unversioned object.
    pub fn has_instance(&self) -> bool {
        !(self.instance.is_empty() || self.instance == "null")
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_instance() {
            write!(f, "{}[{}]", self.name, self.instance)
        } else {
            write!(f, "{}", self.name)
        }
    }
}

/// Identifies one shard of one bucket instance at the source zone.
///
/// The wire form is `<bucket>:<bucket_id>[:<shard_id>]`; an absent shard id
/// means the bucket index is unsharded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketShard {
    /// Bucket name.
    pub bucket: String,
    /// Bucket instance id.
    pub bucket_id: String,
    /// Bucket index shard, `None` for unsharded buckets.
    pub shard_id: Option<u32>,
}

impl BucketShard {
    /// Parses a raw `<bucket>:<bucket_id>[:<shard_id>]` key.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let (bucket, rest) = raw
            .split_once(':')
            .ok_or_else(|| Error::InvalidShardKey(raw.to_string()))?;
        if bucket.is_empty() || rest.is_empty() {
            return Err(Error::InvalidShardKey(raw.to_string()));
        }
        match rest.split_once(':') {
            Some((bucket_id, shard)) => {
                let shard_id = shard
                    .parse::<u32>()
                    .map_err(|_| Error::InvalidShardKey(raw.to_string()))?;
                Ok(Self {
                    bucket: bucket.to_string(),
                    bucket_id: bucket_id.to_string(),
                    shard_id: Some(shard_id),
                })
            }
            None => Ok(Self {
                bucket: bucket.to_string(),
                bucket_id: rest.to_string(),
                shard_id: None,
            }),
        }
    }

    /// The `<bucket>:<bucket_id>[:<shard_id>]` form used in remote requests
    /// and persisted object ids.
    pub fn instance_key(&self) -> String {
        match self.shard_id {
            Some(shard) => format!("{}:{}:{}", self.bucket, self.bucket_id, shard),
            None => format!("{}:{}", self.bucket, self.bucket_id),
        }
    }
}

impl fmt::Display for BucketShard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.instance_key())
    }
}

/// Top-level sync state for one source zone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Status object created, per-shard markers not yet seeded.
    #[default]
    Init,
    /// Building the sharded full-sync bucket-instance index.
    BuildingFullSyncMaps,
    /// Steady state: per-shard workers running.
    Sync,
}

/// Persisted top-level sync status, one per source zone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncInfo {
    /// Coordinator state. Advances only forward.
    pub state: SyncState,
    /// Number of data-log shards at the source zone.
    pub num_shards: u32,
}

/// Phase of a single data-log shard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardSyncState {
    /// Replaying the full-sync index.
    #[default]
    FullSync,
    /// Following the remote data log.
    IncrementalSync,
}

/// Persisted progress of one data-log shard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataShardMarker {
    /// Shard phase. Advances only forward.
    pub state: ShardSyncState,
    /// Resume cursor: a full-sync index key during `FullSync`, a data-log
    /// position during `IncrementalSync`.
    pub marker: String,
    /// Remote data-log position captured when full sync started; adopted as
    /// `marker` on the transition to incremental.
    pub next_step_marker: String,
    /// Position within the full-sync index.
    pub pos: u64,
    /// Total entries in this shard's full-sync index.
    pub total_entries: u64,
    /// Timestamp of the entry behind `marker`, when known.
    pub timestamp: Option<DateTime<Utc>>,
}

/// Phase of a single bucket shard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketShardState {
    /// No status initialized yet.
    #[default]
    Init,
    /// Listing the remote bucket shard.
    FullSync,
    /// Following the remote bucket-index log.
    IncrementalSync,
}

/// Full-sync progress of a bucket shard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullSyncMarker {
    /// Listing position reached.
    pub position: ObjectKey,
    /// Number of objects processed so far.
    pub count: u64,
    /// Modification time of the object behind `position`, when known.
    pub timestamp: Option<DateTime<Utc>>,
}

/// Incremental-sync progress of a bucket shard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncSyncMarker {
    /// Bucket-index log cursor.
    pub position: String,
}

/// Persisted sync status of one bucket shard, stored as an attribute bundle
/// so state and the two markers can be written independently.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketShardSyncInfo {
    /// Bucket shard phase. Advances only forward.
    pub state: BucketShardState,
    /// Full-sync progress.
    pub full_marker: FullSyncMarker,
    /// Incremental-sync progress.
    pub inc_marker: IncSyncMarker,
}

/// Maps a bucket shard onto the data-log shard that records its changes.
///
/// Mirrors the source zone's placement: a stable hash of the bucket name
/// offset by the bucket shard index, modulo the data-log shard count.
pub fn log_shard_id(bucket: &str, shard_id: Option<u32>, num_shards: u32) -> u32 {
    // FNV-1a; must stay stable across releases, persisted indexes depend on it.
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bucket.as_bytes() {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    ((hash.wrapping_add(u64::from(shard_id.unwrap_or(0)))) % u64::from(num_shards)) as u32
}
