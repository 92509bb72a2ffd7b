//! JSON DTOs for the source zone's admin and listing endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Response of `GET /admin/log?type=data`: data-log shard count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataLogInfo {
    /// Number of data-log shards at the source zone.
    pub num_objects: u32,
}

/// Response of `GET /admin/log?type=data&id=<shard>&info`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DataLogShardInfo {
    /// Highest position in the shard's log.
    pub marker: String,
    /// When the shard was last written.
    pub last_update: Option<DateTime<Utc>>,
}

/// One data-log entry body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DataLogEntryBody {
    /// Bucket shard key `<bucket>:<bucket_id>[:<shard_id>]`.
    pub key: String,
    /// When the change was recorded.
    pub timestamp: Option<DateTime<Utc>>,
}

/// One entry of a data-log shard listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DataChangeEntry {
    /// Log position of this entry.
    pub log_id: String,
    /// When the entry was appended.
    pub log_timestamp: Option<DateTime<Utc>>,
    /// The change itself.
    pub entry: DataLogEntryBody,
}

/// Response of `GET /admin/log?type=data&id=<shard>&marker=<m>&extra-info=true`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DataLogPage {
    /// Position to resume the next fetch from.
    pub marker: String,
    /// Whether more entries are available.
    pub truncated: bool,
    /// Entries after the requested marker.
    pub entries: Vec<DataChangeEntry>,
}

/// Response of `GET /admin/log?type=bucket-index&bucket-instance=<key>&info`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketIndexInfo {
    /// Bucket index version.
    pub bucket_ver: String,
    /// Master version.
    pub master_ver: String,
    /// Highest position in the bucket-index log.
    pub max_marker: String,
}

/// Object-level mutation kind recorded in the bucket-index log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiLogOp {
    /// Object written.
    #[serde(rename = "write")]
    Add,
    /// Object deleted.
    Del,
    /// Version list linked to a specific version.
    LinkOlh,
    /// Any other operation; ignored by replication.
    #[serde(other)]
    Unknown,
}

/// Version pointer carried by a bucket-index log entry. The epoch counts
/// only when `pool` is negative.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BiLogVersion {
    /// Placement pool, negative when the epoch is authoritative.
    pub pool: i64,
    /// Versioned epoch of the object.
    pub epoch: u64,
}

impl BiLogVersion {
    /// The versioned epoch to replicate with, or 0 when not applicable.
    pub fn versioned_epoch(&self) -> u64 {
        if self.pool < 0 {
            self.epoch
        } else {
            0
        }
    }
}

/// One bucket-index log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiLogEntry {
    /// Log position of this entry.
    pub id: String,
    /// Object name.
    pub object: String,
    /// Version instance, empty for the unversioned object.
    #[serde(default)]
    pub instance: String,
    /// When the mutation happened.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Mutation kind.
    pub op: BiLogOp,
    /// Version pointer.
    #[serde(default)]
    pub ver: BiLogVersion,
}

/// Bucket description inside instance metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketRef {
    /// Bucket name.
    pub name: String,
    /// Bucket instance id.
    pub bucket_id: String,
}

/// `bucket_info` section of instance metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketInstanceInfo {
    /// The bucket this instance belongs to.
    pub bucket: BucketRef,
    /// Bucket index shard count, 0 for unsharded buckets.
    pub num_shards: u32,
}

/// `data` section of instance metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketInstanceData {
    /// Bucket instance description.
    pub bucket_info: BucketInstanceInfo,
}

/// Response of `GET /admin/metadata/bucket.instance?key=<k>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketInstanceMeta {
    /// The instance key `<bucket>:<bucket_id>`.
    pub key: String,
    /// Metadata modification time, seconds since the epoch.
    pub mtime: Option<i64>,
    /// Instance payload.
    pub data: BucketInstanceData,
}

/// Owner of a listed object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BucketEntryOwner {
    /// Owner id.
    #[serde(rename = "ID", default)]
    pub id: String,
    /// Display name.
    #[serde(rename = "DisplayName", default)]
    pub display_name: String,
}

/// One entry of a versioned bucket-shard listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BucketListEntry {
    /// Whether the entry is a delete marker.
    #[serde(rename = "IsDeleteMarker", default)]
    pub delete_marker: bool,
    /// Object name.
    #[serde(rename = "Key")]
    pub key: String,
    /// Version id, empty for the unversioned object.
    #[serde(rename = "VersionId", default)]
    pub version_id: String,
    /// Whether this is the latest version.
    #[serde(rename = "IsLatest", default)]
    pub is_latest: bool,
    /// Last modification time.
    #[serde(rename = "LastModified", default)]
    pub last_modified: Option<DateTime<Utc>>,
    /// Entity tag.
    #[serde(rename = "ETag", default)]
    pub etag: String,
    /// Object size in bytes.
    #[serde(rename = "Size", default)]
    pub size: u64,
    /// Storage class.
    #[serde(rename = "StorageClass", default)]
    pub storage_class: String,
    /// Object owner.
    #[serde(rename = "Owner", default)]
    pub owner: BucketEntryOwner,
    /// Versioned epoch of this version.
    #[serde(rename = "VersionedEpoch", default)]
    pub versioned_epoch: u64,
    /// Gateway tag.
    #[serde(rename = "RgwxTag", default)]
    pub tag: String,
}

/// Response of the versioned bucket-shard listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BucketListResult {
    /// Bucket name.
    #[serde(rename = "Name", default)]
    pub name: String,
    /// Key continuation marker echoed back.
    #[serde(rename = "KeyMarker", default)]
    pub key_marker: String,
    /// Version continuation marker echoed back.
    #[serde(rename = "VersionIdMarker", default)]
    pub version_id_marker: String,
    /// Whether more entries are available.
    #[serde(rename = "IsTruncated", default)]
    pub is_truncated: bool,
    /// Listed versions, key order then version order.
    #[serde(rename = "Entries", default)]
    pub entries: Vec<BucketListEntry>,
}
