//! Core types and utilities for ZoneSync.
//!
//! This crate provides the fundamental building blocks used across all
//! ZoneSync components:
//! - Sync-state data model (data-log shards, bucket shards, markers)
//! - Configuration management
//! - Shared error types

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    Config, LogFormat, LoggingConfig, SourceConfig, StoreBackend, StoreConfig, SyncTuning,
};
pub use error::{Error, Result};
pub use types::{
    log_shard_id, BucketShard, BucketShardState, BucketShardSyncInfo, DataShardMarker,
    FullSyncMarker, IncSyncMarker, ObjectKey, ShardSyncState, SyncInfo, SyncState,
};
