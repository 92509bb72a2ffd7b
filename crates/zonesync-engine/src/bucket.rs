//! Bucket-shard replication worker.
//!
//! Drives one bucket shard through its three-phase machine: `Init`
//! captures the remote bucket-index position and seeds the status bundle,
//! `FullSync` mirrors a versioned listing of the shard, `IncrementalSync`
//! follows the bucket-index log. Per-object work fans out through a
//! bounded spawn window; resume cursors advance through the marker
//! tracker only.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::{debug, info, warn};
use zonesync_core::{
    BucketShard, BucketShardState, BucketShardSyncInfo, FullSyncMarker, IncSyncMarker, ObjectKey,
};
use zonesync_remote::types::BiLogOp;

use crate::error::{Result, SyncError};
use crate::marker::MarkerStore;
use crate::runtime::TaskSet;
use crate::tracker::{MarkerUpdate, StoreMarker, TrackedMarkers};
use crate::SyncContext;

struct FullMarkerSink {
    ctx: Arc<SyncContext>,
    shard: BucketShard,
}

#[async_trait]
impl StoreMarker<ObjectKey> for FullMarkerSink {
    async fn store_marker(&self, update: &MarkerUpdate<ObjectKey>) -> Result<()> {
        let marker = FullSyncMarker {
            position: update.position.clone(),
            count: update.index_pos,
            timestamp: update.timestamp,
        };
        self.ctx.markers.write_bucket_full_marker(&self.shard, &marker).await
    }
}

struct IncMarkerSink {
    ctx: Arc<SyncContext>,
    shard: BucketShard,
}

#[async_trait]
impl StoreMarker<String> for IncMarkerSink {
    async fn store_marker(&self, update: &MarkerUpdate<String>) -> Result<()> {
        let marker = IncSyncMarker { position: update.position.clone() };
        self.ctx.markers.write_bucket_inc_marker(&self.shard, &marker).await
    }
}

/// Replicates one bucket shard, resuming from its persisted status.
///
/// Returns when the shard is caught up with the remote bucket-index log;
/// the data-log worker's polling rhythm re-invokes it when new changes
/// appear.
pub async fn sync_bucket_shard(ctx: &Arc<SyncContext>, shard: &BucketShard) -> Result<()> {
    let mut status = ctx.markers.read_bucket_status(shard).await?;
    debug!(bucket_shard = %shard, state = ?status.state, "bucket shard sync");

    if status.state == BucketShardState::Init {
        init_status(ctx, shard, &mut status).await?;
    }
    if status.state == BucketShardState::FullSync {
        full_sync(ctx, shard, &mut status).await?;
    }
    if status.state == BucketShardState::IncrementalSync {
        incremental_sync(ctx, shard, &mut status).await?;
    }
    Ok(())
}

/// Seeds the status bundle under a lease.
///
/// The remote bucket-index position is captured *before* the full listing
/// starts, so the incremental phase observes every mutation made after the
/// snapshot point.
async fn init_status(
    ctx: &Arc<SyncContext>,
    shard: &BucketShard,
    status: &mut BucketShardSyncInfo,
) -> Result<()> {
    let oid = ctx.markers.bucket_status_oid(shard);
    let cookie = MarkerStore::lease_cookie();

    ctx.markers.acquire_lease(&oid, &cookie).await?;
    ctx.markers.write_bucket_status(shard, &BucketShardSyncInfo::default()).await?;
    // The write recreated the object; the store may have dropped the lease.
    ctx.markers.acquire_lease(&oid, &cookie).await?;

    let index_info = match ctx.remote.bucket_index_info(&shard.instance_key()).await {
        Ok(info) => info,
        Err(e) if e.is_not_found() => Default::default(),
        Err(e) => return Err(e.into()),
    };

    status.state = BucketShardState::FullSync;
    status.inc_marker.position = index_info.max_marker;
    ctx.markers.write_bucket_status(shard, status).await?;
    ctx.markers.release_lease(&oid, &cookie).await?;
    info!(bucket_shard = %shard, inc_position = %status.inc_marker.position, "bucket shard sync initialized");
    Ok(())
}

async fn full_sync(
    ctx: &Arc<SyncContext>,
    shard: &BucketShard,
    status: &mut BucketShardSyncInfo,
) -> Result<()> {
    info!(bucket_shard = %shard, "bucket shard full sync");
    let markers = Arc::new(TrackedMarkers::new(
        ctx.tuning.bucket_marker_window,
        FullMarkerSink { ctx: ctx.clone(), shard: shard.clone() },
    ));
    let mut position = status.full_marker.position.clone();
    let mut total = status.full_marker.count;
    let mut tasks: TaskSet<Result<()>> = TaskSet::new();

    loop {
        let listing = match ctx
            .remote
            .list_bucket_shard(&shard.bucket, &shard.instance_key(), &position.name, &position.instance)
            .await
        {
            Ok(listing) => listing,
            Err(e) if e.is_not_found() => break,
            Err(e) => {
                tasks.drain().await;
                return Err(e.into());
            }
        };
        let truncated = listing.is_truncated;

        for entry in listing.entries {
            let key = ObjectKey::versioned(entry.key, entry.version_id);
            total += 1;
            markers.start(key.clone(), total, entry.last_modified);
            position = key.clone();
            // Listings carry no op; versioned entries are mirrored the way
            // their link_olh bilog entry would be.
            let op = if key.has_instance() { BiLogOp::LinkOlh } else { BiLogOp::Add };
            debug!(bucket_shard = %shard, object = %key, "full sync object");
            tasks.spawn(sync_object(
                ctx.clone(),
                shard.clone(),
                key.clone(),
                entry.versioned_epoch,
                entry.last_modified,
                op,
                key,
                markers.clone(),
            ));
            for res in tasks.throttle(ctx.tuning.spawn_window).await {
                note_object_result(res);
            }
        }
        if !truncated {
            break;
        }
    }

    // Every spawned task must land before the state transition, so the
    // incremental phase never observes a half-applied listing.
    for res in tasks.drain().await {
        note_object_result(res);
    }

    ctx.markers.write_bucket_state(shard, BucketShardState::IncrementalSync).await?;
    status.state = BucketShardState::IncrementalSync;
    info!(bucket_shard = %shard, objects = total, "bucket shard full sync complete");
    Ok(())
}

async fn incremental_sync(
    ctx: &Arc<SyncContext>,
    shard: &BucketShard,
    status: &mut BucketShardSyncInfo,
) -> Result<()> {
    let markers = Arc::new(TrackedMarkers::new(
        ctx.tuning.bucket_marker_window,
        IncMarkerSink { ctx: ctx.clone(), shard: shard.clone() },
    ));
    let mut position = status.inc_marker.position.clone();
    let mut tasks: TaskSet<Result<()>> = TaskSet::new();

    loop {
        let entries = match ctx.remote.bucket_index_log(&shard.instance_key(), &position).await {
            Ok(entries) => entries,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => {
                tasks.drain().await;
                return Err(e.into());
            }
        };
        if entries.is_empty() {
            break;
        }

        for entry in entries {
            let key = ObjectKey::versioned(entry.object.clone(), entry.instance.clone());
            debug!(bucket_shard = %shard, object = %key, op = ?entry.op, "incremental sync object");
            markers.start(entry.id.clone(), 0, entry.timestamp);
            position = entry.id.clone();
            tasks.spawn(sync_object(
                ctx.clone(),
                shard.clone(),
                key,
                entry.ver.versioned_epoch(),
                entry.timestamp,
                entry.op,
                entry.id,
                markers.clone(),
            ));
            for res in tasks.throttle(ctx.tuning.spawn_window).await {
                note_object_result(res);
            }
        }
    }

    for res in tasks.drain().await {
        note_object_result(res);
    }
    status.inc_marker.position = position;
    Ok(())
}

/// Applies one object mutation and reports back to the tracker.
///
/// The entry marker advances even when the object fails permanently, so a
/// single bad object cannot block the shard; the failure stays visible
/// through the error counter and the returned status.
#[allow(clippy::too_many_arguments)]
async fn sync_object<K, S>(
    ctx: Arc<SyncContext>,
    shard: BucketShard,
    key: ObjectKey,
    versioned_epoch: u64,
    timestamp: Option<DateTime<Utc>>,
    op: BiLogOp,
    entry_marker: K,
    markers: Arc<TrackedMarkers<K, S>>,
) -> Result<()>
where
    K: Ord + Clone + Send + Sync + 'static,
    S: StoreMarker<K> + Send + Sync + 'static,
{
    let status = match apply_object(&ctx, &shard, &key, versioned_epoch, timestamp, op).await {
        Ok(()) => Ok(()),
        Err(SyncError::Transfer(e)) if e.is_not_found() => {
            // The object vanished at the source between listing and fetch.
            debug!(bucket_shard = %shard, object = %key, "object gone at source");
            Ok(())
        }
        Err(err) => {
            warn!(bucket_shard = %shard, object = %key, error = %err, "object sync failed");
            counter!("zonesync_object_sync_errors_total", "bucket_shard" => shard.instance_key())
                .increment(1);
            Err(err)
        }
    };
    markers.finish(&entry_marker).await?;
    status
}

async fn apply_object(
    ctx: &SyncContext,
    shard: &BucketShard,
    key: &ObjectKey,
    versioned_epoch: u64,
    timestamp: Option<DateTime<Utc>>,
    op: BiLogOp,
) -> Result<()> {
    match op {
        BiLogOp::Add | BiLogOp::LinkOlh => {
            if op == BiLogOp::Add && key.has_instance() {
                // The matching link_olh entry mirrors this version.
                debug!(object = %key, "skipping versioned object add");
                return Ok(());
            }
            ctx.transfer
                .fetch_object(ctx.source_zone(), shard, key, versioned_epoch)
                .await?;
        }
        BiLogOp::Del => {
            ctx.transfer
                .remove_object(ctx.source_zone(), shard, key, versioned_epoch, timestamp)
                .await?;
        }
        BiLogOp::Unknown => {
            debug!(object = %key, "ignoring unhandled bilog op");
        }
    }
    Ok(())
}

fn note_object_result(result: Result<()>) {
    // Failures were already logged and counted by the object task itself;
    // a single failed object does not kill its siblings.
    if let Err(err) = result {
        debug!(error = %err, "collected failed object sync");
    }
}
