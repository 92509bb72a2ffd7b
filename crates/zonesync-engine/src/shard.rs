//! Data-log shard replication worker.
//!
//! One worker owns one partition of the remote data log. `FullSync`
//! replays the shard's slice of the full-sync index; `IncrementalSync`
//! polls the remote log and fans each entry out to a bucket-shard sync,
//! deduplicating concurrent work per bucket shard through the marker
//! tracker. Admin wake-ups enter through [`ShardSignal`] and trigger
//! side runs that never advance the persisted cursor.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use metrics::gauge;
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};
use zonesync_core::{BucketShard, DataShardMarker, ShardSyncState};

use crate::bucket::sync_bucket_shard;
use crate::error::{Result, SyncError};
use crate::runtime::{TaskSet, Wakeup};
use crate::tracker::{MarkerUpdate, StoreMarker, TrackedMarkers};
use crate::SyncContext;

/// Out-of-band notification channel into one data-log shard worker.
#[derive(Default)]
pub(crate) struct ShardSignal {
    modified: Mutex<HashSet<String>>,
    wakeup: Wakeup,
}

impl ShardSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queues bucket shard keys for a side run and wakes the worker.
    pub(crate) fn notify(&self, keys: impl IntoIterator<Item = String>) {
        self.modified.lock().extend(keys);
        self.wakeup.wake();
    }

    fn drain(&self) -> Vec<String> {
        self.modified.lock().drain().collect()
    }
}

/// Persists the shard cursor, carrying the rest of the marker struct along.
struct DataMarkerSink {
    ctx: Arc<SyncContext>,
    shard_id: u32,
    state: Mutex<DataShardMarker>,
}

impl DataMarkerSink {
    fn snapshot(&self) -> DataShardMarker {
        self.state.lock().clone()
    }
}

#[async_trait]
impl StoreMarker<String> for DataMarkerSink {
    async fn store_marker(&self, update: &MarkerUpdate<String>) -> Result<()> {
        let snapshot = {
            let mut state = self.state.lock();
            state.marker = update.position.clone();
            state.pos = update.index_pos;
            state.timestamp = update.timestamp;
            state.clone()
        };
        trace!(shard = self.shard_id, marker = %snapshot.marker, "persisting data shard marker");
        gauge!("zonesync_data_shard_pos", "shard" => self.shard_id.to_string())
            .set(snapshot.pos as f64);
        self.ctx.markers.write_shard_marker(self.shard_id, &snapshot).await
    }
}

/// Replication worker for one data-log shard.
pub(crate) struct DataLogShardSync {
    ctx: Arc<SyncContext>,
    shard_id: u32,
    signal: Arc<ShardSignal>,
}

impl DataLogShardSync {
    pub(crate) fn new(ctx: Arc<SyncContext>, shard_id: u32, signal: Arc<ShardSignal>) -> Self {
        Self { ctx, shard_id, signal }
    }

    /// Runs the shard to completion: full sync once, then the incremental
    /// loop until a fatal error or cancellation.
    pub(crate) async fn run(&self, mut marker: DataShardMarker) -> Result<()> {
        if marker.state == ShardSyncState::FullSync {
            marker = self.full_sync(marker).await?;
        }
        self.incremental_sync(marker).await
    }

    fn tracked_markers(&self, marker: &DataShardMarker) -> Arc<TrackedMarkers<String, DataMarkerSink>> {
        Arc::new(TrackedMarkers::new(
            self.ctx.tuning.data_marker_window,
            DataMarkerSink {
                ctx: self.ctx.clone(),
                shard_id: self.shard_id,
                state: Mutex::new(marker.clone()),
            },
        ))
    }

    async fn full_sync(&self, marker: DataShardMarker) -> Result<DataShardMarker> {
        let ctx = &self.ctx;
        info!(shard = self.shard_id, total = marker.total_entries, "data-log shard full sync");
        let markers = self.tracked_markers(&marker);
        let index_oid = ctx.markers.full_sync_index_oid(self.shard_id);
        let mut from = marker.marker.clone();
        let mut total = marker.pos;
        let mut tasks: TaskSet<Result<()>> = TaskSet::new();

        loop {
            let entries =
                ctx.markers.store().omap_get(&index_oid, &from, ctx.tuning.batch_size).await?;
            if entries.is_empty() {
                break;
            }
            let fetched = entries.len();
            for (key, _) in entries {
                total += 1;
                trace!(shard = self.shard_id, %key, "full sync entry");
                markers.start(key.clone(), total, None);
                tasks.spawn(sync_data_entry(
                    ctx.clone(),
                    key.clone(),
                    Some(key.clone()),
                    markers.clone(),
                ));
                from = key;
            }
            if fetched < ctx.tuning.batch_size {
                break;
            }
        }

        for res in tasks.drain().await {
            self.note_entry_result(res)?;
        }

        // Adopt the data-log position captured at init and go incremental.
        let mut next = markers.sink().snapshot();
        next.state = ShardSyncState::IncrementalSync;
        next.marker = std::mem::take(&mut next.next_step_marker);
        ctx.markers.write_shard_marker(self.shard_id, &next).await?;
        info!(shard = self.shard_id, marker = %next.marker, "data-log shard entering incremental sync");
        Ok(next)
    }

    async fn incremental_sync(&self, marker: DataShardMarker) -> Result<()> {
        let ctx = &self.ctx;
        let markers = self.tracked_markers(&marker);
        let mut cursor = marker.marker.clone();
        let mut tasks: TaskSet<Result<()>> = TaskSet::new();
        let poll_interval = ctx.tuning.poll_interval_duration();
        info!(shard = self.shard_id, marker = %cursor, "data-log shard incremental sync");

        loop {
            for res in tasks.reap() {
                self.note_entry_result(res)?;
            }

            // Out-of-band wake-ups: side triggers with no entry marker, so
            // the persisted cursor is untouched.
            for key in self.signal.drain() {
                debug!(shard = self.shard_id, %key, "processing wakeup notification");
                tasks.spawn(sync_data_entry(ctx.clone(), key, None, markers.clone()));
            }

            let shard_info = match ctx.remote.datalog_shard_info(self.shard_id).await {
                Ok(info) => info,
                Err(e) if e.is_transient() => {
                    warn!(shard = self.shard_id, error = %e, "failed to poll remote shard info");
                    self.signal.wakeup.sleep(poll_interval).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            trace!(
                shard = self.shard_id,
                datalog_marker = %shard_info.marker,
                %cursor,
                "polled remote data log"
            );

            let mut progressed = false;
            if shard_info.marker > cursor {
                let page = match ctx.remote.datalog_shard_entries(self.shard_id, &cursor).await {
                    Ok(page) => page,
                    Err(e) if e.is_transient() => {
                        warn!(shard = self.shard_id, error = %e, "failed to fetch data log entries");
                        self.signal.wakeup.sleep(poll_interval).await;
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };
                for entry in page.entries {
                    if !markers.index_key_to_marker(&entry.entry.key, &entry.log_id) {
                        // Another entry is replicating this bucket shard;
                        // its retry pass covers this mutation, so the
                        // cursor may treat the entry as done.
                        debug!(
                            shard = self.shard_id,
                            log_id = %entry.log_id,
                            key = %entry.entry.key,
                            "sync already in progress for bucket shard, skipping"
                        );
                        markers.start(entry.log_id.clone(), 0, entry.log_timestamp);
                        markers.finish(&entry.log_id).await?;
                        continue;
                    }
                    debug!(shard = self.shard_id, log_id = %entry.log_id, key = %entry.entry.key, "data log entry");
                    markers.start(entry.log_id.clone(), 0, entry.log_timestamp);
                    tasks.spawn(sync_data_entry(
                        ctx.clone(),
                        entry.entry.key,
                        Some(entry.log_id),
                        markers.clone(),
                    ));
                }
                if !page.marker.is_empty() && page.marker != cursor {
                    cursor = page.marker;
                    progressed = true;
                }
            }

            if !progressed {
                self.signal.wakeup.sleep(poll_interval).await;
            }
        }
    }

    fn note_entry_result(&self, result: Result<()>) -> Result<()> {
        if let Err(err) = result {
            if err.is_fatal() {
                error!(shard = self.shard_id, error = %err, "data entry sync failed fatally");
                return Err(err);
            }
            warn!(shard = self.shard_id, error = %err, "data entry sync failed");
        }
        Ok(())
    }
}

/// Replicates the bucket shard behind one data-log entry.
///
/// Re-runs the bucket shard while its needs-retry flag is set, so
/// mutations that raced with an in-flight run are picked up before the
/// entry marker advances.
async fn sync_data_entry(
    ctx: Arc<SyncContext>,
    raw_key: String,
    entry_marker: Option<String>,
    markers: Arc<TrackedMarkers<String, DataMarkerSink>>,
) -> Result<()> {
    let shard = BucketShard::parse(&raw_key).map_err(SyncError::from)?;
    loop {
        if let Err(err) = sync_bucket_shard(&ctx, &shard).await {
            warn!(bucket_shard = %raw_key, error = %err, "bucket shard sync failed");
            // The entry marker is left outstanding: the cursor stalls at
            // this entry and the shard is re-synced from it after restart.
            return Err(err);
        }
        if markers.release_key(&raw_key, entry_marker.as_ref()) {
            break;
        }
        debug!(bucket_shard = %raw_key, "re-polling bucket shard after concurrent update");
    }
    if let Some(entry_marker) = entry_marker {
        markers.finish(&entry_marker).await?;
    }
    Ok(())
}
