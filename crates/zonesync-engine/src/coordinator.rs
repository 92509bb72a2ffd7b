//! Top-level data-sync coordinator.
//!
//! Owns the source zone's sync lifecycle: lazy status initialization under
//! a lease, the one-time full-sync index build, and the steady-state fleet
//! of per-shard workers. External admin events reach the workers through
//! [`DataSync::wakeup`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, info};
use zonesync_core::{DataShardMarker, ShardSyncState, SyncInfo, SyncState};
use zonesync_remote::types::DataLogShardInfo;

use crate::error::{Result, SyncError};
use crate::index::FullSyncIndexBuilder;
use crate::marker::MarkerStore;
use crate::runtime::TaskSet;
use crate::shard::{DataLogShardSync, ShardSignal};
use crate::SyncContext;

/// Coordinator for replicating one source zone.
pub struct DataSync {
    ctx: Arc<SyncContext>,
    signals: RwLock<HashMap<u32, Arc<ShardSignal>>>,
}

impl DataSync {
    /// Creates a coordinator over the given context.
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self { ctx, signals: RwLock::new(HashMap::new()) }
    }

    /// The sync context this coordinator drives.
    pub fn context(&self) -> &Arc<SyncContext> {
        &self.ctx
    }

    /// Reads the persisted top-level status and every per-shard marker.
    /// Returns `None` when sync was never initialized.
    pub async fn read_sync_status(
        &self,
    ) -> Result<Option<(SyncInfo, BTreeMap<u32, DataShardMarker>)>> {
        let Some(info) = self.ctx.markers.read_sync_info().await? else {
            return Ok(None);
        };
        let mut markers = BTreeMap::new();
        for shard_id in 0..info.num_shards {
            let marker =
                self.ctx.markers.read_shard_marker(shard_id).await?.unwrap_or_default();
            markers.insert(shard_id, marker);
        }
        Ok(Some((info, markers)))
    }

    /// Initializes sync status for the source zone.
    ///
    /// Under the status lease: writes the `Init` status, re-acquires the
    /// lease (the write recreated the object), captures every remote
    /// shard's current log position into an initial marker, and advances
    /// to `BuildingFullSyncMaps`. Safe to re-run after a crash at any
    /// point.
    pub async fn init_sync_status(&self) -> Result<SyncInfo> {
        let ctx = &self.ctx;
        let log_info = ctx.remote.datalog_info().await?;
        if log_info.num_objects == 0 {
            // The shard count feeds the index hash; persisting a zero here
            // would take the whole daemon down later.
            return Err(SyncError::InvalidSource(
                "source zone reports zero data-log shards".to_string(),
            ));
        }
        let mut info = SyncInfo { state: SyncState::Init, num_shards: log_info.num_objects };
        info!(num_shards = info.num_shards, "initializing data sync status");

        let oid = ctx.markers.sync_status_oid();
        let cookie = MarkerStore::lease_cookie();
        ctx.markers.acquire_lease(&oid, &cookie).await?;
        ctx.markers.write_sync_info(&info).await?;
        ctx.markers.acquire_lease(&oid, &cookie).await?;

        // Capture current remote positions concurrently; they become each
        // shard's next_step_marker for the full -> incremental hand-off.
        let mut fetches: TaskSet<(u32, std::result::Result<DataLogShardInfo, zonesync_remote::RemoteError>)> =
            TaskSet::new();
        for shard_id in 0..info.num_shards {
            let ctx = self.ctx.clone();
            fetches.spawn(async move { (shard_id, ctx.remote.datalog_shard_info(shard_id).await) });
        }
        let mut shard_infos = Vec::with_capacity(info.num_shards as usize);
        for (shard_id, res) in fetches.drain().await {
            shard_infos.push((shard_id, res?));
        }

        let mut writes: TaskSet<Result<()>> = TaskSet::new();
        for (shard_id, shard_info) in shard_infos {
            let ctx = self.ctx.clone();
            writes.spawn(async move {
                let marker = DataShardMarker {
                    state: ShardSyncState::FullSync,
                    next_step_marker: shard_info.marker,
                    timestamp: shard_info.last_update,
                    ..Default::default()
                };
                ctx.markers.write_shard_marker(shard_id, &marker).await
            });
        }
        for res in writes.drain().await {
            res?;
        }

        info.state = SyncState::BuildingFullSyncMaps;
        ctx.markers.write_sync_info(&info).await?;
        ctx.markers.release_lease(&oid, &cookie).await?;
        Ok(info)
    }

    /// Routes an admin notification to the worker owning `shard_id`.
    ///
    /// The keys are queued for a side-triggered bucket sync and the
    /// worker's poll sleep is cancelled, decoupling replication latency
    /// from the poll interval.
    pub fn wakeup(&self, shard_id: u32, keys: impl IntoIterator<Item = String>) {
        if let Some(signal) = self.signals.read().get(&shard_id) {
            signal.notify(keys);
        }
    }

    /// Runs replication for the source zone.
    ///
    /// Brings the persisted state machine forward (`Init` →
    /// `BuildingFullSyncMaps` → `Sync`), then spawns one worker per
    /// data-log shard and supervises them. Returns the first fatal worker
    /// error; the remaining workers are cancelled so the caller can rerun
    /// from persisted state.
    pub async fn run(&self) -> Result<()> {
        let mut info = match self.ctx.markers.read_sync_info().await? {
            Some(info) => info,
            None => self.init_sync_status().await?,
        };
        if info.state == SyncState::Init {
            // Crashed between status creation and shard seeding.
            info = self.init_sync_status().await?;
        }

        if info.state == SyncState::BuildingFullSyncMaps {
            FullSyncIndexBuilder::new(self.ctx.clone()).build(info.num_shards).await?;
            info.state = SyncState::Sync;
            self.ctx.markers.write_sync_info(&info).await?;
        }

        info!(num_shards = info.num_shards, "data sync running");
        let mut workers: TaskSet<(u32, Result<()>)> = TaskSet::new();
        for shard_id in 0..info.num_shards {
            let marker =
                self.ctx.markers.read_shard_marker(shard_id).await?.unwrap_or_default();
            let signal = Arc::new(ShardSignal::new());
            self.signals.write().insert(shard_id, signal.clone());
            let ctx = self.ctx.clone();
            workers.spawn(async move {
                let worker = DataLogShardSync::new(ctx, shard_id, signal);
                (shard_id, worker.run(marker).await)
            });
        }

        // Workers only return on error; surface the first one and tear the
        // rest down so the caller's run cycle restarts them.
        let result = match workers.wait_any().await {
            Some((shard_id, Err(err))) => {
                error!(shard = shard_id, error = %err, "data-log shard worker terminated");
                Err(err)
            }
            _ => Ok(()),
        };
        self.signals.write().clear();
        result
    }
}
