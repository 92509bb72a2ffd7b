//! End-to-end engine scenarios against scripted source-zone mocks.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use zonesync_core::{
    log_shard_id, BucketShard, BucketShardState, DataShardMarker, ObjectKey, ShardSyncState,
    SyncInfo, SyncState, SyncTuning,
};
use zonesync_engine::{sync_bucket_shard, DataSync, FullSyncIndexBuilder, SyncContext, SyncError};
use zonesync_remote::types::{
    BiLogEntry, BucketIndexInfo, BucketInstanceMeta, BucketListEntry, BucketListResult,
    DataChangeEntry, DataLogEntryBody, DataLogInfo, DataLogPage, DataLogShardInfo,
};
use zonesync_remote::{ObjectTransfer, RemoteError, SourceZoneClient, TransferError};
use zonesync_store::{LogStore, MemoryLogStore};

/// Scripted stand-in for the source zone gateway.
#[derive(Default)]
struct MockSource {
    num_shards: u32,
    /// Current data-log position per shard.
    shard_markers: Mutex<HashMap<u32, String>>,
    /// All data-log entries per shard, in log order.
    shard_entries: Mutex<HashMap<u32, Vec<DataChangeEntry>>>,
    /// Bucket-index info per instance key.
    index_info: Mutex<HashMap<String, BucketIndexInfo>>,
    /// Bucket-index log per instance key, in log order.
    bilog: Mutex<HashMap<String, Vec<BiLogEntry>>>,
    /// Versioned listing entries per instance key, in listing order.
    listings: Mutex<HashMap<String, Vec<BucketListEntry>>>,
    /// Bucket-instance metadata.
    instance_keys: Vec<String>,
    metas: HashMap<String, BucketInstanceMeta>,
    /// Observability: bilog polls per instance key.
    bilog_polls: Mutex<HashMap<String, usize>>,
}

impl MockSource {
    fn bilog_poll_count(&self, instance_key: &str) -> usize {
        self.bilog_polls.lock().get(instance_key).copied().unwrap_or(0)
    }
}

#[async_trait]
impl SourceZoneClient for MockSource {
    async fn datalog_info(&self) -> Result<DataLogInfo, RemoteError> {
        Ok(DataLogInfo { num_objects: self.num_shards })
    }

    async fn datalog_shard_info(&self, shard_id: u32) -> Result<DataLogShardInfo, RemoteError> {
        let marker = self.shard_markers.lock().get(&shard_id).cloned().unwrap_or_default();
        Ok(DataLogShardInfo { marker, last_update: None })
    }

    async fn datalog_shard_entries(
        &self,
        shard_id: u32,
        marker: &str,
    ) -> Result<DataLogPage, RemoteError> {
        let entries: Vec<DataChangeEntry> = self
            .shard_entries
            .lock()
            .get(&shard_id)
            .map(|all| all.iter().filter(|e| e.log_id.as_str() > marker).cloned().collect())
            .unwrap_or_default();
        let next = entries.last().map(|e| e.log_id.clone()).unwrap_or_else(|| marker.to_string());
        Ok(DataLogPage { marker: next, truncated: false, entries })
    }

    async fn bucket_index_info(&self, instance_key: &str) -> Result<BucketIndexInfo, RemoteError> {
        Ok(self.index_info.lock().get(instance_key).cloned().unwrap_or_default())
    }

    async fn bucket_index_log(
        &self,
        instance_key: &str,
        marker: &str,
    ) -> Result<Vec<BiLogEntry>, RemoteError> {
        *self.bilog_polls.lock().entry(instance_key.to_string()).or_default() += 1;
        Ok(self
            .bilog
            .lock()
            .get(instance_key)
            .map(|all| all.iter().filter(|e| e.id.as_str() > marker).cloned().collect())
            .unwrap_or_default())
    }

    async fn bucket_instance_keys(&self) -> Result<Vec<String>, RemoteError> {
        Ok(self.instance_keys.clone())
    }

    async fn bucket_instance_meta(&self, key: &str) -> Result<BucketInstanceMeta, RemoteError> {
        self.metas.get(key).cloned().ok_or(RemoteError::NotFound)
    }

    async fn list_bucket_shard(
        &self,
        _bucket: &str,
        instance_key: &str,
        key_marker: &str,
        version_id_marker: &str,
    ) -> Result<BucketListResult, RemoteError> {
        let after = (key_marker.to_string(), version_id_marker.to_string());
        let entries: Vec<BucketListEntry> = self
            .listings
            .lock()
            .get(instance_key)
            .map(|all| {
                all.iter()
                    .filter(|e| (e.key.clone(), e.version_id.clone()) > after)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(BucketListResult { is_truncated: false, entries, ..Default::default() })
    }
}

/// Transfer primitive that records every applied operation.
#[derive(Default)]
struct RecordingTransfer {
    applied: Mutex<Vec<(String, String, String, u64)>>,
    missing_at_source: Mutex<HashSet<String>>,
}

impl RecordingTransfer {
    fn applied(&self) -> Vec<(String, String, String, u64)> {
        self.applied.lock().clone()
    }
}

#[async_trait]
impl ObjectTransfer for RecordingTransfer {
    async fn fetch_object(
        &self,
        _source_zone: &str,
        bucket: &BucketShard,
        key: &ObjectKey,
        versioned_epoch: u64,
    ) -> Result<(), TransferError> {
        if self.missing_at_source.lock().contains(&key.name) {
            return Err(TransferError::NotFound);
        }
        self.applied.lock().push((
            "fetch".to_string(),
            bucket.instance_key(),
            key.to_string(),
            versioned_epoch,
        ));
        Ok(())
    }

    async fn remove_object(
        &self,
        _source_zone: &str,
        bucket: &BucketShard,
        key: &ObjectKey,
        versioned_epoch: u64,
        _timestamp: Option<DateTime<Utc>>,
    ) -> Result<(), TransferError> {
        self.applied.lock().push((
            "remove".to_string(),
            bucket.instance_key(),
            key.to_string(),
            versioned_epoch,
        ));
        Ok(())
    }
}

const ZONE: &str = "src-zone";

fn test_ctx(
    source: Arc<MockSource>,
    transfer: Arc<RecordingTransfer>,
    store: Arc<MemoryLogStore>,
) -> Arc<SyncContext> {
    let tuning = SyncTuning::new().spawn_window(4).batch_size(25);
    Arc::new(SyncContext::new(ZONE, store, source, transfer, tuning))
}

fn list_entry(key: &str, version: &str, epoch: u64) -> BucketListEntry {
    BucketListEntry {
        key: key.to_string(),
        version_id: version.to_string(),
        versioned_epoch: epoch,
        ..Default::default()
    }
}

fn datalog_entry(log_id: &str, key: &str) -> DataChangeEntry {
    DataChangeEntry {
        log_id: log_id.to_string(),
        entry: DataLogEntryBody { key: key.to_string(), timestamp: None },
        ..Default::default()
    }
}

async fn wait_until<F, Fut>(mut cond: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..2000 {
        if cond().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("condition not reached in time");
}

/// Cold start: status initialization seeds per-shard markers with the
/// remote positions, and the index builder shards the bucket catalog.
#[tokio::test]
async fn test_cold_start_initialization() {
    let source = Arc::new(MockSource {
        num_shards: 2,
        shard_markers: Mutex::new(HashMap::from([
            (0, "0000".to_string()),
            (1, "0000".to_string()),
        ])),
        instance_keys: vec!["b:abc".to_string()],
        metas: HashMap::from([("b:abc".to_string(), {
            let mut meta = BucketInstanceMeta { key: "b:abc".to_string(), ..Default::default() };
            meta.data.bucket_info.bucket.name = "b".to_string();
            meta.data.bucket_info.bucket.bucket_id = "abc".to_string();
            meta.data.bucket_info.num_shards = 0;
            meta
        })]),
        ..Default::default()
    });
    let store = Arc::new(MemoryLogStore::new());
    let ctx = test_ctx(source, Arc::new(RecordingTransfer::default()), store.clone());
    let sync = DataSync::new(ctx.clone());

    assert!(sync.read_sync_status().await.unwrap().is_none());

    let info = sync.init_sync_status().await.unwrap();
    assert_eq!(info, SyncInfo { state: SyncState::BuildingFullSyncMaps, num_shards: 2 });

    let (stored, markers) = sync.read_sync_status().await.unwrap().unwrap();
    assert_eq!(stored.state, SyncState::BuildingFullSyncMaps);
    for shard_id in 0..2 {
        let marker = &markers[&shard_id];
        assert_eq!(marker.state, ShardSyncState::FullSync);
        assert_eq!(marker.next_step_marker, "0000");
        assert!(marker.marker.is_empty());
    }

    FullSyncIndexBuilder::new(ctx.clone()).build(2).await.unwrap();

    let home = log_shard_id("b", None, 2);
    let other = 1 - home;
    let index = store
        .omap_get(&ctx.markers.full_sync_index_oid(home), "", 10)
        .await
        .unwrap();
    assert_eq!(index.len(), 1);
    assert_eq!(index[0].0, "b:abc");
    assert!(store
        .omap_get(&ctx.markers.full_sync_index_oid(other), "", 10)
        .await
        .unwrap()
        .is_empty());

    let (_, markers) = sync.read_sync_status().await.unwrap().unwrap();
    assert_eq!(markers[&home].total_entries, 1);
    assert_eq!(markers[&other].total_entries, 0);
}

/// A source zone reporting zero data-log shards is rejected before
/// anything is persisted, instead of panicking later in the index hash.
#[tokio::test]
async fn test_zero_shard_source_rejected() {
    let source = Arc::new(MockSource {
        num_shards: 0,
        instance_keys: vec!["b:abc".to_string()],
        metas: HashMap::from([("b:abc".to_string(), {
            let mut meta = BucketInstanceMeta { key: "b:abc".to_string(), ..Default::default() };
            meta.data.bucket_info.bucket.name = "b".to_string();
            meta.data.bucket_info.bucket.bucket_id = "abc".to_string();
            meta
        })]),
        ..Default::default()
    });
    let ctx = test_ctx(source, Arc::new(RecordingTransfer::default()), Arc::new(MemoryLogStore::new()));
    let sync = DataSync::new(ctx.clone());

    let err = sync.init_sync_status().await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidSource(_)));
    assert!(err.is_fatal());
    // The bad shard count was never persisted.
    assert!(sync.read_sync_status().await.unwrap().is_none());

    // A direct build against zero shards fails the same way rather than
    // reaching the shard hash.
    let err = FullSyncIndexBuilder::new(ctx).build(0).await.unwrap_err();
    assert!(matches!(err, SyncError::IndexBuild(_)));
}

/// Full bucket-shard sync of three objects, two of them versions of the
/// same key: all three land, the count reaches 3, and the shard moves to
/// incremental sync resuming at the snapshot position.
#[tokio::test]
async fn test_bucket_shard_full_sync() {
    let shard = BucketShard::parse("b:abc").unwrap();
    let source = Arc::new(MockSource {
        index_info: Mutex::new(HashMap::from([(
            "b:abc".to_string(),
            BucketIndexInfo { max_marker: "00010".to_string(), ..Default::default() },
        )])),
        listings: Mutex::new(HashMap::from([(
            "b:abc".to_string(),
            vec![
                list_entry("k1", "", 0),
                list_entry("k2", "v1", 1),
                list_entry("k2", "v2", 2),
            ],
        )])),
        ..Default::default()
    });
    let transfer = Arc::new(RecordingTransfer::default());
    let store = Arc::new(MemoryLogStore::new());
    let ctx = test_ctx(source, transfer.clone(), store);

    sync_bucket_shard(&ctx, &shard).await.unwrap();

    let mut applied = transfer.applied();
    applied.sort();
    assert_eq!(
        applied,
        vec![
            ("fetch".to_string(), "b:abc".to_string(), "k1".to_string(), 0),
            ("fetch".to_string(), "b:abc".to_string(), "k2[v1]".to_string(), 1),
            ("fetch".to_string(), "b:abc".to_string(), "k2[v2]".to_string(), 2),
        ]
    );

    let status = ctx.markers.read_bucket_status(&shard).await.unwrap();
    assert_eq!(status.state, BucketShardState::IncrementalSync);
    assert_eq!(status.full_marker.count, 3);
    assert_eq!(status.full_marker.position, ObjectKey::versioned("k2", "v2"));
    assert_eq!(status.inc_marker.position, "00010");
}

/// Re-running an already-synced shard applies the same objects again
/// without disturbing the persisted state (at-least-once, idempotent).
#[tokio::test]
async fn test_bucket_shard_sync_idempotent() {
    let shard = BucketShard::parse("b:abc").unwrap();
    let source = Arc::new(MockSource {
        listings: Mutex::new(HashMap::from([(
            "b:abc".to_string(),
            vec![list_entry("k1", "", 0)],
        )])),
        ..Default::default()
    });
    let transfer = Arc::new(RecordingTransfer::default());
    let ctx = test_ctx(source, transfer.clone(), Arc::new(MemoryLogStore::new()));

    sync_bucket_shard(&ctx, &shard).await.unwrap();
    let first = ctx.markers.read_bucket_status(&shard).await.unwrap();
    sync_bucket_shard(&ctx, &shard).await.unwrap();
    let second = ctx.markers.read_bucket_status(&shard).await.unwrap();

    assert_eq!(first.state, BucketShardState::IncrementalSync);
    assert_eq!(first, second);
}

/// Incremental sync applies bilog mutations: deletes go through the
/// remove primitive, versioned epochs follow the pool rule.
#[tokio::test]
async fn test_bucket_shard_incremental_ops() {
    let shard = BucketShard::parse("b:abc").unwrap();
    let source = Arc::new(MockSource {
        bilog: Mutex::new(HashMap::from([(
            "b:abc".to_string(),
            vec![
                BiLogEntry {
                    id: "00001".to_string(),
                    object: "doc".to_string(),
                    instance: String::new(),
                    timestamp: None,
                    op: zonesync_remote::types::BiLogOp::Add,
                    ver: Default::default(),
                },
                BiLogEntry {
                    id: "00002".to_string(),
                    object: "doc".to_string(),
                    instance: String::new(),
                    timestamp: None,
                    op: zonesync_remote::types::BiLogOp::Del,
                    ver: Default::default(),
                },
            ],
        )])),
        ..Default::default()
    });
    let transfer = Arc::new(RecordingTransfer::default());
    let ctx = test_ctx(source, transfer.clone(), Arc::new(MemoryLogStore::new()));

    sync_bucket_shard(&ctx, &shard).await.unwrap();

    let applied = transfer.applied();
    assert!(applied.contains(&("fetch".to_string(), "b:abc".to_string(), "doc".to_string(), 0)));
    assert!(applied.contains(&("remove".to_string(), "b:abc".to_string(), "doc".to_string(), 0)));

    let status = ctx.markers.read_bucket_status(&shard).await.unwrap();
    assert_eq!(status.inc_marker.position, "00002");
}

/// Incremental dedup: two data-log entries for the same bucket shard run
/// one sync plus one redundant re-poll, and the persisted cursor reaches
/// the second entry.
#[tokio::test(start_paused = true)]
async fn test_incremental_dedup_and_retry() {
    let store = Arc::new(MemoryLogStore::new());
    let source = Arc::new(MockSource {
        num_shards: 1,
        shard_markers: Mutex::new(HashMap::from([(0, "L2".to_string())])),
        shard_entries: Mutex::new(HashMap::from([(
            0,
            vec![datalog_entry("L1", "b:abc"), datalog_entry("L2", "b:abc")],
        )])),
        ..Default::default()
    });
    let transfer = Arc::new(RecordingTransfer::default());
    let ctx = test_ctx(source.clone(), transfer, store);

    // Seed steady state: coordinator in Sync, shard already incremental.
    ctx.markers
        .write_sync_info(&SyncInfo { state: SyncState::Sync, num_shards: 1 })
        .await
        .unwrap();
    ctx.markers
        .write_shard_marker(
            0,
            &DataShardMarker { state: ShardSyncState::IncrementalSync, ..Default::default() },
        )
        .await
        .unwrap();

    let sync = Arc::new(DataSync::new(ctx.clone()));
    let runner = sync.clone();
    let run = tokio::spawn(async move { runner.run().await });

    let markers = ctx.markers.clone();
    wait_until(|| {
        let markers = markers.clone();
        async move {
            markers.read_shard_marker(0).await.unwrap().is_some_and(|m| m.marker == "L2")
        }
    })
    .await;

    // L2 was rejected while L1 was in flight; the retry flag forced at
    // least one extra bilog poll of the bucket shard.
    assert!(source.bilog_poll_count("b:abc") >= 2);

    let marker = ctx.markers.read_shard_marker(0).await.unwrap().unwrap();
    assert_eq!(marker.state, ShardSyncState::IncrementalSync);
    assert_eq!(marker.marker, "L2");

    run.abort();
}

/// Wake-up: a sleeping shard worker runs a side-triggered bucket sync
/// without advancing the persisted data-log cursor.
#[tokio::test(start_paused = true)]
async fn test_wakeup_side_trigger() {
    let store = Arc::new(MemoryLogStore::new());
    let source = Arc::new(MockSource {
        num_shards: 1,
        // Quiescent source: the worker has nothing to poll and sleeps.
        shard_markers: Mutex::new(HashMap::from([(0, String::new())])),
        ..Default::default()
    });
    let transfer = Arc::new(RecordingTransfer::default());
    let ctx = test_ctx(source.clone(), transfer, store);

    ctx.markers
        .write_sync_info(&SyncInfo { state: SyncState::Sync, num_shards: 1 })
        .await
        .unwrap();
    ctx.markers
        .write_shard_marker(
            0,
            &DataShardMarker { state: ShardSyncState::IncrementalSync, ..Default::default() },
        )
        .await
        .unwrap();

    let sync = Arc::new(DataSync::new(ctx.clone()));
    let runner = sync.clone();
    let run = tokio::spawn(async move { runner.run().await });

    // Let the worker reach its poll sleep, then poke it.
    tokio::time::sleep(Duration::from_millis(50)).await;
    sync.wakeup(0, ["b:abc:1".to_string()]);

    let shard = BucketShard::parse("b:abc:1").unwrap();
    let markers = ctx.markers.clone();
    wait_until(|| {
        let markers = markers.clone();
        let shard = shard.clone();
        async move {
            markers.read_bucket_status(&shard).await.unwrap().state
                == BucketShardState::IncrementalSync
        }
    })
    .await;

    assert!(source.bilog_poll_count("b:abc:1") >= 1);
    // Side triggers carry no entry marker: the cursor must not move.
    let marker = ctx.markers.read_shard_marker(0).await.unwrap().unwrap();
    assert!(marker.marker.is_empty());

    run.abort();
}

/// Crash mid-full-sync: a data-log shard resumes at the first unprocessed
/// index key, finishes the remainder, and transitions to incremental with
/// the marker captured at initialization.
#[tokio::test(start_paused = true)]
async fn test_full_sync_resume_after_crash() {
    let total = 100usize;
    let done = 50usize;
    let keys: Vec<String> = (0..total).map(|i| format!("b{i:03}:id{i:03}")).collect();

    let store = Arc::new(MemoryLogStore::new());
    let source = Arc::new(MockSource {
        num_shards: 1,
        shard_markers: Mutex::new(HashMap::from([(0, "0099".to_string())])),
        ..Default::default()
    });
    let transfer = Arc::new(RecordingTransfer::default());
    let ctx = test_ctx(source, transfer, store.clone());

    // Persisted state as left by the crashed process: the first 50 keys
    // applied, the cursor on the 50th, the incremental hand-off position
    // captured at init.
    ctx.markers
        .write_sync_info(&SyncInfo { state: SyncState::Sync, num_shards: 1 })
        .await
        .unwrap();
    ctx.markers
        .write_shard_marker(
            0,
            &DataShardMarker {
                state: ShardSyncState::FullSync,
                marker: keys[done - 1].clone(),
                next_step_marker: "0099".to_string(),
                pos: done as u64,
                total_entries: total as u64,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let index_oid = ctx.markers.full_sync_index_oid(0);
    store
        .omap_append(&index_oid, keys.iter().map(|k| (k.clone(), bytes::Bytes::new())).collect())
        .await
        .unwrap();

    let sync = Arc::new(DataSync::new(ctx.clone()));
    let runner = sync.clone();
    let run = tokio::spawn(async move { runner.run().await });

    let markers = ctx.markers.clone();
    wait_until(|| {
        let markers = markers.clone();
        async move {
            markers
                .read_shard_marker(0)
                .await
                .unwrap()
                .is_some_and(|m| m.state == ShardSyncState::IncrementalSync)
        }
    })
    .await;

    let marker = ctx.markers.read_shard_marker(0).await.unwrap().unwrap();
    assert_eq!(marker.marker, "0099");
    assert!(marker.next_step_marker.is_empty());

    // Only the unprocessed tail was replayed: bucket statuses exist for
    // keys 51..100 and were never created for the already-applied prefix.
    for (i, key) in keys.iter().enumerate() {
        let shard = BucketShard::parse(key).unwrap();
        let state = ctx.markers.read_bucket_status(&shard).await.unwrap().state;
        if i < done {
            assert_eq!(state, BucketShardState::Init, "unexpected status for {key}");
        } else {
            assert_eq!(state, BucketShardState::IncrementalSync, "missing status for {key}");
        }
    }

    run.abort();
}

/// An object deleted at the source between listing and fetch counts as
/// applied: the marker advances and the shard completes full sync.
#[tokio::test]
async fn test_not_found_fetch_is_success() {
    let shard = BucketShard::parse("b:abc").unwrap();
    let source = Arc::new(MockSource {
        listings: Mutex::new(HashMap::from([(
            "b:abc".to_string(),
            vec![list_entry("gone", "", 0), list_entry("kept", "", 0)],
        )])),
        ..Default::default()
    });
    let transfer = Arc::new(RecordingTransfer {
        missing_at_source: Mutex::new(HashSet::from(["gone".to_string()])),
        ..Default::default()
    });
    let ctx = test_ctx(source, transfer.clone(), Arc::new(MemoryLogStore::new()));

    sync_bucket_shard(&ctx, &shard).await.unwrap();

    // Only the surviving object was applied locally.
    let applied = transfer.applied();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].2, "kept");

    // The vanished object did not hold the marker back.
    let status = ctx.markers.read_bucket_status(&shard).await.unwrap();
    assert_eq!(status.state, BucketShardState::IncrementalSync);
    assert_eq!(status.full_marker.count, 2);
}
