//! Full-sync index builder.
//!
//! One-time construction of the sharded bucket-instance catalog that seeds
//! data-log full sync. Every bucket instance at the source is expanded
//! into one key per bucket-index shard and appended, in batches, to the
//! index shard chosen by the data-log hash. The build fails as a whole on
//! any error so a partial index is never consumed.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info};
use zonesync_core::log_shard_id;

use crate::error::{Result, SyncError};
use crate::SyncContext;

/// Builds the full-sync index for every data-log shard.
pub struct FullSyncIndexBuilder {
    ctx: Arc<SyncContext>,
}

impl FullSyncIndexBuilder {
    /// Creates a builder over the given context.
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self { ctx }
    }

    /// Lists all bucket instances, shards them into the index, and records
    /// per-shard totals in the data shard markers.
    pub async fn build(&self, num_shards: u32) -> Result<()> {
        if num_shards == 0 {
            return Err(SyncError::IndexBuild("no data-log shards to index into".to_string()));
        }
        let ctx = &self.ctx;
        let keys = ctx
            .remote
            .bucket_instance_keys()
            .await
            .map_err(|e| SyncError::IndexBuild(format!("listing bucket instances: {e}")))?;
        info!(instances = keys.len(), num_shards, "building full-sync index");

        let mut totals = vec![0u64; num_shards as usize];
        let mut buffers: Vec<Vec<(String, Bytes)>> = vec![Vec::new(); num_shards as usize];

        for key in keys {
            let meta = ctx
                .remote
                .bucket_instance_meta(&key)
                .await
                .map_err(|e| SyncError::IndexBuild(format!("metadata for {key:?}: {e}")))?;
            let bucket_info = meta.data.bucket_info;
            debug!(%key, num_shards = bucket_info.num_shards, "indexing bucket instance");

            if bucket_info.num_shards > 0 {
                for bucket_shard in 0..bucket_info.num_shards {
                    let shard_id =
                        log_shard_id(&bucket_info.bucket.name, Some(bucket_shard), num_shards);
                    self.append(&mut buffers, &mut totals, shard_id, format!("{key}:{bucket_shard}"))
                        .await?;
                }
            } else {
                let shard_id = log_shard_id(&bucket_info.bucket.name, None, num_shards);
                self.append(&mut buffers, &mut totals, shard_id, key).await?;
            }
        }

        for (shard_id, buffer) in buffers.iter_mut().enumerate() {
            self.flush(shard_id as u32, buffer).await?;
        }

        // Record the totals so full-sync progress is observable per shard.
        for shard_id in 0..num_shards {
            let mut marker = ctx.markers.read_shard_marker(shard_id).await?.unwrap_or_default();
            marker.total_entries = totals[shard_id as usize];
            ctx.markers.write_shard_marker(shard_id, &marker).await?;
        }
        info!("full-sync index complete");
        Ok(())
    }

    async fn append(
        &self,
        buffers: &mut [Vec<(String, Bytes)>],
        totals: &mut [u64],
        shard_id: u32,
        entry: String,
    ) -> Result<()> {
        totals[shard_id as usize] += 1;
        buffers[shard_id as usize].push((entry, Bytes::new()));
        if buffers[shard_id as usize].len() >= self.ctx.tuning.batch_size {
            self.flush(shard_id, &mut buffers[shard_id as usize]).await?;
        }
        Ok(())
    }

    async fn flush(&self, shard_id: u32, buffer: &mut Vec<(String, Bytes)>) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }
        let oid = self.ctx.markers.full_sync_index_oid(shard_id);
        self.ctx
            .markers
            .store()
            .omap_append(&oid, std::mem::take(buffer))
            .await
            .map_err(|e| SyncError::IndexBuild(format!("appending index shard {shard_id}: {e}")))?;
        Ok(())
    }
}
