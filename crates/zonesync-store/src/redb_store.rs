//! redb-backed durable log store.

use std::collections::HashMap;
use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use tracing::debug;

use super::{LogStore, Result, StoreError};

/// Object values: oid -> bytes.
const OBJECTS: TableDefinition<'_, &str, &[u8]> = TableDefinition::new("objects");

/// Attribute bundles: composite key "oid\0attr" -> bytes.
const ATTRS: TableDefinition<'_, &str, &[u8]> = TableDefinition::new("attrs");

/// Sorted secondary indexes: composite key "oid\0key" -> bytes.
const OMAP: TableDefinition<'_, &str, &[u8]> = TableDefinition::new("omap");

fn db_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn composite(oid: &str, key: &str) -> String {
    format!("{oid}\0{key}")
}

struct LockState {
    cookie: String,
    expires: Instant,
}

/// Durable [`LogStore`] backed by a single redb database file.
///
/// Advisory locks are kept in process memory: the daemon is the only writer
/// of its own sync status, and leases exist to serialize initialization
/// within it, not across processes.
pub struct RedbLogStore {
    db: Arc<Database>,
    locks: DashMap<String, LockState>,
}

impl RedbLogStore {
    /// Opens (or creates) the database at `path` and ensures all tables
    /// exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created or opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path.as_ref()).map_err(db_err)?;
        let txn = db.begin_write().map_err(db_err)?;
        {
            let _ = txn.open_table(OBJECTS).map_err(db_err)?;
            let _ = txn.open_table(ATTRS).map_err(db_err)?;
            let _ = txn.open_table(OMAP).map_err(db_err)?;
        }
        txn.commit().map_err(db_err)?;
        debug!(path = %path.as_ref().display(), "opened redb log store");
        Ok(Self { db: Arc::new(db), locks: DashMap::new() })
    }

    async fn run_blocking<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(Arc<Database>) -> Result<R> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(db))
            .await
            .map_err(|e| StoreError::Backend(format!("blocking task failed: {e}")))?
    }
}

#[async_trait]
impl LogStore for RedbLogStore {
    async fn get(&self, oid: &str) -> Result<Option<Bytes>> {
        let oid = oid.to_string();
        self.run_blocking(move |db| {
            let txn = db.begin_read().map_err(db_err)?;
            let table = txn.open_table(OBJECTS).map_err(db_err)?;
            let value = table.get(oid.as_str()).map_err(db_err)?;
            Ok(value.map(|guard| Bytes::copy_from_slice(guard.value())))
        })
        .await
    }

    async fn put(&self, oid: &str, data: Bytes) -> Result<()> {
        let key = oid.to_string();
        self.run_blocking(move |db| {
            let txn = db.begin_write().map_err(db_err)?;
            {
                let mut table = txn.open_table(OBJECTS).map_err(db_err)?;
                table.insert(key.as_str(), data.as_ref()).map_err(db_err)?;
            }
            txn.commit().map_err(db_err)?;
            Ok(())
        })
        .await?;
        // Object recreation invalidates any lease held on it.
        self.locks.remove(oid);
        Ok(())
    }

    async fn get_attrs(&self, oid: &str) -> Result<Option<HashMap<String, Bytes>>> {
        let oid = oid.to_string();
        self.run_blocking(move |db| {
            let txn = db.begin_read().map_err(db_err)?;
            let attrs_table = txn.open_table(ATTRS).map_err(db_err)?;
            let lower = composite(&oid, "");
            let upper = format!("{oid}\u{1}");
            let mut attrs = HashMap::new();
            for item in attrs_table
                .range::<&str>((Bound::Excluded(lower.as_str()), Bound::Excluded(upper.as_str())))
                .map_err(db_err)?
            {
                let (k, v) = item.map_err(db_err)?;
                let name = k.value()[oid.len() + 1..].to_string();
                attrs.insert(name, Bytes::copy_from_slice(v.value()));
            }
            if !attrs.is_empty() {
                return Ok(Some(attrs));
            }
            // No attrs; the object may still exist through its value.
            let objects = txn.open_table(OBJECTS).map_err(db_err)?;
            if objects.get(oid.as_str()).map_err(db_err)?.is_some() {
                Ok(Some(HashMap::new()))
            } else {
                Ok(None)
            }
        })
        .await
    }

    async fn put_attrs(&self, oid: &str, attrs: HashMap<String, Bytes>) -> Result<()> {
        let oid = oid.to_string();
        self.run_blocking(move |db| {
            let txn = db.begin_write().map_err(db_err)?;
            {
                let mut table = txn.open_table(ATTRS).map_err(db_err)?;
                for (name, value) in &attrs {
                    table.insert(composite(&oid, name).as_str(), value.as_ref()).map_err(db_err)?;
                }
            }
            txn.commit().map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn omap_get(
        &self,
        oid: &str,
        start_after: &str,
        max: usize,
    ) -> Result<Vec<(String, Bytes)>> {
        let oid = oid.to_string();
        let start_after = start_after.to_string();
        self.run_blocking(move |db| {
            let txn = db.begin_read().map_err(db_err)?;
            let table = txn.open_table(OMAP).map_err(db_err)?;
            let lower = composite(&oid, &start_after);
            let upper = format!("{oid}\u{1}");
            let mut entries = Vec::new();
            for item in table
                .range::<&str>((Bound::Excluded(lower.as_str()), Bound::Excluded(upper.as_str())))
                .map_err(db_err)?
            {
                let (k, v) = item.map_err(db_err)?;
                entries.push((
                    k.value()[oid.len() + 1..].to_string(),
                    Bytes::copy_from_slice(v.value()),
                ));
                if entries.len() == max {
                    break;
                }
            }
            Ok(entries)
        })
        .await
    }

    async fn omap_append(&self, oid: &str, entries: Vec<(String, Bytes)>) -> Result<()> {
        let oid = oid.to_string();
        self.run_blocking(move |db| {
            let txn = db.begin_write().map_err(db_err)?;
            {
                let mut table = txn.open_table(OMAP).map_err(db_err)?;
                for (key, value) in &entries {
                    table.insert(composite(&oid, key).as_str(), value.as_ref()).map_err(db_err)?;
                }
            }
            txn.commit().map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn lock(&self, oid: &str, name: &str, cookie: &str, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut entry = self.locks.entry(oid.to_string()).or_insert_with(|| LockState {
            cookie: cookie.to_string(),
            expires: now + ttl,
        });
        if entry.cookie != cookie && entry.expires > now {
            return Err(StoreError::LockHeld { oid: oid.to_string(), name: name.to_string() });
        }
        entry.cookie = cookie.to_string();
        entry.expires = now + ttl;
        Ok(())
    }

    async fn unlock(&self, oid: &str, _name: &str, cookie: &str) -> Result<()> {
        self.locks.remove_if(oid, |_, state| state.cookie == cookie);
        Ok(())
    }
}
