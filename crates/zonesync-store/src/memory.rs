//! In-memory log store.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::{LogStore, Result, StoreError};

#[derive(Default)]
struct MemObject {
    data: Option<Bytes>,
    attrs: HashMap<String, Bytes>,
    omap: BTreeMap<String, Bytes>,
}

struct LockState {
    name: String,
    cookie: String,
    expires: Instant,
}

/// In-memory [`LogStore`] for tests and single-process runs.
///
/// Mirrors the lease behavior of the real store: a `put` recreates the
/// object and drops any lease held on it.
#[derive(Default)]
pub struct MemoryLogStore {
    objects: DashMap<String, Mutex<MemObject>>,
    locks: DashMap<String, LockState>,
}

impl MemoryLogStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_object<R>(&self, oid: &str, f: impl FnOnce(&mut MemObject) -> R) -> R {
        let entry = self.objects.entry(oid.to_string()).or_default();
        let mut obj = entry.lock();
        f(&mut obj)
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn get(&self, oid: &str) -> Result<Option<Bytes>> {
        Ok(self.objects.get(oid).and_then(|o| o.lock().data.clone()))
    }

    async fn put(&self, oid: &str, data: Bytes) -> Result<()> {
        self.with_object(oid, |obj| obj.data = Some(data));
        // Object recreation invalidates any lease held on it.
        self.locks.remove(oid);
        Ok(())
    }

    async fn get_attrs(&self, oid: &str) -> Result<Option<HashMap<String, Bytes>>> {
        Ok(self.objects.get(oid).map(|o| o.lock().attrs.clone()))
    }

    async fn put_attrs(&self, oid: &str, attrs: HashMap<String, Bytes>) -> Result<()> {
        self.with_object(oid, |obj| obj.attrs.extend(attrs));
        Ok(())
    }

    async fn omap_get(
        &self,
        oid: &str,
        start_after: &str,
        max: usize,
    ) -> Result<Vec<(String, Bytes)>> {
        let Some(obj) = self.objects.get(oid) else {
            return Ok(Vec::new());
        };
        let obj = obj.lock();
        Ok(obj
            .omap
            .range::<String, _>((Bound::Excluded(start_after.to_string()), Bound::Unbounded))
            .take(max)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn omap_append(&self, oid: &str, entries: Vec<(String, Bytes)>) -> Result<()> {
        self.with_object(oid, |obj| obj.omap.extend(entries));
        Ok(())
    }

    async fn lock(&self, oid: &str, name: &str, cookie: &str, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        match self.locks.entry(oid.to_string()) {
            Entry::Occupied(mut held) => {
                let state = held.get();
                if state.cookie != cookie && state.expires > now {
                    return Err(StoreError::LockHeld {
                        oid: oid.to_string(),
                        name: state.name.clone(),
                    });
                }
                held.insert(LockState {
                    name: name.to_string(),
                    cookie: cookie.to_string(),
                    expires: now + ttl,
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(LockState {
                    name: name.to_string(),
                    cookie: cookie.to_string(),
                    expires: now + ttl,
                });
            }
        }
        Ok(())
    }

    async fn unlock(&self, oid: &str, _name: &str, cookie: &str) -> Result<()> {
        self.locks.remove_if(oid, |_, state| state.cookie == cookie);
        Ok(())
    }
}
