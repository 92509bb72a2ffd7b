//! Log-store abstraction for ZoneSync.
//!
//! Sync status objects, attribute bundles, and the sharded full-sync index
//! all live in a reliable key-value store referred to as the *log store*.
//! This crate defines the [`LogStore`] trait plus two backends: an
//! in-memory store for tests and single-process runs, and a durable
//! redb-backed store for the daemon.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod memory;
mod redb_store;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use memory::MemoryLogStore;
pub use redb_store::RedbLogStore;

/// A specialized `Result` type for log-store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors from the log store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store is temporarily unable to serve the request.
    #[error("log store busy: {0}")]
    Busy(String),

    /// Another holder owns the advisory lock.
    #[error("lock {name:?} on {oid:?} is held by another owner")]
    LockHeld {
        /// Object the lock protects.
        oid: String,
        /// Lock name.
        name: String,
    },

    /// The backing database rejected or corrupted an operation.
    #[error("log store backend: {0}")]
    Backend(String),

    /// I/O error from the backing database.
    #[error("log store I/O: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether a retry after a delay may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Busy(_))
    }
}

/// Reliable key-value store persisting replication progress.
///
/// Objects are addressed by a flat object id and carry three independent
/// facets: a value blob, an attribute bundle, and a sorted secondary index
/// (omap). Advisory locks are cooperative leases; writing an object may
/// recreate it and drop any lease held on it, so callers re-acquire after
/// writes where they depend on the lease.
#[async_trait]
pub trait LogStore: Send + Sync + 'static {
    /// Reads an object's value. Returns `None` if the object is absent.
    async fn get(&self, oid: &str) -> Result<Option<Bytes>>;

    /// Writes an object's value, creating the object if needed.
    /// Last writer wins.
    async fn put(&self, oid: &str, data: Bytes) -> Result<()>;

    /// Reads an object's attribute bundle. Returns `None` if the object is
    /// absent.
    async fn get_attrs(&self, oid: &str) -> Result<Option<HashMap<String, Bytes>>>;

    /// Merges the given attributes into the object's bundle, creating the
    /// object if needed. Attributes not named are left untouched.
    async fn put_attrs(&self, oid: &str, attrs: HashMap<String, Bytes>) -> Result<()>;

    /// Returns up to `max` omap entries with keys strictly greater than
    /// `start_after`, in key order.
    async fn omap_get(
        &self,
        oid: &str,
        start_after: &str,
        max: usize,
    ) -> Result<Vec<(String, Bytes)>>;

    /// Appends entries to an object's omap, creating the object if needed.
    async fn omap_append(&self, oid: &str, entries: Vec<(String, Bytes)>) -> Result<()>;

    /// Acquires (or renews, for the same cookie) an advisory lock on an
    /// object for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LockHeld`] when a different cookie holds an
    /// unexpired lock.
    async fn lock(&self, oid: &str, name: &str, cookie: &str, ttl: Duration) -> Result<()>;

    /// Releases an advisory lock. Releasing a lock that is not held is not
    /// an error.
    async fn unlock(&self, oid: &str, name: &str, cookie: &str) -> Result<()>;
}
