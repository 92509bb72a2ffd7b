//! In-flight marker tracking for sync shards.
//!
//! A shard worker hands every entry it dispatches to a tracker and reports
//! completion back. Entries complete out of order, but the persisted resume
//! cursor may only move through a contiguous prefix of completed entries;
//! the tracker holds the position back until every earlier entry is done.
//!
//! The tracker also serializes concurrent work per bucket shard: the data
//! log can carry several entries for the same bucket shard, and only one
//! replication task per shard may run at a time. A rejected entry flags the
//! shard for one redundant re-poll after the in-flight task completes, so
//! no mutation is missed between the dedup decision and the completion.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::Result;

/// A cursor advance ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerUpdate<K> {
    /// Highest contiguously-completed marker.
    pub position: K,
    /// Index position recorded at `start` for that marker.
    pub index_pos: u64,
    /// Timestamp recorded at `start` for that marker.
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Pending {
    index_pos: u64,
    timestamp: Option<DateTime<Utc>>,
    done: bool,
}

/// Window-bounded tracker of in-flight markers for one shard.
#[derive(Debug)]
pub struct MarkerTracker<K: Ord + Clone> {
    window: usize,
    pending: BTreeMap<K, Pending>,
    /// Highest contiguously-completed marker not yet handed out.
    high: Option<MarkerUpdate<K>>,
    completed_since_flush: usize,
    key_to_marker: HashMap<String, K>,
    marker_to_key: BTreeMap<K, String>,
    retry_keys: HashSet<String>,
}

impl<K: Ord + Clone> MarkerTracker<K> {
    /// Creates a tracker persisting at most every `window` completions.
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            pending: BTreeMap::new(),
            high: None,
            completed_since_flush: 0,
            key_to_marker: HashMap::new(),
            marker_to_key: BTreeMap::new(),
            retry_keys: HashSet::new(),
        }
    }

    /// Records that work for `marker` has begun. Returns `false` if the
    /// marker is already tracked.
    pub fn start(
        &mut self,
        marker: K,
        index_pos: u64,
        timestamp: Option<DateTime<Utc>>,
    ) -> bool {
        if self.pending.contains_key(&marker) {
            return false;
        }
        self.pending.insert(marker, Pending { index_pos, timestamp, done: false });
        true
    }

    /// Records completion of `marker`. When the completed prefix has grown
    /// enough (or everything drained), returns the position to persist.
    pub fn finish(&mut self, marker: &K) -> Option<MarkerUpdate<K>> {
        if let Some(key) = self.marker_to_key.remove(marker) {
            self.key_to_marker.remove(&key);
        }
        self.pending.get_mut(marker)?.done = true;

        // Pop the contiguous completed prefix, remembering the high mark.
        while let Some(entry) = self.pending.first_entry() {
            if !entry.get().done {
                break;
            }
            let (position, info) = entry.remove_entry();
            self.completed_since_flush += 1;
            self.high = Some(MarkerUpdate {
                position,
                index_pos: info.index_pos,
                timestamp: info.timestamp,
            });
        }

        if self.high.is_some()
            && (self.completed_since_flush >= self.window || self.pending.is_empty())
        {
            self.completed_since_flush = 0;
            return self.high.take();
        }
        None
    }

    /// Records that `marker` is the in-flight work for `bucket_key`.
    /// Returns `false` (and flags the key for retry) when another marker is
    /// already in flight for the same key.
    pub fn index_key_to_marker(&mut self, bucket_key: &str, marker: &K) -> bool {
        if self.key_to_marker.contains_key(bucket_key) {
            self.retry_keys.insert(bucket_key.to_string());
            return false;
        }
        self.key_to_marker.insert(bucket_key.to_string(), marker.clone());
        self.marker_to_key.insert(marker.clone(), bucket_key.to_string());
        true
    }

    /// Whether more work arrived for `bucket_key` while it was in flight.
    pub fn need_retry(&self, bucket_key: &str) -> bool {
        self.retry_keys.contains(bucket_key)
    }

    /// Clears the retry flag for `bucket_key`.
    pub fn reset_need_retry(&mut self, bucket_key: &str) {
        self.retry_keys.remove(bucket_key);
    }

    /// Atomically concludes a replication pass for `bucket_key`.
    ///
    /// If more work arrived while the pass ran, the retry flag is cleared
    /// and `false` is returned: the caller must run another pass. Otherwise
    /// the key is released for new markers and `true` is returned. The
    /// check and the release happen under one lock, so a rejection can
    /// never slip between the caller's last pass and the release.
    pub fn release_key(&mut self, bucket_key: &str, marker: Option<&K>) -> bool {
        if self.retry_keys.remove(bucket_key) {
            return false;
        }
        if let Some(marker) = marker {
            if self.key_to_marker.get(bucket_key) == Some(marker) {
                self.key_to_marker.remove(bucket_key);
                self.marker_to_key.remove(marker);
            }
        }
        true
    }

    /// Number of markers started but not yet popped.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }
}

/// Persists a tracker's cursor advances.
#[async_trait]
pub trait StoreMarker<K>: Send + Sync {
    /// Writes `update` into the shard's durable marker.
    async fn store_marker(&self, update: &MarkerUpdate<K>) -> Result<()>;
}

/// A [`MarkerTracker`] paired with its persistence sink.
///
/// Flushes are gated behind an async mutex carrying the last persisted
/// position, so concurrent completions can never write an older cursor
/// over a newer one.
pub struct TrackedMarkers<K: Ord + Clone, S> {
    tracker: Mutex<MarkerTracker<K>>,
    gate: tokio::sync::Mutex<Option<K>>,
    sink: S,
}

impl<K, S> TrackedMarkers<K, S>
where
    K: Ord + Clone + Send + Sync,
    S: StoreMarker<K>,
{
    /// Creates a tracked marker set.
    pub fn new(window: usize, sink: S) -> Self {
        Self {
            tracker: Mutex::new(MarkerTracker::new(window)),
            gate: tokio::sync::Mutex::new(None),
            sink,
        }
    }

    /// See [`MarkerTracker::start`].
    pub fn start(&self, marker: K, index_pos: u64, timestamp: Option<DateTime<Utc>>) -> bool {
        self.tracker.lock().start(marker, index_pos, timestamp)
    }

    /// See [`MarkerTracker::index_key_to_marker`].
    pub fn index_key_to_marker(&self, bucket_key: &str, marker: &K) -> bool {
        self.tracker.lock().index_key_to_marker(bucket_key, marker)
    }

    /// See [`MarkerTracker::need_retry`].
    pub fn need_retry(&self, bucket_key: &str) -> bool {
        self.tracker.lock().need_retry(bucket_key)
    }

    /// See [`MarkerTracker::reset_need_retry`].
    pub fn reset_need_retry(&self, bucket_key: &str) {
        self.tracker.lock().reset_need_retry(bucket_key)
    }

    /// See [`MarkerTracker::release_key`].
    pub fn release_key(&self, bucket_key: &str, marker: Option<&K>) -> bool {
        self.tracker.lock().release_key(bucket_key, marker)
    }

    /// Number of markers in flight.
    pub fn in_flight(&self) -> usize {
        self.tracker.lock().in_flight()
    }

    /// Access to the persistence sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Records completion and persists the cursor when the tracker hands
    /// one out.
    pub async fn finish(&self, marker: &K) -> Result<()> {
        let update = self.tracker.lock().finish(marker);
        if let Some(update) = update {
            let mut persisted = self.gate.lock().await;
            let stale = persisted.as_ref().is_some_and(|p| *p >= update.position);
            if !stale {
                self.sink.store_marker(&update).await?;
                *persisted = Some(update.position.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_in_order_completion_advances() {
        let mut tracker = MarkerTracker::new(1);
        assert!(tracker.start("m1".to_string(), 1, None));
        assert!(tracker.start("m2".to_string(), 2, None));

        let update = tracker.finish(&"m1".to_string()).unwrap();
        assert_eq!(update.position, "m1");
        assert_eq!(update.index_pos, 1);

        let update = tracker.finish(&"m2".to_string()).unwrap();
        assert_eq!(update.position, "m2");
        assert_eq!(tracker.in_flight(), 0);
    }

    #[test]
    fn test_out_of_order_completion_held_back() {
        let mut tracker = MarkerTracker::new(1);
        tracker.start("m1".to_string(), 1, None);
        tracker.start("m2".to_string(), 2, None);
        tracker.start("m3".to_string(), 3, None);

        // m2 and m3 finish first; nothing may be persisted yet.
        assert!(tracker.finish(&"m3".to_string()).is_none());
        assert!(tracker.finish(&"m2".to_string()).is_none());

        // The oldest completes: the cursor jumps over the whole prefix.
        let update = tracker.finish(&"m1".to_string()).unwrap();
        assert_eq!(update.position, "m3");
        assert_eq!(update.index_pos, 3);
    }

    #[test]
    fn test_window_throttles_persists() {
        let mut tracker = MarkerTracker::new(3);
        for i in 1..=6 {
            tracker.start(format!("m{i}"), i, None);
        }
        assert!(tracker.finish(&"m1".to_string()).is_none());
        assert!(tracker.finish(&"m2".to_string()).is_none());
        // Third completion reaches the window.
        let update = tracker.finish(&"m3".to_string()).unwrap();
        assert_eq!(update.position, "m3");

        assert!(tracker.finish(&"m4".to_string()).is_none());
        assert!(tracker.finish(&"m5".to_string()).is_none());
        // Draining flushes regardless of the window.
        let update = tracker.finish(&"m6".to_string()).unwrap();
        assert_eq!(update.position, "m6");
    }

    #[test]
    fn test_duplicate_start_rejected() {
        let mut tracker = MarkerTracker::new(1);
        assert!(tracker.start("m1".to_string(), 1, None));
        assert!(!tracker.start("m1".to_string(), 1, None));
    }

    #[test]
    fn test_dedup_and_retry_flag() {
        let mut tracker = MarkerTracker::new(1);
        assert!(tracker.index_key_to_marker("b:abc", &"L1".to_string()));
        // A second marker for the same bucket shard is rejected and flags
        // the key.
        assert!(!tracker.index_key_to_marker("b:abc", &"L2".to_string()));
        assert!(tracker.need_retry("b:abc"));

        tracker.reset_need_retry("b:abc");
        assert!(!tracker.need_retry("b:abc"));

        // Finishing L1 releases the key for new markers.
        tracker.start("L1".to_string(), 0, None);
        tracker.finish(&"L1".to_string());
        assert!(tracker.index_key_to_marker("b:abc", &"L3".to_string()));
    }

    #[test]
    fn test_release_key_demands_retry_first() {
        let mut tracker = MarkerTracker::new(1);
        let marker = "L1".to_string();
        assert!(tracker.index_key_to_marker("b:abc", &marker));
        assert!(!tracker.index_key_to_marker("b:abc", &"L2".to_string()));

        // The rejected entry flagged the key: the first release attempt
        // clears the flag and demands another pass.
        assert!(!tracker.release_key("b:abc", Some(&marker)));
        // The second attempt releases the key for new markers.
        assert!(tracker.release_key("b:abc", Some(&marker)));
        assert!(tracker.index_key_to_marker("b:abc", &"L3".to_string()));
    }

    #[test]
    fn test_release_key_without_marker_keeps_registration() {
        let mut tracker = MarkerTracker::new(1);
        let marker = "L1".to_string();
        assert!(tracker.index_key_to_marker("b:abc", &marker));

        // A side-triggered pass carries no marker and must not release a
        // registration owned by a log entry.
        assert!(tracker.release_key("b:abc", None));
        assert!(!tracker.index_key_to_marker("b:abc", &"L2".to_string()));
    }

    #[test]
    fn test_position_never_decreases() {
        let mut tracker = MarkerTracker::new(1);
        let mut last: Option<String> = None;
        tracker.start("m1".to_string(), 1, None);
        tracker.start("m2".to_string(), 2, None);
        tracker.start("m3".to_string(), 3, None);
        for m in ["m2", "m1", "m3"] {
            if let Some(update) = tracker.finish(&m.to_string()) {
                if let Some(prev) = &last {
                    assert!(update.position > *prev);
                }
                last = Some(update.position);
            }
        }
        assert_eq!(last.as_deref(), Some("m3"));
    }

    struct RecordingSink {
        writes: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StoreMarker<String> for RecordingSink {
        async fn store_marker(&self, update: &MarkerUpdate<String>) -> Result<()> {
            self.writes.lock().push(update.position.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_tracked_markers_persist_in_order() {
        let markers = Arc::new(TrackedMarkers::new(
            1,
            RecordingSink { writes: Mutex::new(Vec::new()) },
        ));
        markers.start("m1".to_string(), 1, None);
        markers.start("m2".to_string(), 2, None);

        markers.finish(&"m2".to_string()).await.unwrap();
        markers.finish(&"m1".to_string()).await.unwrap();

        let writes = markers.sink().writes.lock().clone();
        assert_eq!(writes, vec!["m2".to_string()]);
    }
}
