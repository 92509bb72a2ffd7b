//! Task primitives for the sync workers.
//!
//! Workers fan per-entry work out into child tasks and need three things
//! the bare runtime spawn does not give them: a bounded spawn window,
//! drain-all before state transitions, and cancellation of the whole
//! subtree when the parent goes away. [`TaskSet`] packages those over
//! `tokio::task::JoinSet`; children are always owned by their parent set
//! and are aborted when it drops.
//!
//! [`Wakeup`] carries the out-of-band notification that breaks a worker
//! out of its poll-interval sleep.

use std::future::Future;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::error;

/// A set of child tasks owned by one worker.
pub struct TaskSet<T> {
    inner: JoinSet<T>,
}

impl<T: Send + 'static> TaskSet<T> {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self { inner: JoinSet::new() }
    }

    /// Spawns a child task into the set.
    pub fn spawn<F>(&mut self, fut: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        self.inner.spawn(fut);
    }

    /// Number of children not yet collected.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the set has no outstanding children.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Waits for any child to complete and returns its output, or `None`
    /// when the set is empty. Panicked children are logged and skipped.
    pub async fn wait_any(&mut self) -> Option<T> {
        loop {
            match self.inner.join_next().await? {
                Ok(output) => return Some(output),
                Err(join_err) => {
                    if join_err.is_panic() {
                        error!(error = %join_err, "sync child task panicked");
                    }
                }
            }
        }
    }

    /// Collects already-finished children without blocking.
    pub fn reap(&mut self) -> Vec<T> {
        let mut outputs = Vec::new();
        while let Some(res) = self.inner.try_join_next() {
            match res {
                Ok(output) => outputs.push(output),
                Err(join_err) => {
                    if join_err.is_panic() {
                        error!(error = %join_err, "sync child task panicked");
                    }
                }
            }
        }
        outputs
    }

    /// Blocks until the number of outstanding children is within `window`,
    /// returning the outputs collected while waiting.
    pub async fn throttle(&mut self, window: usize) -> Vec<T> {
        let mut outputs = Vec::new();
        while self.inner.len() > window {
            if let Some(output) = self.wait_any().await {
                outputs.push(output);
            }
        }
        outputs
    }

    /// Waits for every outstanding child and returns all outputs.
    pub async fn drain(&mut self) -> Vec<T> {
        let mut outputs = Vec::new();
        while let Some(output) = self.wait_any().await {
            outputs.push(output);
        }
        outputs
    }
}

impl<T: Send + 'static> Default for TaskSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Out-of-band wake signal for a sleeping worker.
///
/// A wake delivered while the worker is not sleeping is retained and
/// cancels the next sleep, so notifications cannot be lost between the
/// worker draining its queue and going to sleep.
#[derive(Debug, Default)]
pub struct Wakeup {
    notify: Notify,
}

impl Wakeup {
    /// Creates a wake signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wakes the worker, cancelling its current or next sleep.
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    /// Sleeps for `duration` unless woken. Returns `true` when the sleep
    /// was cut short by a wake.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = self.notify.notified() => true,
        }
    }
}
