//! Keyed FIFO work queue: one channel-backed worker per active key.
//!
//! Jobs under the same key run strictly in submission order; different keys
//! run concurrently. A lane whose backlog drains is removed from the map so
//! idle conversations cost nothing.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tracing::debug;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

struct Lane {
    tx: mpsc::UnboundedSender<Job>,
    pending: Arc<AtomicUsize>,
}

#[derive(Clone)]
pub struct WorkQueue {
    lanes: Arc<Mutex<HashMap<String, Lane>>>,
    inflight: Arc<AtomicUsize>,
    drained: Arc<Notify>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self {
            lanes: Arc::new(Mutex::new(HashMap::new())),
            inflight: Arc::new(AtomicUsize::new(0)),
            drained: Arc::new(Notify::new()),
        }
    }

    /// Append `job` to the key's lane, creating the lane worker on demand.
    pub fn enqueue<F>(&self, key: &str, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inflight.fetch_add(1, Ordering::SeqCst);
        let mut lanes = self.lanes.lock().unwrap();
        let lane = lanes
            .entry(key.to_string())
            .or_insert_with(|| self.spawn_lane(key.to_string()));
        lane.pending.fetch_add(1, Ordering::SeqCst);
        // The worker holds the receiver for as long as the lane is mapped,
        // so a send can only fail after removal, and removal only happens
        // under this lock with pending == 0.
        let _ = lane.tx.send(Box::pin(job));
    }

    /// Number of jobs queued or running.
    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::SeqCst)
    }

    /// Wait for all lanes to empty. Returns false when `timeout` elapses
    /// first.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.inflight() == 0 {
                return true;
            }
            let notified = self.drained.notified();
            if self.inflight() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.inflight() == 0;
            }
        }
    }

    fn spawn_lane(&self, key: String) -> Lane {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let pending = Arc::new(AtomicUsize::new(0));

        let lanes = Arc::clone(&self.lanes);
        let inflight = Arc::clone(&self.inflight);
        let drained = Arc::clone(&self.drained);
        let lane_pending = Arc::clone(&pending);

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
                lane_pending.fetch_sub(1, Ordering::SeqCst);
                if inflight.fetch_sub(1, Ordering::SeqCst) == 1 {
                    drained.notify_waiters();
                }

                // Remove the lane if nothing raced in; the pending check and
                // removal share the map lock with enqueue, so no job is lost.
                let mut map = lanes.lock().unwrap();
                if lane_pending.load(Ordering::SeqCst) == 0 {
                    map.remove(&key);
                    debug!(key = %key, "queue lane drained");
                    break;
                }
            }
        });

        Lane { tx, pending }
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}
