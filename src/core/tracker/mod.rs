//! Request Lifecycle Tracker (§4.G): a bounded in-memory hot pool that collapses
//! updates, plus an async single-consumer flusher that writes terminal records to
//! durable storage.

mod record;

pub use record::{RequestPatch, RequestRecord, RequestStatus};

use crate::storage::DurableTrackerStore;
use crate::utils::time::now_secs;
use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

struct HotPool {
    records: HashMap<u64, RequestRecord>,
    /// Insertion order, used to find the oldest *completed* record to evict (§3: an
    /// in-flight record is never evicted).
    order: VecDeque<u64>,
    capacity: usize,
    max_age: Duration,
}

impl HotPool {
    fn new(capacity: usize, max_age: Duration) -> Self {
        Self {
            records: HashMap::new(),
            order: VecDeque::new(),
            capacity,
            max_age,
        }
    }

    fn insert(&mut self, record: RequestRecord) {
        self.order.push_back(record.id);
        self.records.insert(record.id, record);
        self.evict_if_needed();
    }

    fn evict_if_needed(&mut self) {
        while self.records.len() > self.capacity {
            if !self.evict_oldest_terminal() {
                break; // every record in the pool is in-flight; cannot evict further.
            }
        }
        let cutoff = now_secs().saturating_sub(self.max_age.as_secs());
        let stale: Vec<u64> = self
            .records
            .values()
            .filter(|r| r.status.is_terminal() && r.updated_at < cutoff)
            .map(|r| r.id)
            .collect();
        for id in stale {
            self.records.remove(&id);
            self.order.retain(|candidate| *candidate != id);
        }
    }

    fn evict_oldest_terminal(&mut self) -> bool {
        if let Some(pos) = self
            .order
            .iter()
            .position(|id| self.records.get(id).map(|r| r.status.is_terminal()).unwrap_or(false))
        {
            let id = self.order.remove(pos).unwrap();
            self.records.remove(&id);
            true
        } else {
            false
        }
    }
}

/// Bounded hot pool plus async durable flusher (§4.G).
pub struct LifecycleTracker {
    pool: Mutex<HotPool>,
    next_id: AtomicU64,
    flush_queue: Arc<ArrayQueue<RequestRecord>>,
    store: Arc<dyn DurableTrackerStore>,
    dead_letters: Mutex<VecDeque<RequestRecord>>,
    flush_batch_size: usize,
    back_pressure_budget: Duration,
}

impl LifecycleTracker {
    pub fn new(
        hot_pool_capacity: usize,
        hot_pool_max_age: Duration,
        flush_queue_capacity: usize,
        flush_batch_size: usize,
        store: Arc<dyn DurableTrackerStore>,
    ) -> Self {
        Self {
            pool: Mutex::new(HotPool::new(hot_pool_capacity, hot_pool_max_age)),
            next_id: AtomicU64::new(1),
            flush_queue: Arc::new(ArrayQueue::new(flush_queue_capacity)),
            store,
            dead_letters: Mutex::new(VecDeque::new()),
            flush_batch_size,
            back_pressure_budget: Duration::from_millis(50),
        }
    }

    /// `record_request_start(meta) → id` (§4.G).
    pub fn record_request_start(&self) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let record = RequestRecord::new(id, now_secs());
        self.pool.lock().insert(record);
        id
    }

    /// `record_request_update(id, patch)`: idempotent copy-on-write patch.
    pub fn record_request_update(&self, id: u64, patch: &RequestPatch) {
        let mut pool = self.pool.lock();
        if let Some(record) = pool.records.get_mut(&id) {
            patch.apply(record, now_secs());
        }
    }

    pub fn get(&self, id: u64) -> Option<RequestRecord> {
        self.pool.lock().records.get(&id).cloned()
    }

    /// `record_request_finish(id, terminal)`: transitions to terminal, enqueues for
    /// flush. Back-pressure: if the flush queue is full this blocks briefly before
    /// dropping the record to the dead-letter log — it must never block caller-visible
    /// latency beyond `back_pressure_budget`.
    pub async fn record_request_finish(&self, id: u64, terminal: RequestStatus) {
        debug_assert!(terminal.is_terminal());
        let finished = {
            let mut pool = self.pool.lock();
            if let Some(record) = pool.records.get_mut(&id) {
                if record.status.is_terminal() {
                    // Already finalized once; §3 invariant forbids a second transition.
                    return;
                }
                record.status = terminal;
                record.updated_at = now_secs();
                Some(record.clone())
            } else {
                None
            }
        };

        let Some(record) = finished else { return };
        self.pool.lock().evict_if_needed();
        self.enqueue_for_flush(record).await;
    }

    async fn enqueue_for_flush(&self, record: RequestRecord) {
        if self.flush_queue.push(record.clone()).is_ok() {
            return;
        }

        let deadline = tokio::time::Instant::now() + self.back_pressure_budget;
        loop {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if self.flush_queue.push(record.clone()).is_ok() {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(request_id = record.id, "flush queue full; record sent to dead-letter log");
                self.dead_letters.lock().push_back(record);
                return;
            }
        }
    }

    pub fn dead_letter_count(&self) -> usize {
        self.dead_letters.lock().len()
    }

    /// Drain up to `flush_batch_size` queued records for the background flusher.
    fn drain_batch(&self) -> Vec<RequestRecord> {
        let mut batch = Vec::with_capacity(self.flush_batch_size);
        while batch.len() < self.flush_batch_size {
            match self.flush_queue.pop() {
                Some(record) => batch.push(record),
                None => break,
            }
        }
        batch
    }

    /// Spawn the single-consumer flusher loop (§4.G "Internal flusher").
    pub fn spawn_flusher(self: &Arc<Self>, flush_interval: Duration) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(flush_interval);
            loop {
                ticker.tick().await;
                let batch = this.drain_batch();
                if batch.is_empty() {
                    continue;
                }
                if let Err(e) = this.store.write_batch(&batch).await {
                    error!(error = %e, count = batch.len(), "durable flush failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NdjsonTrackerStore;

    fn tracker() -> (Arc<LifecycleTracker>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(NdjsonTrackerStore::new(dir.path().join("records.ndjson")));
        let tracker = Arc::new(LifecycleTracker::new(10, Duration::from_secs(3600), 16, 8, store));
        (tracker, dir)
    }

    #[tokio::test]
    async fn finish_is_terminal_exactly_once() {
        let (tracker, _dir) = tracker();
        let id = tracker.record_request_start();
        tracker.record_request_finish(id, RequestStatus::Completed).await;
        tracker.record_request_finish(id, RequestStatus::Error).await;
        assert_eq!(tracker.get(id).unwrap().status, RequestStatus::Completed);
    }

    #[tokio::test]
    async fn update_patch_is_idempotent() {
        let (tracker, _dir) = tracker();
        let id = tracker.record_request_start();
        let patch = RequestPatch {
            retry_count: Some(2),
            ..Default::default()
        };
        tracker.record_request_update(id, &patch);
        tracker.record_request_update(id, &patch);
        assert_eq!(tracker.get(id).unwrap().retry_count, 2);
    }

    #[tokio::test]
    async fn hot_pool_never_exceeds_capacity_by_evicting_completed_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(NdjsonTrackerStore::new(dir.path().join("records.ndjson")));
        let tracker = Arc::new(LifecycleTracker::new(2, Duration::from_secs(3600), 16, 8, store));

        let a = tracker.record_request_start();
        tracker.record_request_finish(a, RequestStatus::Completed).await;
        let _b = tracker.record_request_start();
        let _c = tracker.record_request_start();

        assert!(tracker.pool.lock().records.len() <= 2);
        // The terminal record was evicted first; in-flight ones survive.
        assert!(tracker.get(a).is_none());
    }

    #[tokio::test]
    async fn in_flight_records_are_never_evicted() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(NdjsonTrackerStore::new(dir.path().join("records.ndjson")));
        let tracker = Arc::new(LifecycleTracker::new(1, Duration::from_secs(3600), 16, 8, store));

        let a = tracker.record_request_start();
        let b = tracker.record_request_start();
        // Neither is terminal: the pool is allowed to exceed capacity rather than drop
        // an in-flight record.
        assert!(tracker.get(a).is_some());
        assert!(tracker.get(b).is_some());
    }

    #[tokio::test]
    async fn flusher_writes_finished_records_to_the_durable_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.ndjson");
        let store = Arc::new(NdjsonTrackerStore::new(path.clone()));
        let tracker = Arc::new(LifecycleTracker::new(10, Duration::from_secs(3600), 16, 8, store));

        let id = tracker.record_request_start();
        tracker.record_request_finish(id, RequestStatus::Completed).await;

        let handle = tracker.spawn_flusher(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(content.contains("\"id\":1"));
    }
}
