//! A deduplicating, rate-limited work queue.
//!
//! Keys move through three states:
//!
//! ```text
//! add ──> [ dirty + queued ] ──get──> [ processing ] ──done──> (gone)
//!                 ^                          │
//!                 └──── re-added while ──────┘
//!                       processing
//! ```
//!
//! A key is never handed to two workers at once. Adding a key that is
//! already queued is a no-op; adding a key that is being processed marks it
//! dirty so that it is queued exactly once more when the current run calls
//! [`WorkQueue::done`].

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use parking_lot::Mutex;
use prometheus_client::metrics::gauge::Gauge;
use std::{collections::VecDeque, hash::Hash, sync::Arc};
use tokio::{sync::Notify, time};

/// Per-key exponential backoff used by [`WorkQueue::add_rate_limited`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Backoff {
    pub base: time::Duration,
    pub max: time::Duration,
}

#[derive(Debug)]
pub struct WorkQueue<K> {
    inner: Arc<Inner<K>>,
}

#[derive(Debug)]
struct Inner<K> {
    state: Mutex<State<K>>,
    backoff: Backoff,

    /// Tracks the number of queued keys.
    depth: Gauge,

    /// Signals workers blocked in `get`.
    items: Notify,

    /// Signals tasks blocked in `closed`.
    shutdown: Notify,
}

#[derive(Debug)]
struct State<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    failures: HashMap<K, u32>,
    shutting_down: bool,
}

// === impl Backoff ===

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: time::Duration::from_millis(5),
            max: time::Duration::from_secs(1000),
        }
    }
}

impl Backoff {
    /// Returns the delay before the `failures`-th retry (1-based).
    pub fn delay(&self, failures: u32) -> time::Duration {
        let exp = failures.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exp)
            .map_or(self.max, |d| d.min(self.max))
    }
}

// === impl WorkQueue ===

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K> Default for WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    fn default() -> Self {
        Self::new(Backoff::default())
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    pub fn new(backoff: Backoff) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    failures: HashMap::new(),
                    shutting_down: false,
                }),
                backoff,
                depth: Gauge::default(),
                items: Notify::new(),
                shutdown: Notify::new(),
            }),
        }
    }

    /// Marks a key as needing processing.
    pub fn add(&self, key: K) {
        let mut state = self.inner.state.lock();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            // Queued again by `done`.
            return;
        }
        state.queue.push_back(key);
        self.inner.depth.set(state.queue.len() as i64);
        drop(state);
        self.inner.items.notify_one();
    }

    /// Adds the key after its backoff delay has elapsed, recording a failure.
    pub fn add_rate_limited(&self, key: K) {
        let delay = {
            let mut state = self.inner.state.lock();
            if state.shutting_down {
                return;
            }
            let failures = state.failures.entry(key.clone()).or_default();
            *failures += 1;
            self.inner.backoff.delay(*failures)
        };

        let queue = self.clone();
        tokio::spawn(async move {
            time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Waits for the next key to process.
    ///
    /// Returns `None` once the queue has been shut down, even if keys remain.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.inner.items.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.inner.state.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    self.inner.depth.set(state.queue.len() as i64);
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Marks processing of a key as complete, re-queueing it if it was added
    /// while it was being processed.
    pub fn done(&self, key: &K) {
        let mut state = self.inner.state.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            self.inner.depth.set(state.queue.len() as i64);
            drop(state);
            self.inner.items.notify_one();
        }
    }

    /// Clears the failure count of a key.
    pub fn forget(&self, key: &K) {
        self.inner.state.lock().failures.remove(key);
    }

    /// Returns the number of failures recorded for a key.
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.inner
            .state
            .lock()
            .failures
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Returns the number of keys waiting to be processed.
    pub fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a gauge that follows [`WorkQueue::len`] as keys are added and
    /// handed out.
    pub fn depth(&self) -> Gauge {
        self.inner.depth.clone()
    }

    /// Stops accepting new keys and handing out queued ones. Keys being
    /// processed may still be marked done.
    pub fn shut_down(&self) {
        self.inner.state.lock().shutting_down = true;
        self.inner.items.notify_waiters();
        self.inner.shutdown.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.state.lock().shutting_down
    }

    /// Completes once the queue has been shut down.
    pub async fn closed(&self) {
        loop {
            let notified = self.inner.shutdown.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_shutting_down() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready};

    #[tokio::test]
    async fn deduplicates_queued_keys() {
        let queue = WorkQueue::default();
        queue.add("p1");
        queue.add("p1");
        queue.add("p2");
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.get().await, Some("p1"));
        assert_eq!(queue.get().await, Some("p2"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn coalesces_adds_while_processing() {
        let queue = WorkQueue::default();
        queue.add("p1");
        let key = queue.get().await.unwrap();

        // Repeated adds while in flight coalesce into one pending run that is
        // not handed out until the current run completes.
        queue.add("p1");
        queue.add("p1");
        queue.add("p1");
        assert!(queue.is_empty());

        queue.done(&key);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await, Some("p1"));
        queue.done(&"p1");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn done_without_readd_drops_key() {
        let queue = WorkQueue::default();
        queue.add("p1");
        let key = queue.get().await.unwrap();
        queue.done(&key);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn get_waits_for_add() {
        let queue = WorkQueue::<&str>::default();
        let mut get = tokio_test::task::spawn(queue.get());
        assert_pending!(get.poll());

        queue.add("p1");
        assert!(get.is_woken());
        assert_eq!(assert_ready!(get.poll()), Some("p1"));
    }

    #[tokio::test]
    async fn shut_down_stops_handing_out_keys() {
        let queue = WorkQueue::default();
        queue.add("p1");
        queue.add("p2");
        let key = queue.get().await.unwrap();

        queue.shut_down();
        queue.add("p3");
        assert_eq!(queue.get().await, None);
        queue.done(&key);
        queue.closed().await;
    }

    #[tokio::test]
    async fn shut_down_wakes_waiters() {
        let queue = WorkQueue::<&str>::default();
        let mut get = tokio_test::task::spawn(queue.get());
        let mut closed = tokio_test::task::spawn(queue.closed());
        assert_pending!(get.poll());
        assert_pending!(closed.poll());

        queue.shut_down();
        assert_eq!(assert_ready!(get.poll()), None);
        assert_ready!(closed.poll());
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_adds_back_off() {
        let queue = WorkQueue::new(Backoff {
            base: time::Duration::from_secs(1),
            max: time::Duration::from_secs(3),
        });

        queue.add_rate_limited("p1");
        assert_eq!(queue.num_requeues(&"p1"), 1);
        assert!(queue.is_empty());

        time::sleep(time::Duration::from_millis(1001)).await;
        assert_eq!(queue.len(), 1);
        let key = queue.get().await.unwrap();
        queue.done(&key);

        queue.add_rate_limited("p1");
        assert_eq!(queue.num_requeues(&"p1"), 2);
        time::sleep(time::Duration::from_millis(1500)).await;
        assert!(queue.is_empty());
        time::sleep(time::Duration::from_millis(501)).await;
        assert_eq!(queue.len(), 1);

        queue.forget(&"p1");
        assert_eq!(queue.num_requeues(&"p1"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn depth_follows_queued_keys() {
        let queue = WorkQueue::new(Backoff {
            base: time::Duration::from_secs(1),
            max: time::Duration::from_secs(1),
        });
        let depth = queue.depth();
        assert_eq!(depth.get(), 0);

        queue.add("p1");
        queue.add("p2");
        assert_eq!(depth.get(), 2);

        let key = queue.get().await.unwrap();
        assert_eq!(depth.get(), 1);
        queue.add(key);
        assert_eq!(depth.get(), 1);
        queue.done(&key);
        assert_eq!(depth.get(), 2);

        assert_eq!(queue.get().await, Some("p2"));
        assert_eq!(queue.get().await, Some("p1"));
        assert_eq!(depth.get(), 0);

        queue.add_rate_limited("p3");
        assert_eq!(depth.get(), 0);
        time::sleep(time::Duration::from_millis(1001)).await;
        assert_eq!(depth.get(), 1);
    }

    #[test]
    fn backoff_doubles_up_to_max() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(1), time::Duration::from_millis(5));
        assert_eq!(backoff.delay(2), time::Duration::from_millis(10));
        assert_eq!(backoff.delay(4), time::Duration::from_millis(40));
        assert_eq!(backoff.delay(30), time::Duration::from_secs(1000));
        assert_eq!(backoff.delay(u32::MAX), time::Duration::from_secs(1000));
    }
}
