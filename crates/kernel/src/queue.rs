//! Keyed mutual-exclusion queue.
//!
//! Work scheduled under the same key runs one task at a time, in the order
//! it was scheduled. Different keys run concurrently. Waiting tasks of a
//! key can be cancelled before they start.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("task for '{key}' was cancelled before it started")]
    Cancelled { key: String },
}

#[derive(Debug, Default)]
struct Lane {
    /// FIFO fair lock: waiters acquire in request order.
    lock: Mutex<()>,
    /// Bumped by `cancel`; waiters from an older epoch give up.
    epoch: AtomicU64,
    running: AtomicBool,
    /// Scheduled tasks holding a reference, running or waiting.
    users: AtomicUsize,
}

/// A scheduled task's hold on its lane; the last one out removes it.
struct LaneUser<'q> {
    queue: &'q KeyedQueue,
    key: &'q str,
    lane: Arc<Lane>,
}

impl Drop for LaneUser<'_> {
    fn drop(&mut self) {
        if self.lane.users.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.queue
                .lanes
                .remove_if(self.key, |_, lane| lane.users.load(Ordering::SeqCst) == 0);
        }
    }
}

struct RunningFlag<'a>(&'a Lane);

impl<'a> RunningFlag<'a> {
    fn set(lane: &'a Lane) -> Self {
        lane.running.store(true, Ordering::SeqCst);
        Self(lane)
    }
}

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::SeqCst);
    }
}

/// Named mutual exclusion for async tasks.
#[derive(Debug, Default)]
pub struct KeyedQueue {
    lanes: DashMap<String, Arc<Lane>>,
}

impl KeyedQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` once every earlier task scheduled under `key` finished.
    ///
    /// Dropping the returned future, while waiting or while running,
    /// releases the key like a normal completion.
    pub async fn schedule<F, T>(&self, key: &str, task: F) -> Result<T, QueueError>
    where
        F: Future<Output = T>,
    {
        let user = self.join(key);
        let epoch = user.lane.epoch.load(Ordering::SeqCst);

        let _guard = user.lane.lock.lock().await;
        if user.lane.epoch.load(Ordering::SeqCst) != epoch {
            debug!(key, "queued task cancelled");
            return Err(QueueError::Cancelled {
                key: key.to_string(),
            });
        }
        let _running = RunningFlag::set(&user.lane);
        Ok(task.await)
    }

    fn join<'q>(&'q self, key: &'q str) -> LaneUser<'q> {
        let entry = self.lanes.entry(key.to_string()).or_default();
        // Registered while the shard is locked, so cleanup cannot remove a
        // lane someone is about to use.
        entry.users.fetch_add(1, Ordering::SeqCst);
        LaneUser {
            queue: self,
            key,
            lane: Arc::clone(entry.value()),
        }
    }

    /// Whether a task for `key` is running right now.
    pub fn is_running(&self, key: &str) -> bool {
        self.lanes
            .get(key)
            .is_some_and(|lane| lane.running.load(Ordering::SeqCst))
    }

    /// Cancel every task waiting under `key`. A task that already started
    /// runs to completion.
    pub fn cancel(&self, key: &str) {
        if let Some(lane) = self.lanes.get(key) {
            lane.epoch.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Number of keys with scheduled work.
    pub fn active_keys(&self) -> usize {
        self.lanes.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn same_key_runs_in_order() {
        let queue = Arc::new(KeyedQueue::new());
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..5 {
            let queue = Arc::clone(&queue);
            let log = Arc::clone(&log);
            handles.push(tokio::spawn(async move {
                queue
                    .schedule("org-1", async move {
                        log.lock().push(format!("start {i}"));
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        log.lock().push(format!("end {i}"));
                    })
                    .await
            }));
            // Let the task register before the next one is spawned.
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let log = log.lock();
        let expected: Vec<String> = (0..5)
            .flat_map(|i| [format!("start {i}"), format!("end {i}")])
            .collect();
        assert_eq!(*log, expected);
        assert_eq!(queue.active_keys(), 0);
    }

    #[tokio::test]
    async fn different_keys_run_concurrently() {
        let queue = Arc::new(KeyedQueue::new());
        let (tx, rx) = oneshot::channel::<()>();

        let waiting = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.schedule("a", async move { rx.await.is_ok() }).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(queue.is_running("a"));

        // Would deadlock if "b" waited for "a".
        let other = queue.schedule("b", async { 42 }).await.unwrap();
        assert_eq!(other, 42);

        tx.send(()).unwrap();
        assert!(waiting.await.unwrap().unwrap());
        assert!(!queue.is_running("a"));
    }

    #[tokio::test]
    async fn cancel_drops_waiting_tasks_only() {
        let queue = Arc::new(KeyedQueue::new());
        let (tx, rx) = oneshot::channel::<()>();

        let first = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.schedule("k", async move { rx.await.is_ok() }).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.schedule("k", async { 2 }).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;

        queue.cancel("k");
        tx.send(()).unwrap();

        assert!(first.await.unwrap().unwrap());
        assert_eq!(
            second.await.unwrap(),
            Err(QueueError::Cancelled {
                key: "k".to_string()
            })
        );

        // New work after a cancel runs normally.
        assert_eq!(queue.schedule("k", async { 3 }).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn dropped_tasks_release_their_key() {
        let queue = KeyedQueue::new();

        // Dropped while running.
        let timed_out = tokio::time::timeout(
            Duration::from_millis(10),
            queue.schedule("k", std::future::pending::<()>()),
        )
        .await;
        assert!(timed_out.is_err());
        assert!(!queue.is_running("k"));
        assert_eq!(queue.active_keys(), 0);

        // Dropped while waiting behind another task.
        let (tx, rx) = oneshot::channel::<()>();
        let first = queue.schedule("k", async move { rx.await.is_ok() });
        tokio::pin!(first);
        assert!(
            tokio::time::timeout(Duration::from_millis(5), &mut first)
                .await
                .is_err()
        );
        let waiting =
            tokio::time::timeout(Duration::from_millis(5), queue.schedule("k", async { 2 })).await;
        assert!(waiting.is_err());
        assert!(queue.is_running("k"));

        tx.send(()).unwrap();
        assert!(first.await.unwrap());
        assert!(!queue.is_running("k"));
        assert_eq!(queue.active_keys(), 0);
    }

    #[tokio::test]
    async fn panicking_tasks_release_their_key() {
        let queue = Arc::new(KeyedQueue::new());
        let panicked = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                queue
                    .schedule("k", async {
                        if queue.active_keys() > 0 {
                            panic!("task failed");
                        }
                    })
                    .await
            })
        };
        assert!(panicked.await.is_err());
        assert!(!queue.is_running("k"));
        assert_eq!(queue.active_keys(), 0);
        assert_eq!(queue.schedule("k", async { 1 }).await.unwrap(), 1);
    }
}
