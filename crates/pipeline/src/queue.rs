//! Bounded hand-off between the coalescer and the worker pool

use crate::error::QueueFull;
use crate::event::{ChangeKind, ReadyChange};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

struct Inner {
    items: VecDeque<ReadyChange>,
    /// Paths currently in `items`; keeps one entry per path
    queued: HashSet<PathBuf>,
    /// Bumped by `wake_all` so blocked consumers return early
    wake_epoch: u64,
}

/// Capacity-bounded FIFO of ready changes
///
/// Enqueue never blocks: a full queue hands the change back so the producer
/// can retry later. Consumers block for at most their timeout.
pub struct ReadyQueue {
    inner: Mutex<Inner>,
    not_empty: Condvar,
    capacity: usize,
}

/// What happened when a change was folded into an already-queued entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuedFold {
    /// The queued entry now carries this kind
    Updated(ChangeKind),
    /// The change cancelled the queued entry, which was removed
    Cancelled,
}

impl ReadyQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity.min(1024)),
                queued: HashSet::new(),
                wake_epoch: 0,
            }),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    /// Append a change, or hand it back if the queue is at capacity
    pub fn enqueue(&self, change: ReadyChange) -> Result<(), QueueFull> {
        let mut inner = self.inner.lock();
        if inner.queued.contains(&change.path) {
            let newer = change.kind;
            Self::fold_locked(&mut inner, &change.path, |queued| queued.fold(newer), change.old_path);
            return Ok(());
        }
        if inner.items.len() >= self.capacity {
            return Err(QueueFull(change));
        }
        inner.queued.insert(change.path.clone());
        inner.items.push_back(change);
        drop(inner);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Put a previously dequeued change back at the head of the queue.
    ///
    /// Ignores capacity: the slot was already accounted for when the change
    /// was first admitted. If the path was queued again in the meantime, the
    /// requeued change is older and is folded underneath the queued one.
    pub fn requeue_front(&self, change: ReadyChange) {
        let mut inner = self.inner.lock();
        if inner.queued.contains(&change.path) {
            let older = change.kind;
            Self::fold_locked(&mut inner, &change.path, |queued| older.fold(queued), change.old_path);
            return;
        }
        inner.queued.insert(change.path.clone());
        inner.items.push_front(change);
        drop(inner);
        self.not_empty.notify_one();
    }

    /// Fold a newer kind into the queued entry for `path`.
    ///
    /// Returns `None` when `path` is not queued.
    pub fn fold_into(&self, path: &Path, kind: ChangeKind, old_path: Option<PathBuf>) -> Option<QueuedFold> {
        let mut inner = self.inner.lock();
        if !inner.queued.contains(path) {
            return None;
        }
        Some(Self::fold_locked(&mut inner, path, |queued| queued.fold(kind), old_path))
    }

    fn fold_locked(
        inner: &mut Inner,
        path: &Path,
        fold: impl FnOnce(ChangeKind) -> Option<ChangeKind>,
        old_path: Option<PathBuf>,
    ) -> QueuedFold {
        let Some(pos) = inner.items.iter().position(|c| c.path == path) else {
            // index and items disagree; trust the items
            inner.queued.remove(path);
            return QueuedFold::Cancelled;
        };

        match fold(inner.items[pos].kind) {
            Some(net) => {
                let entry = &mut inner.items[pos];
                entry.kind = net;
                if old_path.is_some() {
                    entry.old_path = old_path;
                }
                QueuedFold::Updated(net)
            }
            None => {
                inner.items.remove(pos);
                inner.queued.remove(path);
                QueuedFold::Cancelled
            }
        }
    }

    /// Take up to `max_n` changes, waiting at most `timeout` while empty
    pub fn dequeue_batch(&self, max_n: usize, timeout: Duration) -> Vec<ReadyChange> {
        // None: the timeout is too long to represent, wait until woken
        let deadline = Instant::now().checked_add(timeout);
        let mut inner = self.inner.lock();
        let epoch = inner.wake_epoch;

        while inner.items.is_empty() && inner.wake_epoch == epoch {
            match deadline {
                Some(deadline) => {
                    if self.not_empty.wait_until(&mut inner, deadline).timed_out() {
                        break;
                    }
                }
                None => self.not_empty.wait(&mut inner),
            }
        }

        let take = max_n.min(inner.items.len());
        let batch: Vec<ReadyChange> = inner.items.drain(..take).collect();
        for change in &batch {
            inner.queued.remove(&change.path);
        }
        batch
    }

    /// Wake every blocked consumer, e.g. on shutdown
    pub fn wake_all(&self) {
        self.inner.lock().wake_epoch += 1;
        self.not_empty.notify_all();
    }

    /// Drop everything queued, returning how many changes were discarded
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let dropped = inner.items.len();
        inner.items.clear();
        inner.queued.clear();
        dropped
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.inner.lock().queued.contains(path)
    }

    /// Current queue depth
    pub fn size(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn change(path: &str) -> ReadyChange {
        ReadyChange::new(path, ChangeKind::Modified)
    }

    #[test]
    fn test_fifo_order() {
        let queue = ReadyQueue::new(10);
        queue.enqueue(change("a")).unwrap();
        queue.enqueue(change("b")).unwrap();
        queue.enqueue(change("c")).unwrap();

        let batch = queue.dequeue_batch(2, Duration::ZERO);
        let paths: Vec<_> = batch.iter().map(|c| c.path.clone()).collect();
        assert_eq!(paths, vec![PathBuf::from("a"), PathBuf::from("b")]);
        assert_eq!(queue.size(), 1);
    }

    #[test]
    fn test_full_queue_hands_change_back() {
        let queue = ReadyQueue::new(2);
        queue.enqueue(change("a")).unwrap();
        queue.enqueue(change("b")).unwrap();

        let QueueFull(rejected) = queue.enqueue(change("c")).unwrap_err();
        assert_eq!(rejected.path, PathBuf::from("c"));
        assert_eq!(queue.size(), 2);
        assert!(!queue.contains(Path::new("c")));
    }

    #[test]
    fn test_duplicate_path_is_folded_not_inserted() {
        let queue = ReadyQueue::new(10);
        queue.enqueue(ReadyChange::new("a", ChangeKind::Created)).unwrap();
        queue.enqueue(ReadyChange::new("a", ChangeKind::Modified)).unwrap();
        assert_eq!(queue.size(), 1);

        let batch = queue.dequeue_batch(10, Duration::ZERO);
        assert_eq!(batch[0].kind, ChangeKind::Created);
    }

    #[test]
    fn test_fold_into_cancels_created_entry() {
        let queue = ReadyQueue::new(10);
        queue.enqueue(ReadyChange::new("a", ChangeKind::Created)).unwrap();

        assert_eq!(
            queue.fold_into(Path::new("a"), ChangeKind::Deleted, None),
            Some(QueuedFold::Cancelled)
        );
        assert!(queue.is_empty());
        assert_eq!(queue.fold_into(Path::new("a"), ChangeKind::Deleted, None), None);
    }

    #[test]
    fn test_dequeue_times_out_when_empty() {
        let queue = ReadyQueue::new(10);
        let start = Instant::now();
        let batch = queue.dequeue_batch(4, Duration::from_millis(50));
        assert!(batch.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_blocked_consumer_wakes_on_enqueue() {
        let queue = Arc::new(ReadyQueue::new(10));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.dequeue_batch(4, Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(20));
        queue.enqueue(change("a")).unwrap();

        let batch = consumer.join().unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_wake_all_releases_consumers() {
        let queue = Arc::new(ReadyQueue::new(10));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let start = Instant::now();
                let batch = queue.dequeue_batch(4, Duration::from_secs(10));
                (batch, start.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(20));
        queue.wake_all();

        let (batch, waited) = consumer.join().unwrap();
        assert!(batch.is_empty());
        assert!(waited < Duration::from_secs(5));
    }

    #[test]
    fn test_no_item_delivered_twice() {
        let queue = Arc::new(ReadyQueue::new(1_000));
        for i in 0..500 {
            queue.enqueue(change(&format!("file-{i}"))).unwrap();
        }

        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    loop {
                        let batch = queue.dequeue_batch(7, Duration::from_millis(10));
                        if batch.is_empty() {
                            return seen;
                        }
                        seen.extend(batch.into_iter().map(|c| c.path));
                    }
                })
            })
            .collect();

        let mut all: Vec<PathBuf> = consumers.into_iter().flat_map(|h| h.join().unwrap()).collect();
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(total, 500);
        assert_eq!(all.len(), 500);
    }

    #[test]
    fn test_requeue_front_folds_under_newer_entry() {
        let queue = ReadyQueue::new(10);
        queue.enqueue(ReadyChange::new("a", ChangeKind::Deleted)).unwrap();
        // an unprocessed create from before the delete cancels out
        queue.requeue_front(ReadyChange::new("a", ChangeKind::Created));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_requeue_front_ignores_capacity() {
        let queue = ReadyQueue::new(1);
        queue.enqueue(change("a")).unwrap();
        queue.requeue_front(change("b"));

        let batch = queue.dequeue_batch(10, Duration::ZERO);
        assert_eq!(batch[0].path, PathBuf::from("b"));
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_unbounded_timeout_waits_for_work() {
        let queue = Arc::new(ReadyQueue::new(10));
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                queue.enqueue(change("late")).unwrap();
            })
        };

        let batch = queue.dequeue_batch(4, Duration::MAX);
        producer.join().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].path, PathBuf::from("late"));
    }
}
