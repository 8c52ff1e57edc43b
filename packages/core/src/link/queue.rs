//! Fixed-capacity blocking FIFO shared between producer and consumer threads.
//!
//! Every successful enqueue wakes one waiting consumer and every successful
//! dequeue wakes one waiting producer. Waking unconditionally keeps several
//! waiters on the same side from missing a notification.

use crate::utils::sync::lock;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Default periodic wake-up for a blocked [`BoundedQueue::dequeue`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct BoundedQueue<T> {
    capacity: usize,
    poll_interval: Duration,
    items: Mutex<VecDeque<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> BoundedQueue<T> {
    /// `capacity` is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        Self::with_poll_interval(capacity, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(capacity: usize, poll_interval: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            poll_interval,
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        lock(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.items).is_empty()
    }

    /// Blocks while the queue is full.
    pub fn enqueue(&self, item: T) {
        let mut items = lock(&self.items);
        while items.len() >= self.capacity {
            items = self
                .not_full
                .wait(items)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        items.push_back(item);
        drop(items);
        self.not_empty.notify_one();
    }

    /// Appends without blocking; hands the item back if the queue is full.
    pub fn try_enqueue(&self, item: T) -> Result<(), T> {
        let mut items = lock(&self.items);
        if items.len() >= self.capacity {
            return Err(item);
        }
        items.push_back(item);
        drop(items);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Blocks while full for at most `timeout`; hands the item back on expiry.
    pub fn enqueue_timeout(&self, item: T, timeout: Duration) -> Result<(), T> {
        let deadline = Instant::now() + timeout;
        let mut items = lock(&self.items);
        while items.len() >= self.capacity {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(item);
            }
            items = self
                .not_full
                .wait_timeout(items, remaining)
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .0;
        }
        items.push_back(item);
        drop(items);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Blocks until an item is available, waking every `poll_interval`.
    pub fn dequeue(&self) -> T {
        let mut items = lock(&self.items);
        loop {
            if let Some(item) = items.pop_front() {
                drop(items);
                self.not_full.notify_one();
                return item;
            }
            items = self
                .not_empty
                .wait_timeout(items, self.poll_interval)
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .0;
        }
    }

    /// Like [`dequeue`](Self::dequeue) but gives up after `timeout`.
    pub fn dequeue_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut items = lock(&self.items);
        loop {
            if let Some(item) = items.pop_front() {
                drop(items);
                self.not_full.notify_one();
                return Some(item);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            items = self
                .not_empty
                .wait_timeout(items, remaining.min(self.poll_interval))
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .0;
        }
    }
}

impl<T> std::fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = BoundedQueue::new(8);
        for i in 0..5 {
            queue.enqueue(i);
        }
        let drained: Vec<i32> = (0..5).map(|_| queue.dequeue()).collect();
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_third_enqueue_blocks_until_dequeue() {
        let queue = Arc::new(BoundedQueue::new(2));
        queue.enqueue(1);
        queue.enqueue(2);
        assert_eq!(queue.len(), 2);

        let done = Arc::new(AtomicBool::new(false));
        let producer = {
            let queue = Arc::clone(&queue);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                queue.enqueue(3);
                done.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(100));
        assert!(!done.load(Ordering::SeqCst), "enqueue on a full queue must block");

        assert_eq!(queue.dequeue(), 1);
        producer.join().unwrap();
        assert!(done.load(Ordering::SeqCst));

        assert_eq!(queue.dequeue(), 2);
        assert_eq!(queue.dequeue(), 3);
    }

    #[test]
    fn test_try_enqueue_returns_item_when_full() {
        let queue = BoundedQueue::new(1);
        assert!(queue.try_enqueue("a").is_ok());
        assert_eq!(queue.try_enqueue("b"), Err("b"));
    }

    #[test]
    fn test_enqueue_timeout_gives_item_back() {
        let queue = BoundedQueue::new(1);
        queue.enqueue(1u8);
        assert_eq!(queue.enqueue_timeout(2, Duration::from_millis(30)), Err(2));
        assert_eq!(queue.dequeue(), 1);
        assert_eq!(queue.enqueue_timeout(3, Duration::from_millis(30)), Ok(()));
    }

    #[test]
    fn test_dequeue_wakes_on_enqueue() {
        let queue = Arc::new(BoundedQueue::with_poll_interval(4, Duration::from_secs(30)));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.dequeue())
        };
        thread::sleep(Duration::from_millis(50));
        queue.enqueue(42u32);
        assert_eq!(consumer.join().unwrap(), 42);
    }

    #[test]
    fn test_dequeue_timeout_on_empty() {
        let queue: BoundedQueue<u8> = BoundedQueue::new(1);
        let start = Instant::now();
        assert!(queue.dequeue_timeout(Duration::from_millis(50)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let queue = BoundedQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        queue.enqueue(());
        assert_eq!(queue.len(), 1);
    }
}
