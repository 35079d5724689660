//! A bounded, timestamp-ordered, disposable queue of [`ValueEnvelope`]s.
//!
//! Pushing blocks while the queue is at capacity; popping blocks until an
//! item is available or the queue is disposed. Dispose is idempotent and
//! wakes every blocked popper (and every blocked pusher) with
//! [`QueueError::Disposed`]. The queue is safe for concurrent pushers; the
//! engine uses exactly one popper per session (§4.2).

use gnmid_types::ValueEnvelope;
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Notify, Semaphore};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue has been disposed")]
    Disposed,
}

/// Orders envelopes by timestamp, breaking ties by insertion order so that
/// equal-timestamp items drain FIFO.
#[derive(Debug)]
struct Entry {
    seq: u64,
    envelope: ValueEnvelope,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.envelope.timestamp == other.envelope.timestamp && self.seq == other.seq
    }
}
impl Eq for Entry {}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.envelope.timestamp, self.seq).cmp(&(other.envelope.timestamp, other.seq))
    }
}

struct Inner {
    heap: Mutex<BinaryHeap<Reverse<Entry>>>,
    next_seq: AtomicU64,
    capacity: Semaphore,
    disposed: AtomicBool,
    popper_wake: Notify,
}

/// A handle to the queue, cloneable and safe to share across any number of
/// producer tasks plus the single session sender.
#[derive(Clone)]
pub struct Queue {
    inner: Arc<Inner>,
}

impl Queue {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "queue capacity must be at least 1");
        Self {
            inner: Arc::new(Inner {
                heap: Mutex::new(BinaryHeap::new()),
                next_seq: AtomicU64::new(0),
                capacity: Semaphore::new(capacity),
                disposed: AtomicBool::new(false),
                popper_wake: Notify::new(),
            }),
        }
    }

    /// Pushes an envelope, blocking while the queue is full. Returns
    /// [`QueueError::Disposed`] (discarding the item) once disposed.
    pub async fn push(&self, envelope: ValueEnvelope) -> Result<(), QueueError> {
        let permit = self
            .inner
            .capacity
            .acquire()
            .await
            .map_err(|_| QueueError::Disposed)?;
        if self.inner.disposed.load(Ordering::Acquire) {
            return Err(QueueError::Disposed);
        }
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        self.inner.heap.lock().push(Reverse(Entry { seq, envelope }));
        permit.forget();
        self.inner.popper_wake.notify_one();
        Ok(())
    }

    /// Blocks until an item is available or the queue is disposed.
    pub async fn pop(&self) -> Result<ValueEnvelope, QueueError> {
        loop {
            if let Some(Reverse(entry)) = self.inner.heap.lock().pop() {
                self.inner.capacity.add_permits(1);
                return Ok(entry.envelope);
            }
            if self.inner.disposed.load(Ordering::Acquire) {
                return Err(QueueError::Disposed);
            }
            let notified = self.inner.popper_wake.notified();
            // Re-check after registering interest to avoid missing a push that
            // landed between the first check and the await below.
            if !self.inner.heap.lock().is_empty() || self.inner.disposed.load(Ordering::Acquire) {
                continue;
            }
            notified.await;
        }
    }

    /// Idempotent. Wakes every blocked popper and pusher with
    /// [`QueueError::Disposed`]; subsequent operations also return that error.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.capacity.close();
        self.inner.popper_wake.notify_waiters();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.inner.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gnmid_types::ValueEnvelope;
    use std::time::Duration;

    #[tokio::test]
    async fn drains_in_non_decreasing_timestamp_order() {
        let q = Queue::new(8);
        q.push(ValueEnvelope::sync(30)).await.unwrap();
        q.push(ValueEnvelope::sync(10)).await.unwrap();
        q.push(ValueEnvelope::sync(20)).await.unwrap();

        let a = q.pop().await.unwrap();
        let b = q.pop().await.unwrap();
        let c = q.pop().await.unwrap();
        assert_eq!((a.timestamp, b.timestamp, c.timestamp), (10, 20, 30));
    }

    #[tokio::test]
    async fn equal_timestamps_drain_fifo() {
        let q = Queue::new(8);
        q.push(ValueEnvelope::fatal(5, "first")).await.unwrap();
        q.push(ValueEnvelope::fatal(5, "second")).await.unwrap();

        let a = q.pop().await.unwrap();
        let b = q.pop().await.unwrap();
        assert!(matches!(a.payload, gnmid_types::Payload::Fatal(ref s) if s == "first"));
        assert!(matches!(b.payload, gnmid_types::Payload::Fatal(ref s) if s == "second"));
    }

    #[tokio::test]
    async fn dispose_is_idempotent_and_wakes_poppers() {
        let q = Queue::new(4);
        let q2 = q.clone();
        let popper = tokio::spawn(async move { q2.pop().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        q.dispose();
        q.dispose();

        let result = popper.await.unwrap();
        assert_eq!(result, Err(QueueError::Disposed));
        assert_eq!(q.push(ValueEnvelope::sync(1)).await, Err(QueueError::Disposed));
    }

    #[tokio::test]
    async fn push_blocks_at_capacity_until_pop_frees_a_slot() {
        let q = Queue::new(1);
        q.push(ValueEnvelope::sync(1)).await.unwrap();

        let q2 = q.clone();
        let blocked = tokio::spawn(async move { q2.push(ValueEnvelope::sync(2)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!blocked.is_finished());

        q.pop().await.unwrap();
        blocked.await.unwrap().unwrap();
        assert_eq!(q.len(), 1);
    }
}
