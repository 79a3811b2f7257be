//! Priority queue (C4): bounded, priority-ordered intake with FIFO
//! tie-breaking by insertion order, the way `message_router/router.rs`
//! pairs a `tokio::sync::Mutex`-guarded structure with a `Semaphore` for
//! bounded backpressure and a `Notify` to wake waiting consumers.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify, Semaphore};

use super::domain_types::QueueCapacity;
use super::message::Message;

/// A queued message paired with the monotonic insertion counter used to
/// break priority ties in FIFO order (§4.4 — not `message_id`, which has no
/// ordering relationship to insertion order).
struct QueueEntry {
    message: Message,
    sequence: u64,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.message.metadata.priority == other.message.metadata.priority
            && self.sequence == other.sequence
    }
}
impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.message
            .metadata
            .priority
            .cmp(&other.message.metadata.priority)
            // BinaryHeap is a max-heap; reverse sequence so the *earlier*
            // insertion compares greater within equal priority (FIFO).
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Outcome of a bounded `put`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The message was enqueued.
    Enqueued,
    /// The queue was at capacity; the caller must dead-letter the message.
    QueueFull,
}

/// Bounded priority queue shared across the worker pool.
pub struct PriorityQueue {
    heap: Mutex<BinaryHeap<QueueEntry>>,
    capacity: Semaphore,
    max_capacity: QueueCapacity,
    sequence: AtomicU64,
    not_empty: Notify,
    closed: std::sync::atomic::AtomicBool,
}

impl PriorityQueue {
    /// Builds an empty queue bounded at `capacity`.
    #[must_use]
    pub fn new(capacity: QueueCapacity) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            capacity: Semaphore::new(capacity.as_usize()),
            max_capacity: capacity,
            sequence: AtomicU64::new(0),
            not_empty: Notify::new(),
            closed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Attempts to enqueue `message`, waiting up to `deadline` for room.
    /// Returns [`PutOutcome::QueueFull`] if no room frees up in time.
    pub async fn put(&self, message: Message, deadline: Duration) -> PutOutcome {
        let permit = match tokio::time::timeout(deadline, self.capacity.acquire()).await {
            Ok(Ok(permit)) => permit,
            _ => return PutOutcome::QueueFull,
        };
        permit.forget();

        let sequence = self.sequence.fetch_add(1, AtomicOrdering::Relaxed);
        self.heap.lock().await.push(QueueEntry { message, sequence });
        self.not_empty.notify_one();
        PutOutcome::Enqueued
    }

    /// Blocks until a message is available or the queue is closed, in
    /// which case it returns `None`.
    pub async fn get(&self) -> Option<Message> {
        loop {
            {
                let mut heap = self.heap.lock().await;
                if let Some(entry) = heap.pop() {
                    drop(heap);
                    self.capacity.add_permits(1);
                    return Some(entry.message);
                }
            }
            if self.closed.load(AtomicOrdering::Acquire) {
                return None;
            }
            self.not_empty.notified().await;
        }
    }

    /// Drains up to `batch_size` ready messages, waiting at most
    /// `batch_timeout` after the first message for more to arrive (§4.5).
    pub async fn get_batch(&self, batch_size: usize, batch_timeout: Duration) -> Vec<Message> {
        let mut batch = Vec::with_capacity(batch_size);
        let Some(first) = self.get().await else {
            return batch;
        };
        batch.push(first);

        let deadline = tokio::time::Instant::now() + batch_timeout;
        while batch.len() < batch_size {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            let mut heap = self.heap.lock().await;
            if let Some(entry) = heap.pop() {
                drop(heap);
                self.capacity.add_permits(1);
                batch.push(entry.message);
            } else {
                break;
            }
        }
        batch
    }

    /// Signals shutdown: all blocked and future `get`/`get_batch` calls
    /// return promptly once the queue drains.
    pub fn close(&self) {
        self.closed.store(true, AtomicOrdering::Release);
        self.not_empty.notify_waiters();
    }

    /// Current number of queued messages.
    pub async fn len(&self) -> usize {
        self.heap.lock().await.len()
    }

    /// Whether the queue currently holds no messages.
    pub async fn is_empty(&self) -> bool {
        self.heap.lock().await.is_empty()
    }

    /// Configured maximum capacity, for `queue_utilization` reporting.
    #[must_use]
    pub fn max_capacity(&self) -> QueueCapacity {
        self.max_capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::domain_types::{AgentId, AgentName, AgentType, TtlSeconds};
    use crate::broker::message::{AgentIdentity, MessagePriority};
    use std::collections::HashSet;

    fn message(priority: MessagePriority) -> Message {
        let identity = AgentIdentity::new(
            AgentId::try_new("a").unwrap(),
            AgentType::try_new("t").unwrap(),
            AgentName::try_new("A").unwrap(),
            HashSet::new(),
        );
        Message::new_broadcast(identity, serde_json::json!({}), priority, TtlSeconds::default())
    }

    #[tokio::test]
    async fn higher_priority_dequeues_first() {
        let queue = PriorityQueue::new(QueueCapacity::try_new(10).unwrap());
        queue.put(message(MessagePriority::Low), Duration::from_secs(1)).await;
        queue.put(message(MessagePriority::Critical), Duration::from_secs(1)).await;
        queue.put(message(MessagePriority::Normal), Duration::from_secs(1)).await;

        let first = queue.get().await.unwrap();
        assert_eq!(first.metadata.priority, MessagePriority::Critical);
        let second = queue.get().await.unwrap();
        assert_eq!(second.metadata.priority, MessagePriority::Normal);
        let third = queue.get().await.unwrap();
        assert_eq!(third.metadata.priority, MessagePriority::Low);
    }

    #[tokio::test]
    async fn equal_priority_is_fifo_by_insertion_order() {
        let queue = PriorityQueue::new(QueueCapacity::try_new(10).unwrap());
        for i in 0..5 {
            let mut msg = message(MessagePriority::Normal);
            msg.payload = serde_json::json!({"i": i});
            queue.put(msg, Duration::from_secs(1)).await;
        }
        for i in 0..5 {
            let msg = queue.get().await.unwrap();
            assert_eq!(msg.payload["i"], i);
        }
    }

    #[tokio::test]
    async fn put_fails_fast_when_queue_is_full() {
        let queue = PriorityQueue::new(QueueCapacity::try_new(1).unwrap());
        assert_eq!(
            queue.put(message(MessagePriority::Normal), Duration::from_millis(50)).await,
            PutOutcome::Enqueued
        );
        assert_eq!(
            queue.put(message(MessagePriority::Normal), Duration::from_millis(50)).await,
            PutOutcome::QueueFull
        );
    }

    #[tokio::test]
    async fn get_returns_none_after_close_once_drained() {
        let queue = PriorityQueue::new(QueueCapacity::try_new(10).unwrap());
        queue.close();
        assert!(queue.get().await.is_none());
    }

    #[tokio::test]
    async fn get_batch_respects_batch_size() {
        let queue = PriorityQueue::new(QueueCapacity::try_new(10).unwrap());
        for _ in 0..5 {
            queue.put(message(MessagePriority::Normal), Duration::from_secs(1)).await;
        }
        let batch = queue.get_batch(3, Duration::from_millis(20)).await;
        assert_eq!(batch.len(), 3);
    }
}
