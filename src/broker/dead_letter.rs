//! Bounded dead-letter buffer: the observability sink for every
//! unrecoverable per-message failure (§7).

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

use super::domain_types::{DeadLetterCapacity, MessageTimestamp};
use super::message::Message;

/// Why a message was dead-lettered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeadLetterReason {
    /// The queue had no room for the message (§4.4, §7 `QUEUE_FULL`).
    QueueFull,
    /// The message's TTL elapsed before dispatch (§4.6 step 1, §7 `EXPIRED`).
    Expired,
    /// A handler failed and the message was not retry-eligible, or retries
    /// were exhausted (§4.6 step 3d, §7 `HANDLER_ERROR`).
    HandlerError(String),
}

/// A single retained dead-letter entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// The message that could not be delivered.
    pub message: Message,
    /// Why it was dead-lettered.
    pub reason: DeadLetterReason,
    /// When it was dead-lettered.
    pub recorded_at: MessageTimestamp,
}

/// Bounded FIFO buffer of dead-lettered messages; oldest entries are
/// evicted once `capacity` is exceeded.
pub struct DeadLetterQueue {
    entries: Mutex<VecDeque<DeadLetterEntry>>,
    capacity: DeadLetterCapacity,
}

impl DeadLetterQueue {
    /// Builds an empty buffer bounded at `capacity`.
    #[must_use]
    pub fn new(capacity: DeadLetterCapacity) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.as_usize().min(1024))),
            capacity,
        }
    }

    /// Records a dead-lettered message, evicting the oldest entry if full.
    pub fn record(&self, message: Message, reason: DeadLetterReason) {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= self.capacity.as_usize() {
            entries.pop_front();
        }
        entries.push_back(DeadLetterEntry {
            message,
            reason,
            recorded_at: MessageTimestamp::now(),
        });
    }

    /// Snapshot of every retained entry, oldest first.
    #[must_use]
    pub fn list(&self) -> Vec<DeadLetterEntry> {
        self.entries.lock().unwrap().iter().cloned().collect()
    }

    /// Discards every retained entry.
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    /// Current number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Whether the buffer currently holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}
