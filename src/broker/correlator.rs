//! Request correlator (C7): a pending-request table keyed by
//! `correlation_id`, resolved at most once even under genuine parallelism
//! (§4.6 step 4, §4.7).

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;

use super::domain_types::MessageId;
use super::message::Message;
use crate::time_provider::SharedTimeProvider;

/// Tracks in-flight requests awaiting a correlated response.
pub struct RequestCorrelator {
    pending: DashMap<MessageId, oneshot::Sender<Message>>,
    timeouts: AtomicU64,
}

impl RequestCorrelator {
    /// Builds an empty correlator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            timeouts: AtomicU64::new(0),
        }
    }

    /// Registers a new pending request and returns the receiving half of
    /// its completion handle.
    pub fn register(&self, correlation_id: MessageId) -> oneshot::Receiver<Message> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(correlation_id, tx);
        rx
    }

    /// Removes a pending entry without resolving it, e.g. after a failed
    /// enqueue (§4.7 step 4).
    pub fn forget(&self, correlation_id: &MessageId) {
        self.pending.remove(correlation_id);
    }

    /// Resolves the pending entry for `response`'s `correlation_id`, if one
    /// still exists. A no-op if the entry was already resolved or timed
    /// out — first writer wins (§4.6 step 4, §4.6 tie-break note).
    ///
    /// Uses `DashMap::remove` to make "check, take, resolve" one atomic
    /// step, since workers genuinely race here unlike the original's
    /// single-threaded event loop.
    pub fn resolve(&self, response: &Message) {
        if let Some((_, sender)) = self.pending.remove(&response.metadata.correlation_id) {
            let _ = sender.send(response.clone());
        }
    }

    /// Waits for `rx` to resolve within `timeout`, racing it against
    /// `time.sleep(timeout)` rather than `tokio::time::timeout` directly so
    /// that tests using [`crate::time_provider::MockTimeProvider`] see the
    /// deadline collapse instantly instead of waiting out a real timeout.
    /// On timeout, removes the entry (if still present) and bumps the
    /// timeout counter.
    pub async fn await_response(
        &self,
        correlation_id: MessageId,
        rx: oneshot::Receiver<Message>,
        timeout: Duration,
        time: &SharedTimeProvider,
    ) -> Option<Message> {
        tokio::select! {
            result = rx => match result {
                Ok(response) => Some(response),
                Err(_) => None, // sender dropped: broker shutdown cancellation
            },
            () = time.sleep(timeout) => {
                self.pending.remove(&correlation_id);
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Number of requests that timed out waiting for a response.
    #[must_use]
    pub fn timeout_count(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    /// Number of requests currently awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drops every pending sender, cancelling all in-flight requests
    /// (§4.5 graceful shutdown, §4.7 cancellation).
    pub fn cancel_all(&self) {
        self.pending.clear();
    }
}

impl Default for RequestCorrelator {
    fn default() -> Self {
        Self::new()
    }
}
