//! Delivery engine (C6): resolves recipients, invokes handlers, applies
//! retry and dead-letter policy, and correlates responses (§4.6).

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::config::BrokerConfig;
use super::correlator::RequestCorrelator;
use super::dead_letter::{DeadLetterQueue, DeadLetterReason};
use super::domain_types::AgentId;
use super::message::{Message, MessageType};
use super::queue::{PriorityQueue, PutOutcome};
use super::registry::AgentRegistry;
use super::stats::StatsCounters;

/// Coordinates per-recipient delivery for messages dequeued by a worker.
pub struct DeliveryEngine {
    registry: Arc<AgentRegistry>,
    queue: Arc<PriorityQueue>,
    correlator: Arc<RequestCorrelator>,
    dead_letters: Arc<DeadLetterQueue>,
    stats: Arc<StatsCounters>,
    config: Arc<BrokerConfig>,
}

impl DeliveryEngine {
    /// Builds a delivery engine wired to the broker's shared components.
    #[must_use]
    pub fn new(
        registry: Arc<AgentRegistry>,
        queue: Arc<PriorityQueue>,
        correlator: Arc<RequestCorrelator>,
        dead_letters: Arc<DeadLetterQueue>,
        stats: Arc<StatsCounters>,
        config: Arc<BrokerConfig>,
    ) -> Self {
        Self {
            registry,
            queue,
            correlator,
            dead_letters,
            stats,
            config,
        }
    }

    /// Runs the full delivery algorithm for one dequeued message (§4.6).
    /// Returns the number of recipient deliveries that failed (caught
    /// handler panics), so the dispatching worker can fold it into its own
    /// per-worker error count (§4.8).
    pub async fn dispatch(&self, message: Message) -> u64 {
        if message.is_expired() {
            debug!(message_id = %message.metadata.message_id, "message expired before dispatch");
            self.stats.record_expired();
            self.dead_letters.record(message, DeadLetterReason::Expired);
            return 0;
        }

        let recipients = self.resolve_recipients(&message);
        let mut errors = 0;
        for recipient in recipients {
            if !self.deliver_to(&message, &recipient).await {
                errors += 1;
            }
        }

        if message.is_response() {
            self.correlator.resolve(&message);
        }

        errors
    }

    /// §4.6 step 2: empty recipients means every currently registered agent.
    fn resolve_recipients(&self, message: &Message) -> Vec<AgentId> {
        if message.is_broadcast() {
            self.registry.list_all().into_iter().map(|identity| identity.agent_id).collect()
        } else {
            message.recipients.clone()
        }
    }

    /// §4.6 step 3: one recipient's handler call, including the
    /// retry/dead-letter decision on failure.
    ///
    /// A handler failure surfaces as a Rust panic inside the handler
    /// closure (the closest analogue of the original's caught exception,
    /// since [`super::handler::Handler`] has no `Result`-returning variant);
    /// running the call on its own task lets us catch that panic via
    /// [`tokio::task::JoinError`] instead of taking the whole worker down.
    async fn deliver_to(&self, message: &Message, recipient: &AgentId) -> bool {
        let Some(registered) = self.registry.lookup(recipient) else {
            warn!(agent_id = %recipient, "skipping delivery to unknown agent");
            return true;
        };

        let handler = registered.handler.clone();
        let call_message = message.clone();
        let outcome = tokio::spawn(async move { handler.call(call_message).await }).await;

        match outcome {
            Ok(result) => {
                self.stats.record_delivered();
                if message.is_request() {
                    if let Some(payload) = result {
                        let response = message.create_response(registered.identity, payload);
                        if self.queue.put(response, Duration::from_secs(1)).await == PutOutcome::QueueFull
                        {
                            warn!(message_id = %message.metadata.message_id, "failed to enqueue synthesised response: queue full");
                        }
                    }
                }
                true
            }
            Err(join_error) => {
                // retry only this recipient: the message clone carries a
                // single-recipient list so a retried delivery cannot
                // re-deliver to recipients that already succeeded.
                let mut retry_target = message.clone();
                retry_target.recipients = vec![recipient.clone()];
                self.handle_failure(retry_target, join_error.to_string()).await;
                false
            }
        }
    }

    /// Applies §4.6 step 3d: retry or dead-letter a failed delivery.
    pub async fn handle_failure(&self, message: Message, reason: String) {
        self.stats.record_failed();
        let priority = message.metadata.priority;
        let retry_count = message.metadata.retry_count;

        if priority.retry_eligible() && retry_count.into_inner() < self.config.retry_max_attempts.as_u8() {
            let mut retried = message;
            retried.metadata.retry_count = retried.metadata.retry_count.incremented();
            self.stats.record_retried();
            if self.queue.put(retried, Duration::from_secs(1)).await == PutOutcome::QueueFull {
                warn!("failed to re-enqueue retried message: queue full");
            }
        } else {
            self.dead_letters.record(message, DeadLetterReason::HandlerError(reason));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::domain_types::{AgentName, AgentType, QueueCapacity, TtlSeconds};
    use crate::broker::handler::Handler;
    use crate::broker::message::{AgentIdentity, MessagePriority};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn identity(id: &str) -> AgentIdentity {
        AgentIdentity::new(
            AgentId::try_new(id).unwrap(),
            AgentType::try_new("t").unwrap(),
            AgentName::try_new(id).unwrap(),
            HashSet::new(),
        )
    }

    fn engine() -> (DeliveryEngine, Arc<AgentRegistry>, Arc<PriorityQueue>, Arc<DeadLetterQueue>) {
        let registry = Arc::new(AgentRegistry::new());
        let queue = Arc::new(PriorityQueue::new(QueueCapacity::try_new(10).unwrap()));
        let correlator = Arc::new(RequestCorrelator::new());
        let dead_letters = Arc::new(DeadLetterQueue::new(
            crate::broker::domain_types::DeadLetterCapacity::try_new(10).unwrap(),
        ));
        let stats = Arc::new(StatsCounters::new());
        let config = Arc::new(BrokerConfig::testing());
        let engine = DeliveryEngine::new(
            registry.clone(),
            queue.clone(),
            correlator,
            dead_letters.clone(),
            stats,
            config,
        );
        (engine, registry, queue, dead_letters)
    }

    #[tokio::test]
    async fn expired_message_is_dead_lettered_not_delivered() {
        let (engine, registry, _queue, dead_letters) = engine();
        let called = Arc::new(AtomicUsize::new(0));
        let called_clone = called.clone();
        registry.register(
            identity("b"),
            Handler::sync(move |_msg| {
                called_clone.fetch_add(1, Ordering::SeqCst);
                None
            }),
        );

        let mut message = Message::new_broadcast(
            identity("a"),
            serde_json::json!({}),
            MessagePriority::Normal,
            TtlSeconds::try_new(0).unwrap(),
        );
        message.metadata.created_at = crate::broker::domain_types::MessageTimestamp::new(0);

        engine.dispatch(message).await;
        assert_eq!(called.load(Ordering::SeqCst), 0);
        assert_eq!(dead_letters.len(), 1);
    }

    #[tokio::test]
    async fn request_handler_result_synthesises_response() {
        let (engine, registry, queue, _dead_letters) = engine();
        registry.register(
            identity("b"),
            Handler::sync(|_msg| Some(serde_json::json!({"answer": 42}))),
        );

        let request = Message::new_request(
            identity("a"),
            vec![AgentId::try_new("b").unwrap()],
            serde_json::json!({}),
            MessagePriority::Normal,
            TtlSeconds::default(),
        );
        engine.dispatch(request).await;

        let response = queue.get().await.unwrap();
        assert!(response.is_response());
        assert_eq!(response.payload["answer"], 42);
        assert_eq!(response.recipients, vec![AgentId::try_new("a").unwrap()]);
    }

    #[tokio::test]
    async fn unknown_recipient_is_skipped_not_fatal() {
        let (engine, _registry, _queue, dead_letters) = engine();
        let message = Message::new_broadcast(
            identity("a"),
            serde_json::json!({}),
            MessagePriority::Normal,
            TtlSeconds::default(),
        );
        let mut targeted = message;
        targeted.recipients = vec![AgentId::try_new("ghost").unwrap()];
        engine.dispatch(targeted).await;
        assert!(dead_letters.is_empty());
    }

    #[tokio::test]
    async fn panicking_handler_is_caught_and_retried_only_for_that_recipient() {
        let (engine, registry, queue, dead_letters) = engine();
        registry.register(identity("b"), Handler::sync(|_msg| panic!("boom")));
        registry.register(identity("c"), Handler::sync(|_msg| None));

        let message = Message::new_request(
            identity("a"),
            vec![AgentId::try_new("b").unwrap(), AgentId::try_new("c").unwrap()],
            serde_json::json!({}),
            MessagePriority::Critical,
            TtlSeconds::default(),
        );
        engine.dispatch(message).await;

        assert!(dead_letters.is_empty());
        let retried = queue.get().await.unwrap();
        assert_eq!(retried.recipients, vec![AgentId::try_new("b").unwrap()]);
        assert_eq!(retried.metadata.retry_count.into_inner(), 1);
    }

    #[tokio::test]
    async fn high_priority_failure_is_retried_before_dead_lettering() {
        let (engine, _registry, queue, dead_letters) = engine();
        let message = Message::new_broadcast(
            identity("a"),
            serde_json::json!({}),
            MessagePriority::High,
            TtlSeconds::default(),
        );
        engine.handle_failure(message, "boom".to_string()).await;
        assert!(dead_letters.is_empty());
        let retried = queue.get().await.unwrap();
        assert_eq!(retried.metadata.retry_count.into_inner(), 1);
    }

    #[tokio::test]
    async fn low_priority_failure_dead_letters_immediately() {
        let (engine, _registry, _queue, dead_letters) = engine();
        let message = Message::new_broadcast(
            identity("a"),
            serde_json::json!({}),
            MessagePriority::Low,
            TtlSeconds::default(),
        );
        engine.handle_failure(message, "boom".to_string()).await;
        assert_eq!(dead_letters.len(), 1);
    }
}
