//! The broker itself: composes C2–C8 behind the public API §6 describes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::config::BrokerConfig;
use super::correlator::RequestCorrelator;
use super::dead_letter::{DeadLetterEntry, DeadLetterQueue, DeadLetterReason};
use super::delivery::DeliveryEngine;
use super::domain_types::{AgentId, AgentType, Capability, MessageId, Topic};
use super::error::BrokerError;
use super::handler::Handler;
use super::message::{AgentIdentity, Message, MessagePriority};
use super::queue::{PriorityQueue, PutOutcome};
use super::registry::AgentRegistry;
use super::stats::{BrokerStats, ConfigSummary};
use super::subscriptions::SubscriptionRegistry;
use super::worker_pool::WorkerPool;
use crate::time_provider::SharedTimeProvider;

/// The agent message broker (§2, §6).
///
/// Owns the priority queue, the agent and subscription registries, the
/// pending-request table, the dead-letter buffer, and the worker pool. An
/// agent never talks to these directly; it goes through
/// [`crate::mixin::CommunicationMixin`] instead.
pub struct Broker {
    config: Arc<BrokerConfig>,
    registry: Arc<AgentRegistry>,
    subscriptions: Arc<SubscriptionRegistry>,
    queue: Arc<PriorityQueue>,
    correlator: Arc<RequestCorrelator>,
    dead_letters: Arc<DeadLetterQueue>,
    stats: Arc<super::stats::StatsCounters>,
    worker_pool: WorkerPool,
    time: SharedTimeProvider,
    started_at: std::sync::atomic::AtomicU64,
    running: AtomicBool,
}

impl Broker {
    /// Builds a broker from `config`, not yet started.
    #[must_use]
    pub fn new(config: BrokerConfig, time: SharedTimeProvider) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(AgentRegistry::new());
        let queue = Arc::new(PriorityQueue::new(config.max_queue_size));
        let correlator = Arc::new(RequestCorrelator::new());
        let dead_letters = Arc::new(DeadLetterQueue::new(config.dead_letter_capacity));
        let stats = Arc::new(super::stats::StatsCounters::new());

        let delivery = Arc::new(DeliveryEngine::new(
            registry.clone(),
            queue.clone(),
            correlator.clone(),
            dead_letters.clone(),
            stats.clone(),
            config.clone(),
        ));
        let worker_pool = WorkerPool::new(queue.clone(), delivery, config.clone(), stats.clone());

        Self {
            config,
            registry,
            subscriptions: Arc::new(SubscriptionRegistry::new()),
            queue,
            correlator,
            dead_letters,
            stats,
            worker_pool,
            time,
            started_at: std::sync::atomic::AtomicU64::new(0),
            running: AtomicBool::new(false),
        }
    }

    /// Starts the worker pool. Idempotent: a second call while already
    /// running warns and returns without spawning another pool's worth of
    /// tasks (§4.10).
    pub async fn start(&self) {
        if self.running.load(Ordering::Acquire) {
            warn!("broker already running, ignoring start()");
            return;
        }
        self.started_at.store(now_secs(), Ordering::Relaxed);
        self.worker_pool.start().await;
        self.running.store(true, Ordering::Release);
        info!(num_workers = self.config.num_workers.as_usize(), "broker started");
    }

    /// Stops the broker: closes the queue, drains workers within the
    /// configured grace window, and cancels pending requests.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.worker_pool.stop().await;
        self.correlator.cancel_all();
        info!("broker stopped");
    }

    /// Whether the broker is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Registers `identity` with `handler` (§4.2).
    #[instrument(skip(self, handler), fields(agent_id = %identity.agent_id))]
    pub fn register_agent(&self, identity: AgentIdentity, handler: Handler) {
        self.registry.register(identity, handler);
    }

    /// Unregisters an agent and drops its subscriptions atomically (§4.3).
    pub fn unregister_agent(&self, agent_id: &AgentId) {
        self.registry.unregister(agent_id);
        self.subscriptions.remove_agent(agent_id);
    }

    /// Looks up a registered agent's identity.
    #[must_use]
    pub fn lookup_agent(&self, agent_id: &AgentId) -> Option<AgentIdentity> {
        self.registry.lookup(agent_id).map(|entry| entry.identity)
    }

    /// Agents of a given type.
    #[must_use]
    pub fn agents_by_type(&self, agent_type: &AgentType) -> Vec<AgentId> {
        self.registry.by_type(agent_type)
    }

    /// Agents advertising a given capability.
    #[must_use]
    pub fn agents_by_capability(&self, capability: &Capability) -> Vec<AgentId> {
        self.registry.by_capability(capability)
    }

    /// Subscribes `agent_id` to `topic`. Fails with [`BrokerError::UnknownAgent`]
    /// if the agent is not registered (§4.3).
    pub fn subscribe(&self, agent_id: &AgentId, topic: Topic) -> Result<(), BrokerError> {
        if !self.registry.is_registered(agent_id) {
            return Err(BrokerError::UnknownAgent { agent_id: agent_id.clone() });
        }
        self.subscriptions.subscribe(agent_id, topic);
        Ok(())
    }

    /// Unsubscribes `agent_id` from `topic`. Idempotent.
    pub fn unsubscribe(&self, agent_id: &AgentId, topic: &Topic) {
        self.subscriptions.unsubscribe(agent_id, topic);
    }

    /// Current subscribers of `topic`.
    #[must_use]
    pub fn subscribers(&self, topic: &Topic) -> std::collections::HashSet<AgentId> {
        self.subscriptions.subscribers(topic)
    }

    /// Enqueues `message` for dispatch. Returns `false` and records a
    /// `queue_full` dead-letter entry if the queue has no room (§7).
    #[instrument(skip(self, message), fields(message_id = %message.metadata.message_id))]
    pub async fn send_message(&self, message: Message) -> bool {
        self.stats.record_sent();
        match self.queue.put(message.clone(), Duration::from_secs(1)).await {
            PutOutcome::Enqueued => true,
            PutOutcome::QueueFull => {
                warn!("queue full, dead-lettering");
                self.stats.record_failed();
                self.dead_letters.record(message, DeadLetterReason::QueueFull);
                false
            }
        }
    }

    /// Sends a REQUEST and awaits its correlated RESPONSE within `timeout`
    /// (§4.7). Returns `None` on timeout, enqueue failure, or a non-REQUEST
    /// message.
    pub async fn send_request(&self, message: Message, timeout: Duration) -> Result<Option<Message>, BrokerError> {
        if !message.is_request() {
            return Err(BrokerError::InvalidMessageType);
        }

        let correlation_id: MessageId = message.metadata.correlation_id;
        let rx = self.correlator.register(correlation_id);

        if !self.send_message(message).await {
            self.correlator.forget(&correlation_id);
            return Ok(None);
        }

        Ok(self.correlator.await_response(correlation_id, rx, timeout, &self.time).await)
    }

    /// Publishes an EVENT to every current subscriber of `topic` (§3, C3).
    /// A topic with no subscribers is a no-op — `recipients = []` would
    /// otherwise be indistinguishable from a broadcast once enqueued
    /// (`Message::is_broadcast` is `recipients.is_empty()`), so this returns
    /// early rather than let the delivery engine fan the event out to every
    /// registered agent (Property 11).
    pub async fn publish_event(
        &self,
        topic: Topic,
        sender: AgentIdentity,
        payload: serde_json::Value,
        priority: MessagePriority,
    ) -> bool {
        let recipients: Vec<AgentId> = self.subscriptions.subscribers(&topic).into_iter().collect();
        if recipients.is_empty() {
            return false;
        }
        let message = Message::new_event(sender, recipients, topic.as_ref(), payload, priority);
        self.send_message(message).await
    }

    /// A statistics snapshot, assembled under a single read (§4.8).
    pub async fn stats(&self) -> BrokerStats {
        BrokerStats::snapshot(
            &self.stats,
            self.subscriptions.active_count(),
            self.registry.len(),
            self.started_at.load(Ordering::Relaxed),
            now_secs(),
            self.queue.len().await,
            self.queue.max_capacity().as_usize(),
            self.correlator.pending_count(),
            self.correlator.timeout_count(),
            self.dead_letters.len(),
            self.subscriptions.topic_count(),
            self.worker_pool.snapshots().await,
            ConfigSummary::from(self.config.as_ref()),
        )
    }

    /// Snapshot of every retained dead-letter entry.
    #[must_use]
    pub fn dead_letters(&self) -> Vec<DeadLetterEntry> {
        self.dead_letters.list()
    }

    /// Discards every retained dead-letter entry.
    pub fn clear_dead_letters(&self) {
        self.dead_letters.clear();
    }

    /// Forces an immediate worker-heartbeat health check instead of
    /// waiting for the background monitor's next poll.
    pub async fn check_worker_health(&self) {
        self.worker_pool.check_health().await;
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::domain_types::{AgentName, QueueCapacity, TtlSeconds, WorkerCount};
    use crate::time_provider::test_time_provider;
    use std::collections::HashSet;

    fn identity(id: &str) -> AgentIdentity {
        AgentIdentity::new(
            AgentId::try_new(id).unwrap(),
            AgentType::try_new("t").unwrap(),
            AgentName::try_new(id).unwrap(),
            HashSet::new(),
        )
    }

    fn test_broker() -> Broker {
        let mut config = BrokerConfig::testing();
        config.num_workers = WorkerCount::try_new(1).unwrap();
        config.max_queue_size = QueueCapacity::try_new(10).unwrap();
        Broker::new(config, test_time_provider())
    }

    #[tokio::test]
    async fn request_response_round_trip() {
        let broker = test_broker();
        broker.register_agent(
            identity("b"),
            Handler::sync(|_msg| Some(serde_json::json!({"answer": 42}))),
        );
        broker.start().await;

        let request = Message::new_request(
            identity("a"),
            vec![AgentId::try_new("b").unwrap()],
            serde_json::json!({}),
            MessagePriority::Normal,
            TtlSeconds::default(),
        );
        let response = broker.send_request(request, Duration::from_secs(1)).await.unwrap();
        assert_eq!(response.unwrap().payload["answer"], 42);
        broker.stop().await;
    }

    #[tokio::test]
    async fn send_request_rejects_non_request_messages() {
        let broker = test_broker();
        let event = Message::new_event(identity("a"), vec![], "t", serde_json::json!({}), MessagePriority::Normal);
        let result = broker.send_request(event, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(BrokerError::InvalidMessageType)));
    }

    #[tokio::test]
    async fn subscribe_requires_registered_agent() {
        let broker = test_broker();
        let result = broker.subscribe(&AgentId::try_new("ghost").unwrap(), Topic::try_new("t").unwrap());
        assert!(matches!(result, Err(BrokerError::UnknownAgent { .. })));
    }

    #[tokio::test]
    async fn unregister_also_drops_subscriptions() {
        let broker = test_broker();
        let id = AgentId::try_new("a").unwrap();
        broker.register_agent(identity("a"), Handler::sync(|_| None));
        broker.subscribe(&id, Topic::try_new("t").unwrap()).unwrap();
        broker.unregister_agent(&id);
        assert!(broker.subscribers(&Topic::try_new("t").unwrap()).is_empty());
    }

    #[tokio::test]
    async fn queue_full_dead_letters_and_returns_false() {
        let mut config = BrokerConfig::testing();
        config.max_queue_size = QueueCapacity::try_new(1).unwrap();
        let broker = Broker::new(config, test_time_provider());
        // do not start workers, so nothing drains the queue
        let fill = Message::new_broadcast(identity("a"), serde_json::json!({}), MessagePriority::Normal, TtlSeconds::default());
        assert!(broker.send_message(fill).await);
        let overflow = Message::new_broadcast(identity("a"), serde_json::json!({}), MessagePriority::Normal, TtlSeconds::default());
        assert!(!broker.send_message(overflow).await);
        assert_eq!(broker.dead_letters().len(), 1);
    }
}
