//! Subscription registry (C3): topic → subscriber set, with a reverse index
//! so that unregistering an agent drops its subscriptions in O(subscribed
//! topics) rather than O(total topics) (§4.3 implementation note).

use dashmap::DashMap;
use std::collections::HashSet;

use super::domain_types::{AgentId, Topic};

/// Topic-based publish/subscribe registry.
pub struct SubscriptionRegistry {
    subscribers: DashMap<Topic, HashSet<AgentId>>,
    subscribed_topics: DashMap<AgentId, HashSet<Topic>>,
}

impl SubscriptionRegistry {
    /// Builds an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
            subscribed_topics: DashMap::new(),
        }
    }

    /// Subscribes `agent_id` to `topic`. Idempotent.
    pub fn subscribe(&self, agent_id: &AgentId, topic: Topic) {
        self.subscribers
            .entry(topic.clone())
            .or_default()
            .insert(agent_id.clone());
        self.subscribed_topics
            .entry(agent_id.clone())
            .or_default()
            .insert(topic);
    }

    /// Unsubscribes `agent_id` from `topic`. Idempotent; a no-op if the
    /// agent was not subscribed.
    pub fn unsubscribe(&self, agent_id: &AgentId, topic: &Topic) {
        if let Some(mut subs) = self.subscribers.get_mut(topic) {
            subs.remove(agent_id);
        }
        if let Some(mut topics) = self.subscribed_topics.get_mut(agent_id) {
            topics.remove(topic);
        }
    }

    /// Snapshot of the agents currently subscribed to `topic`.
    #[must_use]
    pub fn subscribers(&self, topic: &Topic) -> HashSet<AgentId> {
        self.subscribers.get(topic).map(|s| s.clone()).unwrap_or_default()
    }

    /// Removes every subscription held by `agent_id`, visiting only the
    /// topics it was actually subscribed to.
    pub fn remove_agent(&self, agent_id: &AgentId) {
        if let Some((_, topics)) = self.subscribed_topics.remove(agent_id) {
            for topic in topics {
                if let Some(mut subs) = self.subscribers.get_mut(&topic) {
                    subs.remove(agent_id);
                }
            }
        }
    }

    /// Total subscriber-topic pairs currently held, used for the
    /// `subscriptions_active` statistic (§2.2/§4.8).
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.subscribers.iter().map(|entry| entry.value().len()).sum()
    }

    /// Number of distinct topics with at least one subscriber.
    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.subscribers.iter().filter(|entry| !entry.value().is_empty()).count()
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(id: &str) -> AgentId {
        AgentId::try_new(id).unwrap()
    }

    fn topic(name: &str) -> Topic {
        Topic::try_new(name).unwrap()
    }

    #[test]
    fn subscribe_then_subscribers_returns_the_agent() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(&agent("a"), topic("rag_updates"));
        assert!(registry.subscribers(&topic("rag_updates")).contains(&agent("a")));
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let registry = SubscriptionRegistry::new();
        registry.unsubscribe(&agent("a"), &topic("rag_updates"));
        registry.subscribe(&agent("a"), topic("rag_updates"));
        registry.unsubscribe(&agent("a"), &topic("rag_updates"));
        registry.unsubscribe(&agent("a"), &topic("rag_updates"));
        assert!(registry.subscribers(&topic("rag_updates")).is_empty());
    }

    #[test]
    fn remove_agent_drops_only_its_own_subscriptions() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(&agent("a"), topic("t1"));
        registry.subscribe(&agent("a"), topic("t2"));
        registry.subscribe(&agent("b"), topic("t1"));
        registry.remove_agent(&agent("a"));
        assert!(!registry.subscribers(&topic("t1")).contains(&agent("a")));
        assert!(registry.subscribers(&topic("t1")).contains(&agent("b")));
        assert!(registry.subscribers(&topic("t2")).is_empty());
    }

    #[test]
    fn active_count_counts_subscriber_topic_pairs_not_distinct_topics() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(&agent("a"), topic("t1"));
        registry.subscribe(&agent("b"), topic("t1"));
        registry.subscribe(&agent("a"), topic("t2"));
        assert_eq!(registry.active_count(), 3);
        assert_eq!(registry.topic_count(), 2);
    }
}
