//! Agent registry (C2): `agent_id → (identity, handler)`, with O(1) lookup
//! and capability/type indexes, the way `agent_registry.rs` indexes
//! capabilities for its own registry.

use dashmap::DashMap;
use std::collections::HashSet;
use tracing::warn;

use super::domain_types::{AgentId, AgentType, Capability};
use super::handler::Handler;
use super::message::AgentIdentity;

/// A registered agent's identity together with its dispatch handler.
#[derive(Clone)]
pub struct RegisteredAgent {
    /// The agent's identity.
    pub identity: AgentIdentity,
    /// The handler invoked for messages routed to this agent.
    pub handler: Handler,
}

/// Agent registry: the broker's source of truth for "who is registered and
/// how do I reach them".
pub struct AgentRegistry {
    agents: DashMap<AgentId, RegisteredAgent>,
    by_type: DashMap<AgentType, HashSet<AgentId>>,
    by_capability: DashMap<Capability, HashSet<AgentId>>,
}

impl AgentRegistry {
    /// Builds an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            agents: DashMap::new(),
            by_type: DashMap::new(),
            by_capability: DashMap::new(),
        }
    }

    /// Registers `identity` with `handler`. Re-registering an id already
    /// present overwrites the prior entry and logs a warning rather than
    /// erroring (§4.2).
    pub fn register(&self, identity: AgentIdentity, handler: Handler) {
        let agent_id = identity.agent_id.clone();

        if self.agents.contains_key(&agent_id) {
            warn!(%agent_id, "re-registering already-registered agent, overwriting");
            self.remove_indexes(&agent_id);
        }

        self.by_type
            .entry(identity.agent_type.clone())
            .or_default()
            .insert(agent_id.clone());

        for capability in &identity.capabilities {
            self.by_capability
                .entry(capability.clone())
                .or_default()
                .insert(agent_id.clone());
        }

        self.agents.insert(agent_id, RegisteredAgent { identity, handler });
    }

    /// Removes an agent. Returns its identity if it was registered.
    pub fn unregister(&self, agent_id: &AgentId) -> Option<AgentIdentity> {
        let removed = self.agents.remove(agent_id).map(|(_, entry)| entry.identity);
        if removed.is_some() {
            self.remove_indexes(agent_id);
        }
        removed
    }

    fn remove_indexes(&self, agent_id: &AgentId) {
        if let Some(entry) = self.agents.get(agent_id) {
            if let Some(mut ids) = self.by_type.get_mut(&entry.identity.agent_type) {
                ids.remove(agent_id);
            }
            for capability in &entry.identity.capabilities {
                if let Some(mut ids) = self.by_capability.get_mut(capability) {
                    ids.remove(agent_id);
                }
            }
        }
    }

    /// Looks up a registered agent's handler and identity.
    #[must_use]
    pub fn lookup(&self, agent_id: &AgentId) -> Option<RegisteredAgent> {
        self.agents.get(agent_id).map(|entry| entry.clone())
    }

    /// Whether `agent_id` is currently registered.
    #[must_use]
    pub fn is_registered(&self, agent_id: &AgentId) -> bool {
        self.agents.contains_key(agent_id)
    }

    /// Snapshot of every registered identity.
    #[must_use]
    pub fn list_all(&self) -> Vec<AgentIdentity> {
        self.agents.iter().map(|entry| entry.identity.clone()).collect()
    }

    /// Ids of all agents of a given type.
    #[must_use]
    pub fn by_type(&self, agent_type: &AgentType) -> Vec<AgentId> {
        self.by_type
            .get(agent_type)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Ids of all agents advertising a given capability.
    #[must_use]
    pub fn by_capability(&self, capability: &Capability) -> Vec<AgentId> {
        self.by_capability
            .get(capability)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of registered agents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::domain_types::AgentName;
    use std::collections::HashSet as StdHashSet;

    fn identity(id: &str, agent_type: &str, caps: &[&str]) -> AgentIdentity {
        AgentIdentity::new(
            AgentId::try_new(id).unwrap(),
            AgentType::try_new(agent_type).unwrap(),
            AgentName::try_new(id).unwrap(),
            caps.iter().map(|c| Capability::try_new(*c).unwrap()).collect(),
        )
    }

    fn noop_handler() -> Handler {
        Handler::sync(|_msg| None)
    }

    #[test]
    fn register_then_lookup_round_trips() {
        let registry = AgentRegistry::new();
        registry.register(identity("a", "legal", &["draft"]), noop_handler());
        assert!(registry.is_registered(&AgentId::try_new("a").unwrap()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unregister_removes_from_all_indexes() {
        let registry = AgentRegistry::new();
        let id = AgentId::try_new("a").unwrap();
        registry.register(identity("a", "legal", &["draft"]), noop_handler());
        registry.unregister(&id);
        assert!(!registry.is_registered(&id));
        assert!(registry.by_type(&AgentType::try_new("legal").unwrap()).is_empty());
        assert!(registry
            .by_capability(&Capability::try_new("draft").unwrap())
            .is_empty());
    }

    #[test]
    fn reregistering_overwrites_without_erroring() {
        let registry = AgentRegistry::new();
        registry.register(identity("a", "legal", &["draft"]), noop_handler());
        registry.register(identity("a", "environmental", &["review"]), noop_handler());
        assert_eq!(registry.len(), 1);
        assert!(registry.by_type(&AgentType::try_new("legal").unwrap()).is_empty());
        assert_eq!(
            registry.by_type(&AgentType::try_new("environmental").unwrap()),
            vec![AgentId::try_new("a").unwrap()]
        );
    }

    #[test]
    fn by_capability_finds_all_matching_agents() {
        let registry = AgentRegistry::new();
        registry.register(identity("a", "legal", &["draft"]), noop_handler());
        registry.register(identity("b", "legal", &["draft", "review"]), noop_handler());
        let mut found = registry.by_capability(&Capability::try_new("draft").unwrap());
        found.sort();
        let mut expected = vec![AgentId::try_new("a").unwrap(), AgentId::try_new("b").unwrap()];
        expected.sort();
        assert_eq!(found, expected);
    }

    #[test]
    fn list_all_snapshots_every_registered_identity() {
        let registry = AgentRegistry::new();
        registry.register(identity("a", "legal", &[]), noop_handler());
        registry.register(identity("b", "legal", &[]), noop_handler());
        let ids: StdHashSet<_> = registry.list_all().into_iter().map(|i| i.agent_id).collect();
        assert_eq!(ids.len(), 2);
    }
}
