use super::{PolicyRule, PolicySet};
use crate::PolicyResult;
use crate::role_graph::InheritanceEdge;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Durable home of policy rules, role registrations and inheritance edges.
///
/// Adding a rule or an edge also registers the roles it names.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn load(&self) -> PolicyResult<PolicySet>;
    async fn add_rule(&self, rule: &PolicyRule) -> PolicyResult<()>;
    async fn remove_rule(&self, rule: &PolicyRule) -> PolicyResult<()>;
    /// Delete every rule of `role` and insert `rules` as one unit.
    async fn replace_rules_for_role(&self, role: &str, rules: &[PolicyRule]) -> PolicyResult<()>;
    async fn add_edge(&self, edge: &InheritanceEdge) -> PolicyResult<()>;
    async fn remove_edge(&self, edge: &InheritanceEdge) -> PolicyResult<()>;
    async fn add_role(&self, role: &str) -> PolicyResult<()>;
    /// Delete the role, its rules and every edge that names it.
    async fn remove_role(&self, role: &str) -> PolicyResult<()>;
    fn backend_name(&self) -> &'static str;
}

#[derive(Default)]
struct MemoryState {
    roles: BTreeSet<String>,
    rules: BTreeSet<PolicyRule>,
    edges: BTreeSet<InheritanceEdge>,
}

#[derive(Clone, Default)]
pub struct MemoryPolicyStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policies(set: PolicySet) -> Self {
        let mut state = MemoryState {
            roles: set.roles,
            ..MemoryState::default()
        };
        for rule in set.rules {
            state.roles.insert(rule.role.clone());
            state.rules.insert(rule);
        }
        for edge in set.inheritance {
            state.roles.insert(edge.child.clone());
            state.roles.insert(edge.parent.clone());
            state.edges.insert(edge);
        }
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }
}

#[async_trait]
impl PolicyStore for MemoryPolicyStore {
    async fn load(&self) -> PolicyResult<PolicySet> {
        let state = self.state.read().await;
        Ok(PolicySet {
            roles: state.roles.clone(),
            rules: state.rules.iter().cloned().collect(),
            inheritance: state.edges.iter().cloned().collect(),
        })
    }

    async fn add_rule(&self, rule: &PolicyRule) -> PolicyResult<()> {
        let mut state = self.state.write().await;
        state.roles.insert(rule.role.clone());
        state.rules.insert(rule.clone());
        Ok(())
    }

    async fn remove_rule(&self, rule: &PolicyRule) -> PolicyResult<()> {
        self.state.write().await.rules.remove(rule);
        Ok(())
    }

    async fn replace_rules_for_role(&self, role: &str, rules: &[PolicyRule]) -> PolicyResult<()> {
        let mut state = self.state.write().await;
        state.roles.insert(role.to_string());
        state.rules.retain(|rule| rule.role != role);
        state.rules.extend(rules.iter().cloned());
        Ok(())
    }

    async fn add_edge(&self, edge: &InheritanceEdge) -> PolicyResult<()> {
        let mut state = self.state.write().await;
        state.roles.insert(edge.child.clone());
        state.roles.insert(edge.parent.clone());
        state.edges.insert(edge.clone());
        Ok(())
    }

    async fn remove_edge(&self, edge: &InheritanceEdge) -> PolicyResult<()> {
        self.state.write().await.edges.remove(edge);
        Ok(())
    }

    async fn add_role(&self, role: &str) -> PolicyResult<()> {
        self.state.write().await.roles.insert(role.to_string());
        Ok(())
    }

    async fn remove_role(&self, role: &str) -> PolicyResult<()> {
        let mut state = self.state.write().await;
        state.roles.remove(role);
        state.rules.retain(|rule| rule.role != role);
        state
            .edges
            .retain(|edge| edge.child != role && edge.parent != role);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
