//! Role-based policy enforcement.
//!
//! # Purpose
//! Decides whether a role may perform an action on a RESTful resource path,
//! using the role's own grants and those it inherits through the role graph.
//!
//! # How it fits
//! The gatekeeper's authorization stage calls `PolicyEngine::enforce` for
//! every protected request; admin endpoints mutate rules through the same
//! engine so the durable store and the in-memory view stay aligned.
//!
//! # Key invariants
//! - Readers never take a lock. They load the current `PolicySnapshot`.
//! - Writers are serialized, persist first, then publish a whole new
//!   snapshot in a single swap. A bulk replace is never observed half-done.
//! - The inheritance graph is acyclic.
//!
//! # Common pitfalls
//! - `enforce` on a role nobody registered returns `RoleNotFound`, not
//!   `Ok(false)`. Callers deny in both cases but should log them apart.
mod store;

pub use store::{MemoryPolicyStore, PolicyStore};

use crate::matcher::PathPattern;
use crate::role_graph::{InheritanceEdge, RoleGraph};
use crate::{PolicyError, PolicyResult};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PolicyRule {
    pub role: String,
    pub resource: String,
    pub action: String,
}

impl PolicyRule {
    pub fn new(
        role: impl Into<String>,
        resource: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            role: role.into(),
            resource: resource.into(),
            action: action.into(),
        }
    }

    pub fn validate(&self) -> PolicyResult<()> {
        if self.role.trim().is_empty() {
            return Err(PolicyError::InvalidRule("role must not be empty".into()));
        }
        if self.action.trim().is_empty() {
            return Err(PolicyError::InvalidRule("action must not be empty".into()));
        }
        PathPattern::parse(&self.resource).map(|_| ())
    }
}

/// Everything a policy store persists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySet {
    pub roles: BTreeSet<String>,
    pub rules: Vec<PolicyRule>,
    pub inheritance: Vec<InheritanceEdge>,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: PolicyRule,
    pattern: PathPattern,
}

impl CompiledRule {
    fn compile(rule: PolicyRule) -> PolicyResult<Self> {
        rule.validate()?;
        let pattern = PathPattern::parse(&rule.resource)?;
        Ok(Self { rule, pattern })
    }

    fn grants(&self, resource: &str, action: &str) -> bool {
        self.rule.action == action && self.pattern.matches(resource)
    }
}

/// Immutable view of every rule, registered role and inheritance edge.
#[derive(Debug, Clone, Default)]
pub struct PolicySnapshot {
    roles: BTreeSet<String>,
    rules: HashMap<String, Vec<CompiledRule>>,
    graph: RoleGraph,
}

impl PolicySnapshot {
    pub fn build(set: PolicySet) -> PolicyResult<Self> {
        let mut snapshot = Self {
            roles: set.roles,
            graph: RoleGraph::from_edges(&set.inheritance)?,
            rules: HashMap::new(),
        };
        for rule in set.rules {
            snapshot.insert_rule(CompiledRule::compile(rule)?);
        }
        Ok(snapshot)
    }

    pub fn is_known_role(&self, role: &str) -> bool {
        self.roles.contains(role) || self.rules.contains_key(role) || self.graph.contains(role)
    }

    /// Own rules first, then ancestors breadth-first. First match allows.
    pub fn enforce(&self, role: &str, resource: &str, action: &str) -> PolicyResult<bool> {
        if !self.is_known_role(role) {
            return Err(PolicyError::RoleNotFound(role.to_string()));
        }
        if self.role_grants(role, resource, action) {
            return Ok(true);
        }
        Ok(self
            .graph
            .ancestors(role)
            .iter()
            .any(|ancestor| self.role_grants(ancestor, resource, action)))
    }

    fn role_grants(&self, role: &str, resource: &str, action: &str) -> bool {
        self.rules
            .get(role)
            .is_some_and(|rules| rules.iter().any(|rule| rule.grants(resource, action)))
    }

    pub fn rules_for_role(&self, role: &str) -> Vec<PolicyRule> {
        let mut rules: Vec<PolicyRule> = self
            .rules
            .get(role)
            .map(|rules| rules.iter().map(|compiled| compiled.rule.clone()).collect())
            .unwrap_or_default();
        rules.sort();
        rules
    }

    pub fn has_rule(&self, rule: &PolicyRule) -> bool {
        self.rules
            .get(&rule.role)
            .is_some_and(|rules| rules.iter().any(|compiled| &compiled.rule == rule))
    }

    pub fn roles(&self) -> Vec<String> {
        let mut roles: BTreeSet<String> = self.roles.clone();
        roles.extend(self.rules.keys().cloned());
        for edge in self.graph.edges() {
            roles.insert(edge.child);
            roles.insert(edge.parent);
        }
        roles.into_iter().collect()
    }

    pub fn parents(&self, role: &str) -> Vec<String> {
        self.graph.parents(role).map(str::to_string).collect()
    }

    pub fn inheritance(&self) -> Vec<InheritanceEdge> {
        self.graph.edges()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.values().map(Vec::len).sum()
    }

    fn insert_rule(&mut self, compiled: CompiledRule) {
        let rules = self.rules.entry(compiled.rule.role.clone()).or_default();
        if !rules.iter().any(|existing| existing.rule == compiled.rule) {
            rules.push(compiled);
        }
    }

    fn remove_rule(&mut self, rule: &PolicyRule) -> bool {
        let Some(rules) = self.rules.get_mut(&rule.role) else {
            return false;
        };
        let before = rules.len();
        rules.retain(|existing| &existing.rule != rule);
        let removed = rules.len() != before;
        if rules.is_empty() {
            self.rules.remove(&rule.role);
        }
        removed
    }
}

/// In-memory policy view backed by a durable `PolicyStore`.
pub struct PolicyEngine {
    store: Arc<dyn PolicyStore>,
    current: ArcSwap<PolicySnapshot>,
    write_gate: Mutex<()>,
}

impl PolicyEngine {
    pub async fn load(store: Arc<dyn PolicyStore>) -> PolicyResult<Self> {
        let set = store.load().await?;
        let snapshot = PolicySnapshot::build(set)?;
        tracing::info!(
            backend = store.backend_name(),
            roles = snapshot.roles().len(),
            rules = snapshot.rule_count(),
            "policy engine loaded"
        );
        Ok(Self {
            store,
            current: ArcSwap::from_pointee(snapshot),
            write_gate: Mutex::new(()),
        })
    }

    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        self.current.load_full()
    }

    pub fn enforce(&self, role: &str, resource: &str, action: &str) -> PolicyResult<bool> {
        self.current.load().enforce(role, resource, action)
    }

    pub fn get_policies_for_role(&self, role: &str) -> Vec<PolicyRule> {
        self.current.load().rules_for_role(role)
    }

    pub fn roles(&self) -> Vec<String> {
        self.current.load().roles()
    }

    /// Returns `false` if the rule already existed.
    pub async fn add_policy(&self, rule: PolicyRule) -> PolicyResult<bool> {
        let compiled = CompiledRule::compile(rule)?;
        let _gate = self.write_gate.lock().await;
        let current = self.current.load_full();
        if current.has_rule(&compiled.rule) {
            return Ok(false);
        }
        self.store.add_rule(&compiled.rule).await?;
        let mut next = PolicySnapshot::clone(&current);
        next.roles.insert(compiled.rule.role.clone());
        next.insert_rule(compiled);
        self.current.store(Arc::new(next));
        Ok(true)
    }

    /// Returns `false` if no such rule existed.
    pub async fn remove_policy(&self, rule: &PolicyRule) -> PolicyResult<bool> {
        let _gate = self.write_gate.lock().await;
        let current = self.current.load_full();
        if !current.has_rule(rule) {
            return Ok(false);
        }
        self.store.remove_rule(rule).await?;
        let mut next = PolicySnapshot::clone(&current);
        next.remove_rule(rule);
        self.current.store(Arc::new(next));
        Ok(true)
    }

    /// Replace every direct rule of `role` in one step.
    pub async fn replace_policies_for_role(
        &self,
        role: &str,
        rules: Vec<PolicyRule>,
    ) -> PolicyResult<()> {
        if role.trim().is_empty() {
            return Err(PolicyError::InvalidRule("role must not be empty".into()));
        }
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules.into_iter().collect::<BTreeSet<_>>() {
            if rule.role != role {
                return Err(PolicyError::InvalidRule(format!(
                    "rule for role {} cannot be stored under {role}",
                    rule.role
                )));
            }
            compiled.push(CompiledRule::compile(rule)?);
        }
        let plain: Vec<PolicyRule> = compiled.iter().map(|c| c.rule.clone()).collect();

        let _gate = self.write_gate.lock().await;
        self.store.replace_rules_for_role(role, &plain).await?;
        let mut next = PolicySnapshot::clone(&self.current.load_full());
        next.roles.insert(role.to_string());
        next.rules.remove(role);
        if !compiled.is_empty() {
            next.rules.insert(role.to_string(), compiled);
        }
        self.current.store(Arc::new(next));
        tracing::info!(role, rules = plain.len(), "role policies replaced");
        Ok(())
    }

    /// Make `child` inherit every grant of `parent`. Cycles are rejected
    /// before anything is persisted.
    pub async fn add_role_inheritance(&self, child: &str, parent: &str) -> PolicyResult<bool> {
        let _gate = self.write_gate.lock().await;
        let mut next = PolicySnapshot::clone(&self.current.load_full());
        if !next.graph.add_edge(child, parent)? {
            return Ok(false);
        }
        self.store
            .add_edge(&InheritanceEdge::new(child, parent))
            .await?;
        next.roles.insert(child.to_string());
        next.roles.insert(parent.to_string());
        self.current.store(Arc::new(next));
        Ok(true)
    }

    pub async fn remove_role_inheritance(&self, child: &str, parent: &str) -> PolicyResult<bool> {
        let _gate = self.write_gate.lock().await;
        let mut next = PolicySnapshot::clone(&self.current.load_full());
        if !next.graph.remove_edge(child, parent) {
            return Ok(false);
        }
        self.store
            .remove_edge(&InheritanceEdge::new(child, parent))
            .await?;
        self.current.store(Arc::new(next));
        Ok(true)
    }

    /// Register a role with no grants yet. Returns `false` if already known.
    pub async fn add_role(&self, role: &str) -> PolicyResult<bool> {
        if role.trim().is_empty() {
            return Err(PolicyError::InvalidRule("role must not be empty".into()));
        }
        let _gate = self.write_gate.lock().await;
        let current = self.current.load_full();
        if current.is_known_role(role) {
            return Ok(false);
        }
        self.store.add_role(role).await?;
        let mut next = PolicySnapshot::clone(&current);
        next.roles.insert(role.to_string());
        self.current.store(Arc::new(next));
        Ok(true)
    }

    /// Drop a role with all of its rules and inheritance edges.
    pub async fn remove_role(&self, role: &str) -> PolicyResult<()> {
        let _gate = self.write_gate.lock().await;
        let current = self.current.load_full();
        if !current.is_known_role(role) {
            return Err(PolicyError::RoleNotFound(role.to_string()));
        }
        self.store.remove_role(role).await?;
        let mut next = PolicySnapshot::clone(&current);
        next.roles.remove(role);
        next.rules.remove(role);
        next.graph.remove_role(role);
        self.current.store(Arc::new(next));
        tracing::info!(role, "role removed");
        Ok(())
    }
}
