//! Role inheritance graph.
//!
//! # Purpose
//! Holds directed `child -> parent` edges and answers "which roles does this
//! role inherit from" with a breadth-first walk over parent edges.
//!
//! # Key invariants
//! - The graph is acyclic. `add_edge` rejects self-edges and any edge whose
//!   parent already (transitively) inherits from the child.
//! - `ancestors` returns each role at most once, nearest first.
use crate::{PolicyError, PolicyResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InheritanceEdge {
    pub child: String,
    pub parent: String,
}

impl InheritanceEdge {
    pub fn new(child: impl Into<String>, parent: impl Into<String>) -> Self {
        Self {
            child: child.into(),
            parent: parent.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoleGraph {
    parents: HashMap<String, BTreeSet<String>>,
}

impl RoleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from stored edges, rejecting any edge that closes a cycle.
    pub fn from_edges<'a>(edges: impl IntoIterator<Item = &'a InheritanceEdge>) -> PolicyResult<Self> {
        let mut graph = Self::new();
        for edge in edges {
            graph.add_edge(&edge.child, &edge.parent)?;
        }
        Ok(graph)
    }

    /// Insert `child -> parent`. Returns `false` when the edge already exists.
    pub fn add_edge(&mut self, child: &str, parent: &str) -> PolicyResult<bool> {
        if child.is_empty() || parent.is_empty() {
            return Err(PolicyError::InvalidRule("role name must not be empty".into()));
        }
        if self.has_edge(child, parent) {
            return Ok(false);
        }
        if child == parent || self.inherits(parent, child) {
            return Err(PolicyError::InheritanceCycle {
                child: child.to_string(),
                parent: parent.to_string(),
            });
        }
        self.parents
            .entry(child.to_string())
            .or_default()
            .insert(parent.to_string());
        Ok(true)
    }

    pub fn remove_edge(&mut self, child: &str, parent: &str) -> bool {
        let Some(parents) = self.parents.get_mut(child) else {
            return false;
        };
        let removed = parents.remove(parent);
        if parents.is_empty() {
            self.parents.remove(child);
        }
        removed
    }

    /// Drop the role and every edge that touches it.
    pub fn remove_role(&mut self, role: &str) {
        self.parents.remove(role);
        self.parents.retain(|_, parents| {
            parents.remove(role);
            !parents.is_empty()
        });
    }

    pub fn has_edge(&self, child: &str, parent: &str) -> bool {
        self.parents
            .get(child)
            .is_some_and(|parents| parents.contains(parent))
    }

    pub fn contains(&self, role: &str) -> bool {
        self.parents.contains_key(role)
            || self.parents.values().any(|parents| parents.contains(role))
    }

    pub fn parents(&self, role: &str) -> impl Iterator<Item = &str> {
        self.parents
            .get(role)
            .into_iter()
            .flat_map(|parents| parents.iter().map(String::as_str))
    }

    /// Transitive ancestors of `role` in breadth-first order, excluding `role`.
    pub fn ancestors(&self, role: &str) -> Vec<String> {
        let mut seen: HashSet<&str> = HashSet::from([role]);
        let mut queue: VecDeque<&str> = VecDeque::from([role]);
        let mut order = Vec::new();
        while let Some(current) = queue.pop_front() {
            for parent in self.parents(current) {
                if seen.insert(parent) {
                    order.push(parent.to_string());
                    queue.push_back(parent);
                }
            }
        }
        order
    }

    /// True when `role` transitively inherits from `ancestor`.
    pub fn inherits(&self, role: &str, ancestor: &str) -> bool {
        self.ancestors(role).iter().any(|found| found == ancestor)
    }

    pub fn edges(&self) -> Vec<InheritanceEdge> {
        let mut edges: Vec<InheritanceEdge> = self
            .parents
            .iter()
            .flat_map(|(child, parents)| {
                parents
                    .iter()
                    .map(move |parent| InheritanceEdge::new(child.clone(), parent.clone()))
            })
            .collect();
        edges.sort();
        edges
    }
}
