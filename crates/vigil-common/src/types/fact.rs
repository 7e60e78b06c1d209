//! Knowledge facts and version vectors
//!
//! Facts are append/merge only. The version vector gives the knowledge graph
//! its CRDT join: per-key, the causally newest fact wins, and concurrent
//! facts are both kept, tagged by origin.

use crate::types::node::NodeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Causal relationship between two version vectors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Causality {
    Equal,
    /// Self is causally newer
    Dominates,
    /// Other is causally newer
    Dominated,
    Concurrent,
}

/// Per-origin logical clock
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VersionVector(BTreeMap<NodeId, u64>);

impl VersionVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter for a single origin, zero if absent.
    pub fn get(&self, node: &NodeId) -> u64 {
        self.0.get(node).copied().unwrap_or(0)
    }

    /// Advance one origin's counter. Counters only ever grow, which keeps the
    /// per-origin monotonicity invariant.
    pub fn bump(&mut self, node: &NodeId) -> u64 {
        let entry = self.0.entry(node.clone()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Pointwise maximum with another vector.
    pub fn join(&mut self, other: &VersionVector) {
        for (node, &counter) in &other.0 {
            let entry = self.0.entry(node.clone()).or_insert(0);
            if counter > *entry {
                *entry = counter;
            }
        }
    }

    pub fn compare(&self, other: &VersionVector) -> Causality {
        let mut self_ahead = false;
        let mut other_ahead = false;

        for (node, &counter) in &self.0 {
            match counter.cmp(&other.get(node)) {
                std::cmp::Ordering::Greater => self_ahead = true,
                std::cmp::Ordering::Less => other_ahead = true,
                std::cmp::Ordering::Equal => {}
            }
        }
        for (node, &counter) in &other.0 {
            if counter > self.get(node) {
                other_ahead = true;
            }
        }

        match (self_ahead, other_ahead) {
            (false, false) => Causality::Equal,
            (true, false) => Causality::Dominates,
            (false, true) => Causality::Dominated,
            (true, true) => Causality::Concurrent,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for VersionVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(n, c)| format!("{n}:{c}")).collect();
        write!(f, "{{{}}}", parts.join(","))
    }
}

/// A versioned edge in the knowledge graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeFact {
    pub subject: String,
    pub relation: String,
    pub object: String,
    pub version_vector: VersionVector,
    pub origin_node_id: NodeId,
    pub recorded_at: DateTime<Utc>,
}

impl KnowledgeFact {
    pub fn new(
        subject: impl Into<String>,
        relation: impl Into<String>,
        object: impl Into<String>,
        version_vector: VersionVector,
        origin_node_id: NodeId,
    ) -> Self {
        Self {
            subject: subject.into(),
            relation: relation.into(),
            object: object.into(),
            version_vector,
            origin_node_id,
            recorded_at: Utc::now(),
        }
    }

    /// Merge key: facts about the same (subject, relation, object) compete.
    pub fn key(&self) -> (String, String, String) {
        (
            self.subject.clone(),
            self.relation.clone(),
            self.object.clone(),
        )
    }
}

/// Query pattern over facts; `None` fields match anything
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FactPattern {
    pub subject: Option<String>,
    pub relation: Option<String>,
    pub object: Option<String>,
}

impl FactPattern {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn relation(mut self, relation: impl Into<String>) -> Self {
        self.relation = Some(relation.into());
        self
    }

    pub fn object(mut self, object: impl Into<String>) -> Self {
        self.object = Some(object.into());
        self
    }

    pub fn matches(&self, fact: &KnowledgeFact) -> bool {
        self.subject.as_ref().map_or(true, |s| *s == fact.subject)
            && self.relation.as_ref().map_or(true, |r| *r == fact.relation)
            && self.object.as_ref().map_or(true, |o| *o == fact.object)
    }
}
