//! The knowledge graph store

use crate::state::NodeState;
use crate::RECENT_FACT_LOG_CAPACITY;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};
use vigil_common::{Causality, FactPattern, KnowledgeError, KnowledgeFact, NodeId, VersionVector};

type FactKey = (String, String, String);

/// Shared, versioned store of learned facts and node states
///
/// All interior mutability is behind concurrent maps; writers never block
/// readers for longer than a single key operation.
pub struct KnowledgeGraph {
    /// Current winners per key; more than one entry means concurrent facts
    facts: DashMap<FactKey, Vec<KnowledgeFact>>,
    /// Superseded facts, still queryable by version
    history: DashMap<FactKey, Vec<KnowledgeFact>>,
    /// Per-origin logical clocks backing `derive`
    clocks: DashMap<NodeId, u64>,
    /// Live map of node health across the ecosystem
    node_states: DashMap<NodeId, NodeState>,
    /// Rolling log of recently accepted facts
    recent: Mutex<VecDeque<KnowledgeFact>>,
    /// Bumped on every accepted change; cheap freshness probe for consumers
    version: AtomicU64,
}

impl Default for KnowledgeGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self {
            facts: DashMap::new(),
            history: DashMap::new(),
            clocks: DashMap::new(),
            node_states: DashMap::new(),
            recent: Mutex::new(VecDeque::with_capacity(RECENT_FACT_LOG_CAPACITY)),
            version: AtomicU64::new(0),
        }
    }

    /// Monotonic change counter.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }

    /// Derive and publish a new fact on behalf of `origin`.
    ///
    /// The fact's version vector joins the vectors of the current winners for
    /// its key and then advances the origin's own clock, so per-origin
    /// counters never move backwards.
    pub fn derive(
        &self,
        origin: &NodeId,
        subject: impl Into<String>,
        relation: impl Into<String>,
        object: impl Into<String>,
    ) -> KnowledgeFact {
        let subject = subject.into();
        let relation = relation.into();
        let object = object.into();
        let key = (subject.clone(), relation.clone(), object.clone());

        let mut vv = VersionVector::new();
        if let Some(winners) = self.facts.get(&key) {
            for fact in winners.iter() {
                vv.join(&fact.version_vector);
            }
        }
        let counter = {
            let mut clock = self.clocks.entry(origin.clone()).or_insert(0);
            *clock += 1;
            *clock
        };
        // The origin's slot must reflect its global clock, not just key-local
        // history, to keep the per-origin monotonicity invariant.
        while vv.get(origin) < counter {
            vv.bump(origin);
        }

        let fact = KnowledgeFact::new(subject, relation, object, vv, origin.clone());
        self.publish(fact.clone());
        fact
    }

    /// Publish a single fact; returns true if the store changed.
    pub fn publish(&self, fact: KnowledgeFact) -> bool {
        let changed = self.merge_one(fact.clone());
        if changed {
            debug!(
                subject = %fact.subject,
                relation = %fact.relation,
                origin = %fact.origin_node_id,
                "fact accepted"
            );
            let mut recent = self.recent.lock();
            if recent.len() >= RECENT_FACT_LOG_CAPACITY {
                recent.pop_front();
            }
            recent.push_back(fact);
            self.version.fetch_add(1, Ordering::Relaxed);
        }
        changed
    }

    /// Merge a batch of facts from a remote replica.
    ///
    /// Returns how many facts changed the store. Order of application does
    /// not affect the converged state.
    pub fn merge(&self, remote: Vec<KnowledgeFact>) -> usize {
        remote.into_iter().filter(|f| self.publish(f.clone())).count()
    }

    fn merge_one(&self, fact: KnowledgeFact) -> bool {
        let key = fact.key();
        let mut winners = self.facts.entry(key.clone()).or_default();

        // Idempotence: an identical (vector, origin) entry is a no-op.
        if winners
            .iter()
            .any(|w| w.version_vector == fact.version_vector && w.origin_node_id == fact.origin_node_id)
        {
            return false;
        }

        let mut dominated_by_existing = false;
        let mut displaced: Vec<KnowledgeFact> = Vec::new();
        winners.retain(|w| match fact.version_vector.compare(&w.version_vector) {
            Causality::Dominates => {
                displaced.push(w.clone());
                false
            }
            Causality::Dominated => {
                dominated_by_existing = true;
                true
            }
            Causality::Concurrent | Causality::Equal => true,
        });

        if dominated_by_existing {
            // Old news: keep it queryable, never let it displace the winner.
            return self.push_history(&key, fact);
        }

        for old in displaced {
            self.push_history(&key, old);
        }
        // Concurrent with everything that remains: keep both alternatives.
        winners.push(fact);
        winners.sort_by(|a, b| {
            a.origin_node_id
                .cmp(&b.origin_node_id)
                .then_with(|| a.version_vector.to_string().cmp(&b.version_vector.to_string()))
        });
        true
    }

    fn push_history(&self, key: &FactKey, fact: KnowledgeFact) -> bool {
        let mut history = self.history.entry(key.clone()).or_default();
        let duplicate = history
            .iter()
            .any(|h| h.version_vector == fact.version_vector && h.origin_node_id == fact.origin_node_id);
        if duplicate {
            return false;
        }
        history.push(fact);
        true
    }

    /// Query current winners matching a pattern, in deterministic order.
    pub fn query(&self, pattern: &FactPattern) -> Vec<KnowledgeFact> {
        let mut out: Vec<KnowledgeFact> = self
            .facts
            .iter()
            .flat_map(|entry| entry.value().clone())
            .filter(|f| pattern.matches(f))
            .collect();
        out.sort_by(|a, b| a.key().cmp(&b.key()).then_with(|| a.origin_node_id.cmp(&b.origin_node_id)));
        out
    }

    /// Query including superseded facts.
    pub fn query_history(&self, pattern: &FactPattern) -> Vec<KnowledgeFact> {
        let mut out = self.query(pattern);
        out.extend(
            self.history
                .iter()
                .flat_map(|entry| entry.value().clone())
                .filter(|f| pattern.matches(f)),
        );
        out.sort_by(|a, b| a.key().cmp(&b.key()).then_with(|| a.origin_node_id.cmp(&b.origin_node_id)));
        out
    }

    /// The most recently accepted facts, newest last.
    pub fn recent(&self, limit: usize) -> Vec<KnowledgeFact> {
        let recent = self.recent.lock();
        recent.iter().rev().take(limit).rev().cloned().collect()
    }

    // --- node-state map ---

    /// Register a node at ecosystem startup.
    pub fn register_node(&self, node_id: NodeId) {
        self.node_states
            .entry(node_id.clone())
            .or_insert_with(|| NodeState::starting(node_id));
    }

    /// Update a node's health entry.
    pub fn update_node_state(&self, state: NodeState) -> Result<(), KnowledgeError> {
        match self.node_states.get_mut(&state.node_id) {
            Some(mut entry) => {
                *entry = state;
                Ok(())
            }
            None => {
                warn!(node = %state.node_id, "state update for unregistered node");
                Err(KnowledgeError::UnknownNode(state.node_id.to_string()))
            }
        }
    }

    pub fn node_state(&self, node_id: &NodeId) -> Option<NodeState> {
        self.node_states.get(node_id).map(|e| e.clone())
    }

    pub fn node_states(&self) -> Vec<NodeState> {
        let mut out: Vec<NodeState> = self.node_states.iter().map(|e| e.clone()).collect();
        out.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        out
    }

    // --- snapshot / restore ---

    /// Consistent serializable copy of the whole graph.
    pub fn snapshot(&self) -> KnowledgeSnapshot {
        KnowledgeSnapshot {
            winners: self.query(&FactPattern::any()),
            history: self
                .history
                .iter()
                .flat_map(|entry| entry.value().clone())
                .collect(),
            clocks: self
                .clocks
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            node_states: self.node_states(),
            version: self.version(),
        }
    }

    /// Rebuild a graph from a snapshot.
    pub fn restore(snapshot: KnowledgeSnapshot) -> Self {
        let graph = Self::new();
        for state in snapshot.node_states {
            graph.node_states.insert(state.node_id.clone(), state);
        }
        for (node, clock) in snapshot.clocks {
            graph.clocks.insert(node, clock);
        }
        graph.merge(snapshot.winners);
        for fact in snapshot.history {
            graph.push_history(&fact.key(), fact);
        }
        graph.version.store(snapshot.version, Ordering::Relaxed);
        graph
    }
}

/// Serializable state of the graph, used by the checkpoint store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeSnapshot {
    pub winners: Vec<KnowledgeFact>,
    pub history: Vec<KnowledgeFact>,
    pub clocks: BTreeMap<NodeId, u64>,
    pub node_states: Vec<NodeState>,
    pub version: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_common::NodeStatus;

    fn fact(origin: &str, s: &str, o: &str, vv_pairs: &[(&str, u64)]) -> KnowledgeFact {
        let mut vv = VersionVector::new();
        for (node, counter) in vv_pairs {
            for _ in 0..*counter {
                vv.bump(&NodeId::from(*node));
            }
        }
        KnowledgeFact::new(s, "correlates_with", o, vv, NodeId::from(origin))
    }

    #[test]
    fn test_derive_bumps_origin_clock() {
        let graph = KnowledgeGraph::new();
        let origin = NodeId::from("n1");
        let first = graph.derive(&origin, "A", "anomaly", "spike");
        let second = graph.derive(&origin, "A", "anomaly", "spike");
        assert!(second.version_vector.get(&origin) > first.version_vector.get(&origin));
    }

    #[test]
    fn test_newer_fact_supersedes() {
        let graph = KnowledgeGraph::new();
        let old = fact("n1", "A", "B", &[("n1", 1)]);
        let new = fact("n1", "A", "B", &[("n1", 2)]);
        graph.publish(old.clone());
        graph.publish(new.clone());

        let winners = graph.query(&FactPattern::any());
        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].version_vector, new.version_vector);

        // The superseded fact stays queryable by version.
        let all = graph.query_history(&FactPattern::any());
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_concurrent_facts_both_kept() {
        let graph = KnowledgeGraph::new();
        graph.publish(fact("n1", "A", "B", &[("n1", 1)]));
        graph.publish(fact("n2", "A", "B", &[("n2", 1)]));
        assert_eq!(graph.query(&FactPattern::any()).len(), 2);
    }

    #[test]
    fn test_merge_commutative() {
        let a = fact("n1", "A", "B", &[("n1", 2)]);
        let b = fact("n2", "A", "B", &[("n2", 1)]);
        let c = fact("n1", "A", "B", &[("n1", 1)]);

        let g1 = KnowledgeGraph::new();
        g1.merge(vec![a.clone(), b.clone(), c.clone()]);
        let g2 = KnowledgeGraph::new();
        g2.merge(vec![c, b, a]);

        assert_eq!(g1.query(&FactPattern::any()), g2.query(&FactPattern::any()));
    }

    #[test]
    fn test_merge_idempotent() {
        let graph = KnowledgeGraph::new();
        let f = fact("n1", "A", "B", &[("n1", 1)]);
        assert!(graph.publish(f.clone()));
        assert!(!graph.publish(f.clone()));
        assert_eq!(graph.merge(vec![f]), 0);
        assert_eq!(graph.query(&FactPattern::any()).len(), 1);
    }

    #[test]
    fn test_node_state_updates() {
        let graph = KnowledgeGraph::new();
        let id = NodeId::from("n1");
        graph.register_node(id.clone());

        let mut state = NodeState::starting(id.clone());
        state.status = NodeStatus::Degraded;
        state.consecutive_failures = 3;
        graph.update_node_state(state).unwrap();

        assert_eq!(graph.node_state(&id).unwrap().status, NodeStatus::Degraded);

        let unknown = NodeState::starting(NodeId::from("ghost"));
        assert!(graph.update_node_state(unknown).is_err());
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let graph = KnowledgeGraph::new();
        graph.register_node(NodeId::from("n1"));
        graph.derive(&NodeId::from("n1"), "A", "anomaly", "spike");
        graph.derive(&NodeId::from("n1"), "A", "anomaly", "spike");
        graph.publish(fact("n2", "A", "B", &[("n2", 1)]));

        let snap = graph.snapshot();
        let restored = KnowledgeGraph::restore(snap.clone());

        assert_eq!(restored.query(&FactPattern::any()), graph.query(&FactPattern::any()));
        assert_eq!(restored.version(), graph.version());
        // Clocks survive, so post-restore derives stay monotone.
        let next = restored.derive(&NodeId::from("n1"), "A", "anomaly", "spike");
        assert_eq!(next.version_vector.get(&NodeId::from("n1")), 3);
    }
}
